//! Fixed-rate render loop and the surface it draws on

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_poller::{Shutdown, ShutdownReason};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};
use vehicle_state::{Snapshot, VehicleState};

/// Something the dashboard can be drawn on
pub trait RenderSurface {
    /// Draw one frame
    fn draw(&mut self, snapshot: &Snapshot) -> io::Result<()>;

    /// Whether the operator asked to quit since the last frame
    fn quit_requested(&mut self) -> bool {
        false
    }

    /// Release the surface. Called once during shutdown.
    fn teardown(&mut self);
}

/// Reads the vehicle state once per tick and hands it to a surface
pub struct RenderLoop {
    state: Arc<VehicleState>,
    period: Duration,
}

impl RenderLoop {
    pub fn new(state: Arc<VehicleState>, refresh_hz: u32) -> Self {
        Self {
            state,
            period: Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64),
        }
    }

    /// Draw until `shutdown` fires.
    ///
    /// A quit request raises [`ShutdownReason::OperatorQuit`], a draw error
    /// raises [`ShutdownReason::SurfaceFailed`].
    pub async fn run<S: RenderSurface + ?Sized>(
        &self,
        surface: &mut S,
        shutdown: &Shutdown,
    ) -> ShutdownReason {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames: u64 = 0;

        loop {
            tokio::select! {
                biased;
                reason = shutdown.wait() => {
                    debug!("Render loop stopped after {} frames", frames);
                    return reason;
                }
                _ = ticker.tick() => {}
            }

            if surface.quit_requested() {
                shutdown.trigger(ShutdownReason::OperatorQuit);
                continue;
            }

            let snapshot = self.state.snapshot();
            if let Err(e) = surface.draw(&snapshot) {
                error!("Render surface failed: {}", e);
                shutdown.trigger(ShutdownReason::SurfaceFailed);
                continue;
            }
            frames += 1;
        }
    }
}

/// Single status line on a terminal.
///
/// A line reading `q` or `quit` on stdin requests quit.
pub struct ConsoleSurface<W: Write> {
    out: W,
    last: Option<Snapshot>,
    quit: Arc<AtomicBool>,
    torn_down: bool,
}

impl ConsoleSurface<io::Stdout> {
    /// Draw to stdout and watch stdin for a quit command
    pub fn stdout() -> Self {
        let quit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&quit);
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim(), "q" | "quit") {
                    flag.store(true, Ordering::Release);
                    break;
                }
            }
        });
        Self::new(io::stdout(), quit)
    }
}

impl<W: Write> ConsoleSurface<W> {
    pub fn new(out: W, quit: Arc<AtomicBool>) -> Self {
        Self {
            out,
            last: None,
            quit,
            torn_down: false,
        }
    }

    /// Text of one frame
    pub fn format(snapshot: &Snapshot) -> String {
        format!(
            "Speed {:>3} mph | RPM {:>5} | Load {:>3}%",
            snapshot.speed, snapshot.rpm, snapshot.load
        )
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RenderSurface for ConsoleSurface<W> {
    fn draw(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        // Redraw only on change
        if self.last.as_ref() == Some(snapshot) {
            return Ok(());
        }
        write!(self.out, "\r{}", Self::format(snapshot))?;
        self.out.flush()?;
        self.last = Some(*snapshot);
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    fn teardown(&mut self) {
        if std::mem::replace(&mut self.torn_down, true) {
            return;
        }
        if self.last.is_some() {
            let _ = writeln!(self.out);
        }
        let _ = self.out.flush();
    }
}
