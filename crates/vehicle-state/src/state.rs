//! Lock-Free Vehicle State

use crate::Snapshot;
use std::sync::atomic::{AtomicU32, Ordering};

/// Highest engine load the state will hold (%)
const MAX_LOAD: u32 = 100;

/// Most recent display values, one atomic per field.
///
/// Fields update independently: a snapshot never sees a torn field, but
/// may combine a fresh speed with an older RPM.
#[derive(Debug, Default)]
pub struct VehicleState {
    speed: AtomicU32,
    rpm: AtomicU32,
    load: AtomicU32,
}

impl VehicleState {
    /// Create a state with every field at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new display speed (mph)
    pub fn update_speed(&self, speed: u32) {
        self.speed.store(speed, Ordering::Release);
    }

    /// Store a new engine RPM
    pub fn update_rpm(&self, rpm: u32) {
        self.rpm.store(rpm, Ordering::Release);
    }

    /// Store a new engine load, clamped to 100%
    pub fn update_load(&self, load: u32) {
        self.load.store(load.min(MAX_LOAD), Ordering::Release);
    }

    /// Read every field
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            speed: self.speed.load(Ordering::Acquire),
            rpm: self.rpm.load(Ordering::Acquire),
            load: self.load.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{to_display_speed, to_int, SpeedUnit};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(VehicleState::new().snapshot(), Snapshot::default());
    }

    #[test]
    fn test_updates_are_field_granular() {
        let state = VehicleState::new();
        state.update_rpm(3200);
        state.update_load(45);

        state.update_speed(to_display_speed(100.0, SpeedUnit::Kph));

        assert_eq!(
            state.snapshot(),
            Snapshot {
                speed: 62,
                rpm: 3200,
                load: 45,
            }
        );
    }

    #[test]
    fn test_load_is_clamped() {
        let state = VehicleState::new();
        state.update_load(130);
        assert_eq!(state.snapshot().load, 100);
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        // Every written value has identical halves, so a torn read would show up
        fn pattern(i: u32) -> u32 {
            let half = i & 0xFFFF;
            (half << 16) | half
        }
        fn untorn(value: u32) -> bool {
            value >> 16 == value & 0xFFFF
        }

        let state = Arc::new(VehicleState::new());
        let mut writers = Vec::new();
        for field in 0..3 {
            for _ in 0..2 {
                let state = Arc::clone(&state);
                writers.push(thread::spawn(move || {
                    for i in 0..20_000 {
                        match field {
                            0 => state.update_speed(pattern(i)),
                            1 => state.update_rpm(pattern(i)),
                            // Load is clamped, so it can only carry small patterns
                            _ => state.update_load(i % 101),
                        }
                    }
                }));
            }
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        let snapshot = state.snapshot();
                        assert!(untorn(snapshot.speed));
                        assert!(untorn(snapshot.rpm));
                        assert!(snapshot.load <= 100);
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_update_then_snapshot(kph in 0.0f64..255.0, rpm in 0.0f64..16383.75, load in 0u32..=100) {
            let state = VehicleState::new();
            state.update_rpm(to_int(rpm));
            state.update_load(load);

            state.update_speed(to_display_speed(kph, SpeedUnit::Kph));

            let snapshot = state.snapshot();
            prop_assert_eq!(snapshot.speed, to_display_speed(kph, SpeedUnit::Kph));
            prop_assert_eq!(snapshot.rpm, to_int(rpm));
            prop_assert_eq!(snapshot.load, load);
        }
    }
}
