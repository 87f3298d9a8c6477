//! Unit tests for core kernel modules
//!
//! These run on the host (not the embedded target) to verify the pure
//! algorithmic layers.

#[cfg(test)]
mod prio_tests {
    use osmos::config::CFG_PRIO_LEVELS;
    use osmos::prio::{idx_to_prio, prio_to_idx, PrioTable};
    use osmos::types::{THREAD_PRIO_MAX, THREAD_PRIO_MIN};

    #[test]
    fn test_empty_table() {
        let table = PrioTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_highest(), (CFG_PRIO_LEVELS - 1) as u8);
    }

    #[test]
    fn test_single_priority() {
        let mut table = PrioTable::new();

        table.insert(5);
        assert!(!table.is_empty());
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.get_highest(), 5);

        table.remove(5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_multiple_priorities() {
        let mut table = PrioTable::new();

        table.insert(20);
        table.insert(5);
        table.insert(10);
        table.insert(1);
        table.insert(15);

        assert_eq!(table.get_highest(), 1);

        table.remove(1);
        assert_eq!(table.get_highest(), 5);

        table.remove(5);
        assert_eq!(table.get_highest(), 10);

        table.remove(10);
        assert_eq!(table.get_highest(), 15);

        table.remove(15);
        assert_eq!(table.get_highest(), 20);

        table.remove(20);
        assert!(table.is_empty());
    }

    #[test]
    fn test_word_boundary_priorities() {
        let mut table = PrioTable::new();

        table.insert(31);
        assert_eq!(table.get_highest(), 31);

        table.insert(32);
        assert_eq!(table.get_highest(), 31);

        table.remove(31);
        assert_eq!(table.get_highest(), 32);

        table.insert(1);
        assert_eq!(table.get_highest(), 1);

        table.insert(63);
        table.remove(1);
        table.remove(32);
        assert_eq!(table.get_highest(), 63);
    }

    #[test]
    fn test_all_priorities() {
        let mut table = PrioTable::new();

        for i in 0..CFG_PRIO_LEVELS {
            table.insert(i as u8);
        }

        for i in 0..CFG_PRIO_LEVELS {
            assert_eq!(table.get_highest(), i as u8);
            table.remove(i as u8);
        }

        assert!(table.is_empty());
    }

    #[test]
    fn test_app_priority_mapping() {
        // the application scale is symmetric around normal
        assert_eq!(prio_to_idx(0).unwrap(), 31);

        // higher application priority -> lower (more urgent) index
        assert!(prio_to_idx(THREAD_PRIO_MAX).unwrap() < prio_to_idx(0).unwrap());
        assert!(prio_to_idx(0).unwrap() < prio_to_idx(THREAD_PRIO_MIN).unwrap());

        // the extremes stay clear of the reserved timer and idle slots
        assert!(prio_to_idx(THREAD_PRIO_MAX).unwrap() > 0);
        assert!((prio_to_idx(THREAD_PRIO_MIN).unwrap() as usize) < CFG_PRIO_LEVELS - 1);

        // out-of-range is rejected
        assert!(prio_to_idx(THREAD_PRIO_MAX + 1).is_err());
        assert!(prio_to_idx(THREAD_PRIO_MIN - 1).is_err());

        for p in THREAD_PRIO_MIN..=THREAD_PRIO_MAX {
            assert_eq!(idx_to_prio(prio_to_idx(p).unwrap()), p);
        }
    }
}

#[cfg(test)]
mod error_tests {
    use osmos::error::{OsError, OsResult};

    #[test]
    fn test_error_variants() {
        assert_eq!(OsError::Timeout, OsError::Timeout);
        assert_ne!(OsError::Timeout, OsError::Canceled);

        let r: OsResult<()> = Err(OsError::NotPermitted);
        assert!(r.is_err());
    }

    #[test]
    fn test_error_debug() {
        // errors can be formatted for diagnostics
        let err = OsError::IsrForbidden;
        let _ = format!("{:?}", err);
    }
}

#[cfg(test)]
mod types_tests {
    use osmos::types::*;

    #[test]
    fn test_thread_state_enum() {
        let state = OsThreadState::Ready;
        assert_eq!(state, OsThreadState::Ready);
        assert_ne!(state, OsThreadState::Blocked);
    }

    #[test]
    fn test_flag_mode_any() {
        assert_eq!(FlagMode::Any.matched(0b1010, 0b0010), Some(0b0010));
        assert_eq!(FlagMode::Any.matched(0b1010, 0b0110), Some(0b0010));
        assert_eq!(FlagMode::Any.matched(0b1010, 0b0101), None);
        assert_eq!(FlagMode::Any.matched(0, 0b1111), None);
    }

    #[test]
    fn test_flag_mode_all() {
        assert_eq!(FlagMode::All.matched(0b1110, 0b0110), Some(0b0110));
        assert_eq!(FlagMode::All.matched(0b1010, 0b0110), None);
        assert_eq!(FlagMode::All.matched(0b1111, 0b1111), Some(0b1111));
    }

    #[test]
    fn test_reserved_signal_bits_disjoint() {
        assert_eq!(SIG_WAKEUP & SIG_TIMER_TICK, 0);
    }
}

#[cfg(test)]
mod clock_tests {
    use osmos::clock::{micros_from_ticks, ticks_from_micros, ticks_from_millis};

    #[test]
    fn test_durations_never_shorten() {
        // any nonzero duration costs at least one tick
        assert_eq!(ticks_from_micros(1), 1);
        assert_eq!(ticks_from_micros(1_000), 1);
        assert_eq!(ticks_from_micros(1_001), 2);
        assert_eq!(ticks_from_millis(1), 1);
        assert_eq!(ticks_from_millis(1_500), 1_500);
    }

    #[test]
    fn test_tick_round_trip() {
        for t in [0u64, 1, 100, 86_400_000] {
            assert_eq!(ticks_from_micros(micros_from_ticks(t)), t);
        }
    }
}

#[cfg(test)]
mod config_tests {
    use osmos::config::*;

    #[test]
    fn test_config_values() {
        assert!(CFG_PRIO_LEVELS >= 8, "Need at least 8 priority levels");
        assert!(CFG_PRIO_LEVELS <= 256, "Too many priority levels");

        assert!(CFG_STK_SIZE_MIN >= 32, "Stack too small");

        assert!(CFG_TICK_RATE_HZ >= 10, "Tick rate too slow");
        assert!(CFG_TICK_RATE_HZ <= 10_000, "Tick rate too fast");

        // idle must be the least urgent slot, the timer service the most
        assert_eq!(CFG_PRIO_IDLE, (CFG_PRIO_LEVELS - 1) as u8);
        assert_eq!(CFG_PRIO_TIMER, 0);

        assert!(CFG_MUTEX_CHAIN_MAX >= 2);
    }
}
