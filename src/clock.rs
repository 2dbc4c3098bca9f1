//! Source of "today" for date checks

use std::sync::Mutex;

use crate::models::SlotDate;

pub trait Clock: Send + Sync {
    fn today(&self) -> SlotDate;
}

/// Local calendar date of the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> SlotDate {
        SlotDate::new(chrono::Local::now().date_naive())
    }
}

/// A clock pinned to a date that tests can move
#[derive(Debug)]
pub struct FixedClock {
    today: Mutex<SlotDate>,
}

impl FixedClock {
    pub fn new(today: SlotDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: SlotDate) {
        *self.today.lock().unwrap_or_else(|e| e.into_inner()) = today;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> SlotDate {
        *self.today.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_moves() {
        let clock = FixedClock::new(SlotDate::from_ymd(2025, 3, 1).unwrap());
        assert_eq!(clock.today().to_string(), "2025.03.01");

        clock.set(SlotDate::from_ymd(2025, 3, 10).unwrap());
        assert_eq!(clock.today().to_string(), "2025.03.10");
    }
}
