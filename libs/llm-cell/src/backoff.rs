use std::time::Duration;

/// Dedicated retry schedules per upstream call family. All delays are logged
/// by the callers before sleeping.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    base_secs: u64,
    factor: u64,
    max_attempts: u32,
}

impl BackoffSchedule {
    /// Availability and chat completions: 1s, 2s, 4s.
    pub fn chat() -> Self {
        Self {
            base_secs: 1,
            factor: 2,
            max_attempts: 3,
        }
    }

    /// Transcription calls: 2s, 4s, 8s.
    pub fn transcription() -> Self {
        Self {
            base_secs: 2,
            factor: 2,
            max_attempts: 3,
        }
    }

    /// Cross-provider comparison / insight mining: 5s, 10s, 20s.
    pub fn insight() -> Self {
        Self {
            base_secs: 5,
            factor: 2,
            max_attempts: 3,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after `attempt` (0-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_secs * self.factor.pow(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_schedule_doubles_from_one_second() {
        let schedule = BackoffSchedule::chat();
        assert_eq!(schedule.delay_for(0), Duration::from_secs(1));
        assert_eq!(schedule.delay_for(1), Duration::from_secs(2));
        assert_eq!(schedule.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn insight_schedule_is_slower() {
        let schedule = BackoffSchedule::insight();
        assert_eq!(schedule.delay_for(0), Duration::from_secs(5));
        assert_eq!(schedule.delay_for(2), Duration::from_secs(20));
    }
}
