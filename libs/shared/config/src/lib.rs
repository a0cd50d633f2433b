use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub scheduling: SchedulingPolicy,
}

/// Working-hours window, slot granularity and booking horizon.
///
/// These were process-wide constants in the legacy system; they are now
/// explicit configuration passed into the availability calculator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulingPolicy {
    /// First bookable hour of the day (inclusive).
    pub work_start_hour: u32,
    /// End of the working window (exclusive).
    pub work_end_hour: u32,
    /// Slot granularity in minutes. Must divide an hour evenly.
    pub slot_minutes: u32,
    /// How many days ahead patients can book.
    pub horizon_days: i64,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            work_start_hour: 9,
            work_end_hour: 17,
            slot_minutes: 30,
            horizon_days: 7,
        }
    }
}

impl SchedulingPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            work_start_hour: env_number("WORK_START_HOUR", defaults.work_start_hour),
            work_end_hour: env_number("WORK_END_HOUR", defaults.work_end_hour),
            slot_minutes: env_number("SLOT_MINUTES", defaults.slot_minutes),
            horizon_days: env_number("BOOKING_HORIZON_DAYS", defaults.horizon_days),
        }
    }

    pub fn slot_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.slot_minutes as i64)
    }

    pub fn is_valid(&self) -> bool {
        self.work_start_hour < self.work_end_hour
            && self.work_end_hour <= 24
            && self.slot_minutes > 0
            && 60 % self.slot_minutes == 0
            && self.horizon_days > 0
    }
}

fn env_number<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid number, using default", key);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            scheduling: SchedulingPolicy::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.scheduling.is_valid() {
            warn!("Scheduling policy is invalid, falling back to defaults");
            return Self {
                scheduling: SchedulingPolicy::default(),
                ..config
            };
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        assert!(SchedulingPolicy::default().is_valid());
    }

    #[test]
    fn rejects_inverted_working_window() {
        let policy = SchedulingPolicy {
            work_start_hour: 17,
            work_end_hour: 9,
            ..SchedulingPolicy::default()
        };
        assert!(!policy.is_valid());
    }

    #[test]
    fn rejects_slot_size_that_does_not_divide_an_hour() {
        let policy = SchedulingPolicy {
            slot_minutes: 45,
            ..SchedulingPolicy::default()
        };
        assert!(!policy.is_valid());
    }
}
