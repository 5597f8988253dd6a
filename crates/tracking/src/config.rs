use std::env;
use std::time::Duration;

use chrono_tz::Tz;

/// Tunables for a tracking session, read from the host environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub timezone: Tz,
    pub poll_interval: Duration,
    pub focus_zoom: u8,
    pub follow_selected: bool,
    pub unknown_plate: String,
    pub marker_color: String,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let timezone = env::var("TRACKING_TIMEZONE")
            .ok()
            .and_then(|value| value.parse::<Tz>().ok())
            .unwrap_or(chrono_tz::America::La_Paz);
        let poll_interval = Duration::from_secs(env_u64("TRACKING_POLL_INTERVAL_SECS", 15).max(1));
        let focus_zoom = u8::try_from(env_u64("TRACKING_FOCUS_ZOOM", 16)).unwrap_or(16);
        let follow_selected = env_bool("TRACKING_FOLLOW_SELECTED", false);
        let unknown_plate =
            env::var("TRACKING_UNKNOWN_PLATE").unwrap_or_else(|_| "Unknown".to_string());
        let marker_color =
            env::var("TRACKING_MARKER_COLOR").unwrap_or_else(|_| "#1e3a8a".to_string());

        Self {
            timezone,
            poll_interval,
            focus_zoom,
            follow_selected,
            unknown_plate,
            marker_color,
            reconnect: ReconnectPolicy::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::La_Paz,
            poll_interval: Duration::from_secs(15),
            focus_zoom: 16,
            follow_selected: false,
            unknown_plate: "Unknown".to_string(),
            marker_color: "#1e3a8a".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Reconnection schedule for the push channel. Attempts are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub delay_max: Duration,
    pub connect_timeout: Duration,
}

impl ReconnectPolicy {
    fn from_env() -> Self {
        Self {
            delay: Duration::from_millis(env_u64("TRACKING_RECONNECT_DELAY_MS", 1_000)),
            delay_max: Duration::from_millis(env_u64("TRACKING_RECONNECT_DELAY_MAX_MS", 5_000)),
            connect_timeout: Duration::from_millis(env_u64("TRACKING_CONNECT_TIMEOUT_MS", 10_000)),
        }
    }

    /// Delay before the given retry (1-based): doubles per attempt, capped at `delay_max`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.delay.saturating_mul(factor).min(self.delay_max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            delay_max: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|value| value.trim().parse::<u64>().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ReconnectPolicy;

    #[test]
    fn backoff_doubles_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn backoff_first_attempt() {
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(250),
            delay_max: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(5), Duration::from_secs(4));
    }
}
