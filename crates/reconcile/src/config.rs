//! Reconciler tunables, read from the environment with defaults.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Requeue delay after a transient failure or while resources become ready.
    pub short_wait: Duration,
    /// Requeue delay once everything is ready.
    pub poll_interval: Duration,
    /// Upper bound on a single reconcile pass.
    pub reconcile_timeout: Duration,
    pub workers: usize,
    pub queue_cap: usize,
    pub max_backoff: Duration,
    /// Validate composed resources with a server-side dry run before applying them.
    pub dry_run: bool,
    pub name_attempts: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            short_wait: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            reconcile_timeout: Duration::from_secs(120),
            workers: 4,
            queue_cap: 4096,
            max_backoff: Duration::from_secs(300),
            dry_run: false,
            name_attempts: conflux_compose::names::DEFAULT_ATTEMPTS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key).map(Duration::from_secs).unwrap_or(default)
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl ReconcilerConfig {
    /// Defaults overridden by `CONFLUX_*` variables. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            short_wait: env_secs("CONFLUX_SHORT_WAIT_SECS", d.short_wait),
            poll_interval: env_secs("CONFLUX_POLL_INTERVAL_SECS", d.poll_interval),
            reconcile_timeout: env_secs("CONFLUX_RECONCILE_TIMEOUT_SECS", d.reconcile_timeout),
            workers: env_parse::<usize>("CONFLUX_WORKERS").filter(|n| *n > 0).unwrap_or(d.workers),
            queue_cap: env_parse::<usize>("CONFLUX_QUEUE_CAP").filter(|n| *n > 0).unwrap_or(d.queue_cap),
            max_backoff: env_secs("CONFLUX_MAX_BACKOFF_SECS", d.max_backoff),
            dry_run: env_flag("CONFLUX_DRY_RUN").unwrap_or(d.dry_run),
            name_attempts: d.name_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("CONFLUX_SHORT_WAIT_SECS", "5");
        std::env::set_var("CONFLUX_WORKERS", "0");
        std::env::set_var("CONFLUX_DRY_RUN", "TRUE");
        let cfg = ReconcilerConfig::from_env();
        assert_eq!(cfg.short_wait, Duration::from_secs(5));
        assert_eq!(cfg.workers, 4, "zero workers is ignored");
        assert!(cfg.dry_run);
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        std::env::remove_var("CONFLUX_SHORT_WAIT_SECS");
        std::env::remove_var("CONFLUX_WORKERS");
        std::env::remove_var("CONFLUX_DRY_RUN");
    }
}
