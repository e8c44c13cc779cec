//! Environment-driven configuration

use std::env;
use std::time::Duration;

/// Server and coordination-loop configuration, populated from environment
/// variables with documented defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub save_path: String,
    pub tmp_path: String,

    /// Worker heartbeat TTL: a running job with no ping in this long is reclaimed.
    pub job_ping_ttl: Duration,
    /// A paused job auto-restarts after this long.
    pub job_paused_ttl: Duration,
    /// A running job auto-restarts after this long regardless of pings.
    pub job_running_ttl: Duration,

    /// Max `generate_vector`/`minimize` jobs in flight per channel.
    pub channel_max_jobs: u32,
    /// Default minimization attempts for a newly created channel.
    pub channel_default_attempts: u32,
    /// Control loop tick period.
    pub update_interval: Duration,

    pub upload_token_ttl: Duration,
    pub download_token_ttl: Duration,

    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: "coordinator.db".to_string(),
            save_path: "/data/files".to_string(),
            tmp_path: "/data/tmp".to_string(),
            job_ping_ttl: Duration::from_secs(300),
            job_paused_ttl: Duration::from_secs(86_400),
            job_running_ttl: Duration::from_secs(2_592_000),
            channel_max_jobs: 5,
            channel_default_attempts: 100,
            update_interval: Duration::from_secs(5),
            upload_token_ttl: Duration::from_secs(300),
            download_token_ttl: Duration::from_secs(300),
            access_token_ttl: Duration::from_secs(60 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 86_400),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: env::var("COORDINATOR_HOST").unwrap_or(defaults.host),
            port: env::var("COORDINATOR_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            db_path: env::var("COORDINATOR_DB").unwrap_or(defaults.db_path),
            save_path: env::var("COORDINATOR_SAVE_PATH").unwrap_or(defaults.save_path),
            tmp_path: env::var("COORDINATOR_TMP_PATH").unwrap_or(defaults.tmp_path),
            job_ping_ttl: env_secs("COORDINATOR_JOB_PING_TTL", defaults.job_ping_ttl),
            job_paused_ttl: env_secs("COORDINATOR_JOB_PAUSED_TTL", defaults.job_paused_ttl),
            job_running_ttl: env_secs("COORDINATOR_JOB_RUNNING_TTL", defaults.job_running_ttl),
            channel_max_jobs: env::var("COORDINATOR_CHANNEL_MAX_JOBS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.channel_max_jobs),
            channel_default_attempts: env::var("COORDINATOR_CHANNEL_DEFAULT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.channel_default_attempts),
            update_interval: env_secs("COORDINATOR_UPDATE_INTERVAL", defaults.update_interval),
            upload_token_ttl: env_secs("COORDINATOR_UPLOAD_TOKEN_TTL", defaults.upload_token_ttl),
            download_token_ttl: env_secs(
                "COORDINATOR_DOWNLOAD_TOKEN_TTL",
                defaults.download_token_ttl,
            ),
            access_token_ttl: defaults.access_token_ttl,
            refresh_token_ttl: defaults.refresh_token_ttl,
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_self_consistent() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(config.job_ping_ttl < config.job_running_ttl);
        assert!(config.access_token_ttl < config.refresh_token_ttl);
    }

    #[test]
    fn env_secs_falls_back_to_default_when_unset_or_unparseable() {
        let default = Duration::from_secs(42);
        assert_eq!(env_secs("COORDINATOR_TEST_DOES_NOT_EXIST", default), default);
    }
}
