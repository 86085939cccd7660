use std::{env, path::PathBuf, time::Duration};

/// Process-level configuration read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub functions_url: Option<String>,
    pub debug: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("LEARNFLOW_DATA_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".learnflow"));
        let functions_url = lookup("LEARNFLOW_FUNCTIONS_URL").filter(|value| !value.trim().is_empty());
        let debug = lookup("LEARNFLOW_DEBUG")
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);

        Self {
            data_dir,
            functions_url,
            debug,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("learnflow.sqlite3")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn sync_config(&self) -> SyncConfig {
        if self.debug {
            SyncConfig {
                retry_interval: Duration::from_secs(5),
                retry_jitter: Duration::from_millis(200),
            }
        } else {
            SyncConfig::default()
        }
    }
}

/// Timings for caption surface discovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub retry_step: Duration,
    pub max_retry_delay: Duration,
    pub selection_debounce: Duration,
    pub tooltip_lifetime: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 60,
            retry_step: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(5),
            selection_debounce: Duration::from_millis(300),
            tooltip_lifetime: Duration::from_secs(3),
        }
    }
}

impl DetectionConfig {
    /// Delay before detection attempt `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_step
            .saturating_mul(attempt)
            .min(self.max_retry_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    pub retry_interval: Duration,
    pub retry_jitter: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            retry_jitter: Duration::from_secs(2),
        }
    }
}

/// Caller-side retry for reading settings before the background side is up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsRetry {
    pub attempts: u32,
    pub step: Duration,
    pub fallback_language: &'static str,
}

impl Default for SettingsRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            step: Duration::from_millis(1000),
            fallback_language: crate::settings::DEFAULT_TARGET_LANGUAGE,
        }
    }
}
