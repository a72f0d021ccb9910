//! Configuration file support for wikisnap.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `WIKISNAP_`, sections separated by
//!    `__`, e.g., `WIKISNAP_CRAWL__BASE_URL`)
//! 3. Config file (~/.config/wikisnap/config.toml or ./wikisnap.toml)
//! 4. Built-in defaults
//!
//! The data directory defaults to `~/.local/share/wikisnap` on Linux if not
//! explicitly configured.
//!
//! Example config file:
//! ```toml
//! [api]
//! endpoint = "https://apiv2.crom.avn.sh/graphql"
//! timeout_secs = 30
//!
//! [crawl]
//! base_url = "http://scp-wiki.wikidot.com/"
//! page_batch_size = 10
//! vote_batch_size = 100
//! checkpoint_interval = 100
//! checkpoints_kept = 3
//! incremental = true
//! vote_retention_days = 30
//!
//! [rate_limit]
//! requests_per_second = 2.0
//! point_budget = 300000
//! window_secs = 300
//!
//! [retry]
//! max_rate_limit_retries = 5
//! max_other_retries = 3
//!
//! [output]
//! data_dir = "/var/lib/wikisnap"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use wikisnap::api::DEFAULT_ENDPOINT;
use wikisnap::rate_limit::RateLimitConfig;
use wikisnap::retry::{ErrorPolicyConfig, RetryConfig};
use wikisnap::sync::{
    DEFAULT_BASE_URL, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CHECKPOINTS_KEPT,
    DEFAULT_PAGE_BATCH_SIZE, DEFAULT_VOTE_BATCH_SIZE, DEFAULT_VOTE_RETENTION_DAYS, SyncOptions,
};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream API configuration.
    pub api: ApiConfig,
    /// What to crawl and how.
    pub crawl: CrawlConfig,
    /// Request pacing.
    pub rate_limit: RateLimitSection,
    /// Failure budgets.
    pub retry: RetrySection,
    /// Where results go.
    pub output: OutputConfig,
}

/// Upstream API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// GraphQL endpoint URL.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
            user_agent: concat!("wikisnap/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Crawl configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// URL prefix selecting the wiki's pages.
    pub base_url: String,
    pub page_batch_size: u32,
    pub vote_batch_size: u32,
    /// Pages processed between checkpoint saves.
    pub checkpoint_interval: usize,
    /// Checkpoint files kept per stream.
    pub checkpoints_kept: usize,
    /// Skip unchanged pages using the recorded vote history.
    pub incremental: bool,
    /// Vote snapshots older than this many days trigger a full re-fetch.
    pub vote_retention_days: i64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_batch_size: DEFAULT_PAGE_BATCH_SIZE,
            vote_batch_size: DEFAULT_VOTE_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            checkpoints_kept: DEFAULT_CHECKPOINTS_KEPT,
            incremental: true,
            vote_retention_days: DEFAULT_VOTE_RETENTION_DAYS,
        }
    }
}

/// Rate limit configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Target request rate; 0 disables the baseline delay.
    pub requests_per_second: f64,
    /// Points allowed per window.
    pub point_budget: u64,
    pub window_secs: u64,
    pub minimal_delay_ms: u64,
    pub moderate_delay_ms: u64,
    pub large_delay_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let lib = RateLimitConfig::default();
        Self {
            requests_per_second: lib.requests_per_second,
            point_budget: lib.point_budget,
            window_secs: lib.window.as_secs(),
            minimal_delay_ms: duration_ms(lib.minimal_delay),
            moderate_delay_ms: duration_ms(lib.moderate_delay),
            large_delay_ms: duration_ms(lib.large_delay),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_rate_limit_retries: u32,
    pub max_other_retries: u32,
    /// Minimum wait after a rate-limit response.
    pub rate_limit_backoff_secs: u64,
    /// First backoff step for other errors.
    pub other_backoff_ms: u64,
    /// Backoff ceiling for other errors.
    pub max_backoff_ms: u64,
    /// Rate-limit hits older than this are forgiven.
    pub amnesty_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let lib = ErrorPolicyConfig::default();
        Self {
            max_rate_limit_retries: lib.max_rate_limit_retries,
            max_other_retries: lib.max_other_retries,
            rate_limit_backoff_secs: lib.rate_limit_backoff.as_secs(),
            other_backoff_ms: duration_ms(lib.other_backoff.min_delay),
            max_backoff_ms: duration_ms(lib.other_backoff.max_delay),
            amnesty_secs: lib.amnesty_window.as_secs(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root for checkpoints, snapshots and vote history.
    pub data_dir: Option<PathBuf>,
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// `WIKISNAP_` prefixed variables, `__` between section and key.
fn environment() -> Environment {
    Environment::with_prefix("WIKISNAP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/wikisnap/config.toml)
    /// 3. Local config file (./wikisnap.toml)
    /// 4. Environment variables with WIKISNAP_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Local config file (higher priority than XDG)
        let local_config = PathBuf::from("wikisnap.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./wikisnap.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., WIKISNAP_CRAWL__BASE_URL -> crawl.base_url
        builder = builder.add_source(environment());

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the data directory, falling back to the platform data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.output
            .data_dir
            .clone()
            .or_else(Self::default_data_dir)
            .unwrap_or_else(|| PathBuf::from("wikisnap-data"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Convert into the library's run options.
    pub fn sync_options(&self) -> SyncOptions {
        let rate = &self.rate_limit;
        let retry = &self.retry;
        SyncOptions {
            base_url: self.crawl.base_url.clone(),
            page_batch_size: self.crawl.page_batch_size,
            vote_batch_size: self.crawl.vote_batch_size,
            checkpoint_interval: self.crawl.checkpoint_interval.max(1),
            checkpoints_kept: self.crawl.checkpoints_kept.max(1),
            incremental: self.crawl.incremental,
            vote_retention: chrono::Duration::days(self.crawl.vote_retention_days),
            rate_limit: RateLimitConfig {
                requests_per_second: rate.requests_per_second,
                point_budget: rate.point_budget,
                window: Duration::from_secs(rate.window_secs),
                minimal_delay: Duration::from_millis(rate.minimal_delay_ms),
                moderate_delay: Duration::from_millis(rate.moderate_delay_ms),
                large_delay: Duration::from_millis(rate.large_delay_ms),
            },
            error_policy: ErrorPolicyConfig {
                max_rate_limit_retries: retry.max_rate_limit_retries,
                max_other_retries: retry.max_other_retries,
                rate_limit_backoff: Duration::from_secs(retry.rate_limit_backoff_secs),
                other_backoff: RetryConfig::new(
                    Duration::from_millis(retry.other_backoff_ms),
                    Duration::from_millis(retry.max_backoff_ms),
                    retry.max_other_retries as usize,
                ),
                amnesty_window: Duration::from_secs(retry.amnesty_secs),
            },
            data_dir: self.data_dir(),
        }
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "wikisnap").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default data directory path.
    pub fn default_data_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "wikisnap").map(|dirs| dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_toml(toml_content: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(toml_content, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config_matches_library_defaults() {
        let options = Config::default().sync_options();
        let lib = SyncOptions::default();

        assert_eq!(options.base_url, lib.base_url);
        assert_eq!(options.page_batch_size, lib.page_batch_size);
        assert_eq!(options.vote_batch_size, lib.vote_batch_size);
        assert_eq!(options.checkpoint_interval, lib.checkpoint_interval);
        assert_eq!(options.checkpoints_kept, lib.checkpoints_kept);
        assert_eq!(options.incremental, lib.incremental);
        assert_eq!(options.vote_retention, lib.vote_retention);
        assert_eq!(options.rate_limit, lib.rate_limit);
        assert_eq!(
            options.error_policy.max_rate_limit_retries,
            lib.error_policy.max_rate_limit_retries
        );
        assert_eq!(options.error_policy.amnesty_window, lib.error_policy.amnesty_window);
    }

    #[test]
    fn test_full_config_parsing() {
        let config = from_toml(
            r#"
            [api]
            endpoint = "http://localhost:4000/graphql"
            timeout_secs = 5

            [crawl]
            base_url = "http://wanderers-library.wikidot.com/"
            page_batch_size = 25
            incremental = false
            vote_retention_days = 7

            [rate_limit]
            requests_per_second = 0.5
            point_budget = 1000
            large_delay_ms = 30000

            [retry]
            max_other_retries = 1
            other_backoff_ms = 250

            [output]
            data_dir = "/tmp/wikisnap-test"
        "#,
        );

        assert_eq!(config.api.endpoint, "http://localhost:4000/graphql");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));

        let options = config.sync_options();
        assert_eq!(options.base_url, "http://wanderers-library.wikidot.com/");
        assert_eq!(options.page_batch_size, 25);
        assert_eq!(options.vote_batch_size, DEFAULT_VOTE_BATCH_SIZE);
        assert!(!options.incremental);
        assert_eq!(options.vote_retention, chrono::Duration::days(7));
        assert_eq!(options.rate_limit.point_budget, 1000);
        assert_eq!(options.rate_limit.large_delay, Duration::from_secs(30));
        assert_eq!(options.error_policy.max_other_retries, 1);
        assert_eq!(
            options.error_policy.other_backoff.min_delay,
            Duration::from_millis(250)
        );
        assert_eq!(options.data_dir, PathBuf::from("/tmp/wikisnap-test"));
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let vars: HashMap<String, String> = [
            ("WIKISNAP_CRAWL__BASE_URL", "http://example.wikidot.com/"),
            ("WIKISNAP_CRAWL__PAGE_BATCH_SIZE", "50"),
            ("WIKISNAP_RATE_LIMIT__POINT_BUDGET", "1234"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config: Config = ConfigBuilder::builder()
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.crawl.base_url, "http://example.wikidot.com/");
        assert_eq!(config.crawl.page_batch_size, 50);
        assert_eq!(config.rate_limit.point_budget, 1234);
    }

    #[test]
    fn test_config_merging_order() {
        let base_toml = r#"
            [crawl]
            page_batch_size = 10
            vote_batch_size = 100
        "#;
        let override_toml = r#"
            [crawl]
            page_batch_size = 20
        "#;

        let config: Config = ConfigBuilder::builder()
            .add_source(config::File::from_str(base_toml, FileFormat::Toml))
            .add_source(config::File::from_str(override_toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.crawl.page_batch_size, 20);
        assert_eq!(config.crawl.vote_batch_size, 100);
    }

    #[test]
    fn test_zero_checkpoint_interval_is_clamped() {
        let config = from_toml(
            r#"
            [crawl]
            checkpoint_interval = 0
            checkpoints_kept = 0
        "#,
        );
        let options = config.sync_options();
        assert_eq!(options.checkpoint_interval, 1);
        assert_eq!(options.checkpoints_kept, 1);
    }

    #[test]
    fn test_data_dir_defaults_to_project_dir() {
        let config = Config::default();
        let dir = config.data_dir();
        assert!(dir.to_string_lossy().contains("wikisnap"));
    }

    #[test]
    fn test_config_invalid_toml() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str("[crawl\nbase_url = 1", FileFormat::Toml))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let config = from_toml(
            r#"
            [crawl]
            page_batch_size = 15
            unknown_field = "should be ignored"
        "#,
        );
        assert_eq!(config.crawl.page_batch_size, 15);
    }
}
