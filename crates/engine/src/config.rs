//! Engine configuration.

use std::time::Duration;

use edumesh_core::{BuildVersion, Mode};

/// Tunables for the runner, dispatcher, and seeding protocols.
///
/// The constructors bake in the production defaults; tests override the
/// handful of fields they care about.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: Mode,
    pub version: BuildVersion,
    /// HS256 secret shared by hub and satellites for signed tokens.
    pub secret: String,

    /// Safety-net poll driving the runner and dispatcher between wakes.
    pub poll_interval: Duration,
    /// Deadline raced against every task handler.
    pub task_timeout: Duration,
    /// Claims after which a timing-out task goes terminal TIMEOUT.
    pub max_attempts: u32,
    /// Base delay before a timed-out task becomes claimable again.
    pub retry_backoff: Duration,

    /// Delivery failures are logged at error level only every Nth attempt.
    pub dispatch_log_every: u32,
    /// Bound on every outbound HTTP call.
    pub request_timeout: Duration,

    /// Accepted absolute sender/receiver clock difference.
    pub max_clock_skew_ms: i64,

    /// Content ids per signed content token.
    pub content_chunk_size: usize,
    /// Pause between sequential content-chunk fetches during seeding.
    pub content_fetch_delay: Duration,
    /// Lifetime of the uploaded seed blob and its access token.
    pub seed_blob_ttl: Duration,
    /// A completed seeding blocks re-seeding for this long unless forced.
    pub reseed_window_hours: i64,
    /// Seed exports only carry documents newer than this.
    pub retention_days: i64,

    /// Hub base URL. Required in satellite mode.
    pub hub_url: Option<String>,
    /// Shared api key for the hub channel. Required in satellite mode.
    pub hub_api_key: Option<String>,
}

impl EngineConfig {
    fn defaults(mode: Mode, version: BuildVersion, secret: impl Into<String>) -> Self {
        Self {
            mode,
            version,
            secret: secret.into(),
            poll_interval: Duration::from_secs(30),
            task_timeout: Duration::from_secs(120),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(60),
            dispatch_log_every: 5,
            request_timeout: Duration::from_secs(30),
            max_clock_skew_ms: 3000,
            content_chunk_size: 20,
            content_fetch_delay: Duration::from_millis(200),
            seed_blob_ttl: Duration::from_secs(3600),
            reseed_window_hours: 24,
            retention_days: 3 * 365,
            hub_url: None,
            hub_api_key: None,
        }
    }

    pub fn hub(version: BuildVersion, secret: impl Into<String>) -> Self {
        Self::defaults(Mode::Hub, version, secret)
    }

    pub fn satellite(
        version: BuildVersion,
        secret: impl Into<String>,
        hub_url: impl Into<String>,
        hub_api_key: impl Into<String>,
    ) -> Self {
        let mut config = Self::defaults(Mode::Satellite, version, secret);
        config.hub_url = Some(hub_url.into());
        config.hub_api_key = Some(hub_api_key.into());
        config
    }
}
