/// Default configuration constants used across the crate.

/// Default Infisical endpoint.
pub const DEFAULT_SITE_URL: &str = "https://app.infisical.com";

/// Default Infisical environment slug.
pub const DEFAULT_ENVIRONMENT: &str = "Development";

/// Default folder path.
pub const DEFAULT_SECRET_PATH: &str = "/";

/// Default wait for a single fetch attempt (5 seconds).
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 5_000;

/// Upper bound for the reload interval and the load timeout (365 days).
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1_000;

/// Minimum duration of a failed `load()` call (5 seconds).
pub const MIN_DELAY_FOR_UNHANDLED_FAILURE_MS: u64 = 5_000;

/// Capacity of the provider event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Access tokens are refreshed this long before they expire.
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 30;

/// Environment variable prefix for option overrides.
pub const ENV_PREFIX: &str = "INFISICAL_";
