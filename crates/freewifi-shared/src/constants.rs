/// Application name
pub const APP_NAME: &str = "freewifi";

/// Name of the remote collection holding network records
pub const NETWORKS_COLLECTION: &str = "networks";

/// Application id of the hosted store that owns the network records
pub const DEFAULT_APP_ID: &str = "d3669f6b-baf8-49dd-9fe9-d0adb08d4c76";

/// Every record starts with its submitter as the only reviewer
pub const INITIAL_REVIEWS: u32 = 1;

/// Accepted rating range (inclusive)
pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 5.0;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default buffer size of a standing query feed
pub const DEFAULT_FEED_CAPACITY: usize = 16;

/// Base URL of the hosted store's HTTP API
pub const DEFAULT_INSTANT_API_URI: &str = "https://api.instantdb.com";

/// How often a standing query re-reads the hosted store (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Per-request timeout against the hosted store (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
