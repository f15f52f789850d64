// Centralized constants for buildlineage to avoid magic numbers

/// Path under the registry base URL where the v1 layer API lives
pub const REGISTRY_API_PATH: &str = "pulp/docker/v1";

/// Prefix the registry puts in front of every repository id
pub const REGISTRY_REPO_PREFIX: &str = "redhat-";

/// Version component that keeps a leaf tag visible through trimming
pub const LATEST_VERSION: &str = "latest";

/// Build durations are reported in nanoseconds
pub const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Bytes in one mebibyte, used for upload size reporting
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Default throughput window in seconds (one hour)
pub const DEFAULT_THROUGHPUT_WINDOW_SECS: i64 = 60 * 60;

/// Timestamp layout used in the CSV metrics files
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// CSV files written by `stats --csv-dir`
pub const CURRENT_METRICS_FILE: &str = "metrics-current.csv";
pub const ARCHIVED_METRICS_FILE: &str = "metrics-archived.csv";
pub const CONCURRENT_METRICS_FILE: &str = "metrics-concurrent.csv";

/// Default tracing filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "buildlineage=info";

/// Annotation keys read from build records
pub mod annotations {
    pub const BASE_IMAGE_NAME: &str = "base-image-name";
    pub const REPOSITORIES: &str = "repositories";
    pub const IMAGE_ID: &str = "image-id";
    pub const TAR_METADATA: &str = "tar_metadata";
    pub const PLUGINS_METADATA: &str = "plugins-metadata";
}
