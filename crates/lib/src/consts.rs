//! Crate-wide constants.

/// Application name, used for data directory names.
pub const APP_NAME: &str = "stratus";

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "STRATUS_HOME";

/// Number of hex characters kept from an artifact content digest.
pub const ARTIFACT_HASH_LEN: usize = 8;

/// Prefix of content-addressed artifact storage keys.
pub const STORAGE_KEY_PREFIX: &str = "source-";

/// Suffix of content-addressed artifact storage keys.
pub const STORAGE_KEY_SUFFIX: &str = ".zip";

/// Object pattern used when a trigger does not name one.
pub const DEFAULT_OBJECT_PATTERN: &str = "*.xlsx";

/// Event type used when a trigger does not name one.
pub const DEFAULT_EVENT_TYPE: &str = "google.cloud.storage.object.v1.finalized";

/// Version of the persisted state file format.
pub const STATE_VERSION: u32 = 1;
