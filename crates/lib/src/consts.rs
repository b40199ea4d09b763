pub const APP_NAME: &str = "aggon";

/// Number of hex characters kept for short hashes (descriptor and state hashes).
pub const SHORT_HASH_LEN: usize = 16;

/// Schema identifier written into new declarative configs.
pub const CONFIG_SCHEMA: &str = "aggon/v2";

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "aggon-declarative.json";

/// Environment variable that relocates all state (store and generations).
pub const ROOT_ENV: &str = "AGGON_ROOT";
