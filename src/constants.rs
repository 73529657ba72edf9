use rand::Rng;

/// Expected database schema version
/// All databases must use this version for compatibility
pub const EXPECTED_DB_VERSION: &str = "1";

/// Default waveform resolution when the caller does not specify one
pub const DEFAULT_WAVEFORM_RESOLUTION: usize = 1000;

/// Caller-supplied waveform resolutions are clamped into this range
pub const MIN_WAVEFORM_RESOLUTION: usize = 100;
pub const MAX_WAVEFORM_RESOLUTION: usize = 5000;

/// Generate a unique suffix for storage object keys
/// Keeps keys collision-free when a recording is converted more than once
pub fn generate_object_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
