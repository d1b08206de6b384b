// src/infra/paths.rs — Config path resolution
//
// OPENKOI_RLM_HOME overrides everything. Otherwise config lives in ~/.openkoi-rlm/.

use std::path::PathBuf;

/// Returns the OPENKOI_RLM_HOME override, if set.
fn rlm_home() -> Option<PathBuf> {
    std::env::var_os("OPENKOI_RLM_HOME").map(PathBuf::from)
}

/// Configuration directory: $OPENKOI_RLM_HOME/ or ~/.openkoi-rlm/
pub fn config_dir() -> Option<PathBuf> {
    if let Some(home) = rlm_home() {
        return Some(home);
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".openkoi-rlm"))
}

/// Main config file, if a home directory can be determined.
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
