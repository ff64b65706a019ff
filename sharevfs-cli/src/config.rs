use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "~/.sharevfs/vfs.json";

/// `--config` wins, then `SHAREVFS_CONFIG`, then the per-user default.
pub fn get_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    let config_path = env::var("SHAREVFS_CONFIG").unwrap_or(DEFAULT_CONFIG_PATH.to_string());
    if let Some(rest) = config_path.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    }

    config_path.into()
}
