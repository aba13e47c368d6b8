use std::path::PathBuf;

use serde::Deserialize;

/// Persisted defaults, read from `$XDG_CONFIG_HOME/psx/config.toml` (or the
/// platform equivalent via `dirs`) before CLI flags are applied on top.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub bios: Option<PathBuf>,
    pub log_level: Option<String>,
    pub tick_batch_size: Option<u32>,
}

pub fn load() -> FileConfig {
    let Some(path) = config_path() else {
        return FileConfig::default();
    };
    let Ok(text) = std::fs::read_to_string(&path) else {
        return FileConfig::default();
    };
    match toml::from_str(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ignoring malformed config at {}: {e}", path.display());
            FileConfig::default()
        }
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("psx").join("config.toml"))
}
