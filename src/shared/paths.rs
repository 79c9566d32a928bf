use std::path::{Path, PathBuf};

const APP_DIR: &str = "gnome-v4l2";

/// Base storage directory following the XDG Base Directory Specification.
/// Returns `$XDG_DATA_HOME/gnome-v4l2` or `~/.local/share/gnome-v4l2`,
/// falling back to the working directory when neither can be resolved.
pub fn get_storage_dir() -> PathBuf {
    if let Some(xdg_data) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg_data).join(APP_DIR);
    }

    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Returns `{storage_dir}/logs`.
pub fn get_log_dir() -> PathBuf {
    get_storage_dir().join("logs")
}

/// Returns `{storage_dir}/settings.json`.
pub fn get_settings_path() -> PathBuf {
    get_storage_dir().join("settings.json")
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
