// src/infra/paths.rs - XDG-compliant path management
//
// All paths respect the SIMCOACH_HOME environment variable for isolation.
// When SIMCOACH_HOME is set, config and data live under that directory.
// When unset, config uses ~/.simcoach/ and data uses XDG_DATA_HOME/simcoach.

use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::OnceLock;

static PROJECT_DIRS: OnceLock<Option<ProjectDirs>> = OnceLock::new();

fn project_dirs() -> Option<&'static ProjectDirs> {
    PROJECT_DIRS
        .get_or_init(|| ProjectDirs::from("", "", "simcoach"))
        .as_ref()
}

/// Returns the SIMCOACH_HOME override, if set.
fn simcoach_home() -> Option<PathBuf> {
    std::env::var_os("SIMCOACH_HOME").map(PathBuf::from)
}

/// Home directory, or the working directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $SIMCOACH_HOME/ or ~/.simcoach/
pub fn config_dir() -> PathBuf {
    if let Some(home) = simcoach_home() {
        return home;
    }
    dirs_home().join(".simcoach")
}

/// Data directory: $SIMCOACH_HOME/data/ or ~/.local/share/simcoach/
pub fn data_dir() -> PathBuf {
    if let Some(home) = simcoach_home() {
        return home.join("data");
    }
    match project_dirs() {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Directory holding one resumption-pointer file per profile.
pub fn pointers_dir() -> PathBuf {
    data_dir().join("pointers")
}

/// Resumption-pointer file for a profile. The profile is a bare file stem;
/// anything that could leave the pointers directory is rejected.
pub fn pointers_path(profile: &str) -> anyhow::Result<PathBuf> {
    if profile.is_empty()
        || profile.starts_with('.')
        || profile.contains(['/', '\\', '\0'])
    {
        anyhow::bail!("Invalid profile name '{profile}'");
    }
    Ok(pointers_dir().join(format!("{profile}.json")))
}

/// Ensure all required directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir(), pointers_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}
