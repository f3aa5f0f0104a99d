use dirs::home_dir;
use std::path::PathBuf;

/// Returns the fnpack home directory (`$FNPACK_HOME`, else `~/.fnpack`), or
/// None if the user's home cannot be resolved.
pub fn try_fnpack_home() -> Option<PathBuf> {
    home_from(|key| std::env::var(key).ok())
}

/// Home directory resolution with an injectable environment.
pub fn home_from(env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(val) = env("FNPACK_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".fnpack"))
}

/// Profile file path: ~/.fnpack/config.toml
pub fn profile_config_path() -> Option<PathBuf> {
    try_fnpack_home().map(|h| h.join("config.toml"))
}
