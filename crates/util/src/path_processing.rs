use std::env;
use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    if let Some(rest) = trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        return home().join(rest);
    }
    PathBuf::from(trimmed)
}

/// Directory named by `env_var` when set and non-blank, else `fallback()`.
pub fn dir_from_env(env_var: &str, fallback: impl FnOnce() -> PathBuf) -> PathBuf {
    match env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => expand_tilde(&value),
        _ => fallback(),
    }
}

/// `<config_dir>/opschain`, or `./opschain` when the platform has no config directory.
pub fn default_data_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("opschain")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_untouched() {
        assert_eq!(expand_tilde(" /var/lib/opschain "), PathBuf::from("/var/lib/opschain"));
    }

    #[test]
    fn tilde_prefix_expands_to_home() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_tilde("~/skills"), home.join("skills"));
            assert_eq!(expand_tilde("~"), home);
        }
    }

    #[test]
    fn blank_env_value_uses_fallback() {
        temp_env::with_var("OPSCHAIN_TEST_DIR", Some("  "), || {
            assert_eq!(dir_from_env("OPSCHAIN_TEST_DIR", || PathBuf::from("/fallback")), PathBuf::from("/fallback"));
        });
        temp_env::with_var("OPSCHAIN_TEST_DIR", Some("/srv/data"), || {
            assert_eq!(dir_from_env("OPSCHAIN_TEST_DIR", || PathBuf::from("/fallback")), PathBuf::from("/srv/data"));
        });
    }
}
