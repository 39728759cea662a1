//! The Warden state directory.
//!
//! ```text
//! ~/.warden/                  (WardenHome, or $WARDEN_HOME)
//! ├── config.toml             (optional user config)
//! ├── keys/                   (HMAC key files and metadata, 0700)
//! ├── audit/                  (audit.log, archives, chain, witness, 0700)
//! └── lockout/                (lockout_state.json, 0700)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable that relocates the state directory.
pub const HOME_ENV_VAR: &str = "WARDEN_HOME";

/// Root of all persisted Warden state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenHome {
    root: PathBuf,
}

impl WardenHome {
    /// Resolve from the process environment.
    ///
    /// # Errors
    ///
    /// See [`resolve_with_env`](Self::resolve_with_env).
    pub fn resolve() -> ConfigResult<Self> {
        Self::resolve_with_env(&crate::env::collect_env_vars())
    }

    /// Resolve from an explicit environment: `WARDEN_HOME` if set, else
    /// `.warden` under the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvError`] if `WARDEN_HOME` is not absolute,
    /// or [`ConfigError::NoHomeDir`] if no home directory is known.
    pub fn resolve_with_env(env: &HashMap<String, String>) -> ConfigResult<Self> {
        if let Some(custom) = env.get(HOME_ENV_VAR).filter(|v| !v.trim().is_empty()) {
            let root = PathBuf::from(custom.trim());
            if !root.is_absolute() {
                return Err(ConfigError::EnvError {
                    var_name: HOME_ENV_VAR.to_owned(),
                    message: format!("'{custom}' must be an absolute path"),
                });
            }
            return Ok(Self { root });
        }
        let home = directories::BaseDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or(ConfigError::NoHomeDir)?;
        Ok(Self {
            root: home.join(".warden"),
        })
    }

    /// Use an explicit root.
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Layout`] if a directory cannot be created or
    /// its permissions cannot be set.
    pub fn ensure(&self) -> ConfigResult<()> {
        for dir in [
            self.root.clone(),
            self.keys_dir(),
            self.audit_dir(),
            self.lockout_dir(),
        ] {
            create_private_dir(&dir)?;
        }
        debug!(root = %self.root.display(), "state directories ready");
        Ok(())
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key files and metadata.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// Audit log, archives, chain and witness.
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Lockout state.
    #[must_use]
    pub fn lockout_dir(&self) -> PathBuf {
        self.root.join("lockout")
    }

    /// Optional user configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}

fn create_private_dir(path: &Path) -> ConfigResult<()> {
    let layout_err = |source| ConfigError::Layout {
        path: path.display().to_string(),
        source,
    };
    std::fs::create_dir_all(path).map_err(layout_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(layout_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_home_env() {
        let env = HashMap::from([(HOME_ENV_VAR.to_owned(), "/srv/warden".to_owned())]);
        let home = WardenHome::resolve_with_env(&env).unwrap();
        assert_eq!(home.root(), Path::new("/srv/warden"));
        assert_eq!(home.keys_dir(), Path::new("/srv/warden/keys"));
        assert_eq!(home.config_path(), Path::new("/srv/warden/config.toml"));
    }

    #[test]
    fn test_relative_home_env_rejected() {
        let env = HashMap::from([(HOME_ENV_VAR.to_owned(), "relative/state".to_owned())]);
        let err = WardenHome::resolve_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_ensure_creates_private_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let home = WardenHome::from_path(dir.path().join("state"));
        home.ensure().unwrap();
        home.ensure().unwrap();

        for sub in [home.keys_dir(), home.audit_dir(), home.lockout_dir()] {
            assert!(sub.is_dir());
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = std::fs::metadata(&sub).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o700);
            }
        }
    }
}
