//! Configuration management for the Depot server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub files: FilesConfig,
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Host directory backing the virtual root. All client paths are
    /// relative to this.
    pub root: PathBuf,

    /// Staging area for in-flight chunked uploads. Defaults to
    /// `<root>/.temp` when unset.
    pub staging: PathBuf,
}

/// Static permission flags for the single configured principal.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    pub download: bool,
    pub create: bool,
    pub modify: bool,
    pub delete: bool,
    pub rename: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            files: FilesConfig {
                root: PathBuf::from("./data"),
                staging: PathBuf::from("./data/.temp"),
            },
            permissions: PermissionsConfig::default(),
        }
    }
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        PermissionsConfig {
            download: true,
            create: true,
            modify: true,
            delete: true,
            rename: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let root = PathBuf::from(env::var("DEPOT_ROOT")?);
        let staging = env::var("DEPOT_STAGING")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join(".temp"));

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            files: FilesConfig { root, staging },
            permissions: PermissionsConfig {
                download: env_flag("PERM_DOWNLOAD", true),
                create: env_flag("PERM_CREATE", true),
                modify: env_flag("PERM_MODIFY", true),
                delete: env_flag("PERM_DELETE", true),
                rename: env_flag("PERM_RENAME", true),
            },
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}
