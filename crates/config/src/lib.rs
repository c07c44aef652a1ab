//! Configuration for pkgmirror.
//!
//! Sources are layered with `figment`, later ones overriding earlier ones:
//!
//! 1. built-in defaults,
//! 2. an optional configuration file (TOML, YAML or JSON, chosen by extension),
//! 3. environment variables prefixed with `PKGMIRROR_`, using `__` to reach
//!    nested keys (`PKGMIRROR_MIRRORS__PACKAGIST__LAZY=true`).

mod database;
pub mod error;
mod http;
mod mirror;

pub use crate::database::DatabaseConfig;
pub use crate::http::HttpConfig;
pub use crate::mirror::{DEFAULT_AVAILABLE_PACKAGES_LIMIT, DEFAULT_PARALLEL_REQUESTS, MirrorConfig};

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_PREFIX: &str = "PKGMIRROR_";
const CONFIG_FILE_NAME: &str = "pkgmirror.toml";
const FALLBACK_DATA_DIR: &str = "/var/lib/pkgmirror";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding one subdirectory per mirror.
    pub storage: PathBuf,
    pub database: DatabaseConfig,
    /// First-party package names; upstream packages with the same name are hidden.
    pub local_packages: Vec<String>,
    pub mirrors: BTreeMap<String, MirrorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: data_dir(),
            database: DatabaseConfig::default(),
            local_packages: Vec::new(),
            mirrors: BTreeMap::new(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "pkgmirror")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
}

/// Location of the configuration file used when none is given explicitly.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl Config {
    /// Build the layered figment without extracting it.
    ///
    /// An explicit `path` must exist; the default path is only used when present.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) if !path.exists() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.exists()),
        };
        if let Some(file) = file {
            debug!(path = %file.display(), "loading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(&file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(&file)),
                Some("json") => figment.merge(Json::file_exact(&file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.storage.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "storage must be an absolute path, got {}",
                self.storage.display()
            )));
        }
        if self.database.max_connections == 0 {
            exn::bail!(ErrorKind::Invalid("database.max_connections must be at least 1".to_string()));
        }
        for (name, mirror) in &self.mirrors {
            if !is_valid_mirror_name(name) {
                exn::bail!(ErrorKind::Invalid(format!(
                    "mirror name \"{name}\" must be non-empty and use only [a-z0-9-_]"
                )));
            }
            if mirror.parallel_requests == 0 {
                exn::bail!(ErrorKind::Invalid(format!("mirror \"{name}\": parallel_requests must be at least 1")));
            }
            if !matches!(mirror.url.scheme(), "http" | "https") {
                exn::bail!(ErrorKind::Invalid(format!("mirror \"{name}\": url must be http or https")));
            }
        }
        Ok(())
    }

    pub fn mirror(&self, name: &str) -> Result<&MirrorConfig> {
        self.mirrors.get(name).ok_or_raise(|| ErrorKind::UnknownMirror(name.to_string()))
    }
}

fn is_valid_mirror_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
