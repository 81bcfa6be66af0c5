//! Connection parameter resolution.
//!
//! The endpoint URL and database credential come from a layered set of sources:
//! the managed secrets file first, process environment variables second. Both
//! sources use the same key names. A source that is not configured or fails to
//! load is skipped; the first source that loads supplies both values, and a
//! missing key there is a configuration error rather than a reason to fall
//! through.

use crate::error::{DbError, DbResult};
use crate::models::ConnectionConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key holding the endpoint URL of the hosted backend.
pub const ENDPOINT_URL_KEY: &str = "SUPABASE_URL";
/// Key holding the database password.
pub const CREDENTIAL_KEY: &str = "SUPABASE_DB_PASSWORD";

/// Errors raised while reading a secret source.
#[derive(Debug, thiserror::Error)]
pub enum SecretSourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{0}")]
    Unavailable(String),
}

/// Key/value snapshot read from one source.
pub type SecretValues = HashMap<String, String>;

/// A place connection parameters can be looked up in.
pub trait SecretSource: Send + Sync + std::fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Read the whole source once. An error marks the source as unavailable.
    fn load(&self) -> Result<SecretValues, SecretSourceError>;
}

/// TOML secrets file with top-level string keys.
///
/// ```toml
/// SUPABASE_URL = "https://proj123.supabase.co"
/// SUPABASE_DB_PASSWORD = "..."
/// ```
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<toml::Table, SecretSourceError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SecretSourceError::Unavailable(format!(
                    "secrets file {} not found",
                    self.path.display()
                ))
            } else {
                SecretSourceError::Read {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        content
            .parse::<toml::Table>()
            .map_err(|source| SecretSourceError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

impl SecretSource for SecretsFile {
    fn name(&self) -> &str {
        "secrets file"
    }

    fn load(&self) -> Result<SecretValues, SecretSourceError> {
        Ok(self
            .read_table()?
            .into_iter()
            .map(|(key, value)| match value {
                toml::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect())
    }
}

/// Process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl SecretSource for EnvSource {
    fn name(&self) -> &str {
        "environment"
    }

    // Entries that are not valid unicode are left out.
    fn load(&self) -> Result<SecretValues, SecretSourceError> {
        Ok(std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect())
    }
}

/// In-memory source, for embedding callers and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretSource for StaticSecrets {
    fn name(&self) -> &str {
        "static"
    }

    fn load(&self) -> Result<SecretValues, SecretSourceError> {
        Ok(self.values.clone())
    }
}

/// Resolves [`ConnectionConfig`] from an ordered list of sources.
#[derive(Debug, Default)]
pub struct CredentialResolver {
    sources: Vec<Box<dyn SecretSource>>,
}

impl CredentialResolver {
    /// Resolver with no sources; add them in precedence order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Secrets file (when configured) first, then the environment.
    pub fn standard(secrets_file: Option<PathBuf>) -> Self {
        let mut resolver = Self::new();
        if let Some(path) = secrets_file {
            resolver = resolver.with_source(SecretsFile::new(path));
        }
        resolver.with_source(EnvSource)
    }

    pub fn with_source(mut self, source: impl SecretSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Resolve both connection parameters from the first available source,
    /// or fail naming every key that source is missing.
    pub fn resolve(&self) -> DbResult<ConnectionConfig> {
        let Some((source, values)) = self.first_available() else {
            return Err(DbError::configuration([ENDPOINT_URL_KEY, CREDENTIAL_KEY]));
        };

        let get = |key: &str| {
            values
                .get(key)
                .filter(|value| !value.trim().is_empty())
                .cloned()
        };
        match (get(ENDPOINT_URL_KEY), get(CREDENTIAL_KEY)) {
            (Some(endpoint_url), Some(credential)) => {
                debug!(source = source, "Resolved connection parameters");
                ConnectionConfig::new(endpoint_url, credential)
            }
            (endpoint_url, credential) => {
                let mut missing = Vec::new();
                if endpoint_url.is_none() {
                    missing.push(ENDPOINT_URL_KEY);
                }
                if credential.is_none() {
                    missing.push(CREDENTIAL_KEY);
                }
                warn!(source = source, missing = ?missing, "Connection parameters incomplete");
                Err(DbError::configuration(missing))
            }
        }
    }

    fn first_available(&self) -> Option<(&str, SecretValues)> {
        for source in &self.sources {
            match source.load() {
                Ok(values) => return Some((source.name(), values)),
                Err(SecretSourceError::Unavailable(reason)) => {
                    debug!(source = source.name(), reason = %reason, "Source unavailable");
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Secret source failed to load, trying next source");
                }
            }
        }
        None
    }
}
