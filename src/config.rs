//! Collector configuration
//!
//! Provides `CollectorConfig` with a validating builder, the backend
//! selection, and the factories that turn a configuration into a backend
//! and a provider module cache.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::backend::{
    BackendError, CimBackend, DEFAULT_NAMESPACE, FixtureBackend, FixtureSnapshot,
    ManagementBackend, SysfsBackend,
};
use crate::provider::{
    DisabledLoader, LoaderChain, ManifestLoader, ModuleCache, ModuleLoader, StaticLoader,
};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default time budget for one inventory pass (30 seconds)
pub const DEFAULT_PASS_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed pass timeout (5 minutes)
pub const MAX_PASS_TIMEOUT_SECS: u64 = 300;

/// Environment variable selecting the backend kind
pub const BACKEND_ENV: &str = "HWINVENTORY_BACKEND";

// ============================================================================
// Errors
// ============================================================================

/// Invalid configuration values and unreadable configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid timeout: {timeout:?} - {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },

    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("Unknown backend kind '{value}' (expected auto, cim, sysfs or fixture)")]
    InvalidBackend { value: String },

    #[error("Invalid path: {path} - {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Invalid inventory plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("Cannot read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot load fixture snapshot {path}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

impl ConfigError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_timeout(timeout: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            timeout,
            reason: reason.into(),
        }
    }

    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Backend Selection
// ============================================================================

/// Which management backend a collector talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// CIM on Windows, sysfs elsewhere
    #[default]
    Auto,
    Cim,
    Sysfs,
    Fixture,
}

impl BackendKind {
    /// Resolve `Auto` to a concrete kind for the current platform
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(target_os = "windows") => Self::Cim,
            Self::Auto => Self::Sysfs,
            other => other,
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cim" | "wmi" => Ok(Self::Cim),
            "sysfs" => Ok(Self::Sysfs),
            "fixture" => Ok(Self::Fixture),
            _ => Err(ConfigError::InvalidBackend {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Cim => "cim",
            Self::Sysfs => "sysfs",
            Self::Fixture => "fixture",
        })
    }
}

// ============================================================================
// Collector Configuration
// ============================================================================

/// Validated settings for an inventory collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Management namespace queried by the session
    pub namespace: String,

    /// Time budget for one pass
    pub pass_timeout: Duration,

    /// Extra directories searched for provider manifests
    pub provider_dirs: Vec<PathBuf>,

    /// Keep loaded provider modules between passes
    pub module_caching: bool,

    /// When false every provider-sourced fact fails to load
    pub providers_enabled: bool,

    pub backend: BackendKind,

    /// Root of the filesystem read by the sysfs backend
    pub sysfs_root: Option<PathBuf>,

    /// Snapshot served by the fixture backend
    pub fixture_path: Option<PathBuf>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS),
            provider_dirs: Vec::new(),
            module_caching: true,
            providers_enabled: true,
            backend: BackendKind::Auto,
            sysfs_root: None,
            fixture_path: None,
        }
    }
}

impl CollectorConfig {
    pub fn builder() -> CollectorConfigBuilder {
        CollectorConfigBuilder::new()
    }

    /// Instantiate the configured management backend
    pub fn create_backend(&self) -> Result<Box<dyn ManagementBackend>, ConfigError> {
        let kind = self.backend.resolve();
        debug!("Creating {} backend", kind);
        let backend: Box<dyn ManagementBackend> = match kind {
            BackendKind::Cim => Box::new(CimBackend::new()),
            BackendKind::Sysfs | BackendKind::Auto => match &self.sysfs_root {
                Some(root) => Box::new(SysfsBackend::with_root(root)),
                None => Box::new(SysfsBackend::new()),
            },
            BackendKind::Fixture => {
                let path = self
                    .fixture_path
                    .as_ref()
                    .ok_or_else(|| ConfigError::missing_field("fixture_path"))?;
                let snapshot =
                    FixtureSnapshot::from_file(path).map_err(|source| ConfigError::Fixture {
                        path: path.clone(),
                        source,
                    })?;
                Box::new(FixtureBackend::new(snapshot))
            }
        };
        Ok(backend)
    }

    /// Loader for provider modules: built-ins first, then manifests
    pub fn create_loader(&self) -> Arc<dyn ModuleLoader> {
        if !self.providers_enabled {
            return Arc::new(DisabledLoader);
        }
        let manifests = ManifestLoader::new(self.provider_dirs.clone())
            .with_env_search_path()
            .with_invoke_timeout(self.pass_timeout);
        Arc::new(
            LoaderChain::new()
                .with_loader(Box::new(StaticLoader::with_builtin_providers()))
                .with_loader(Box::new(manifests)),
        )
    }

    pub fn create_module_cache(&self) -> ModuleCache {
        let cache = ModuleCache::new(self.create_loader());
        if self.module_caching {
            cache
        } else {
            cache.without_caching()
        }
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for CollectorConfig with validation and defaults
#[derive(Debug, Default)]
pub struct CollectorConfigBuilder {
    namespace: Option<String>,
    pass_timeout: Option<Duration>,
    provider_dirs: Vec<PathBuf>,
    module_caching: Option<bool>,
    providers_enabled: Option<bool>,
    backend: Option<BackendKind>,
    sysfs_root: Option<PathBuf>,
    fixture_path: Option<PathBuf>,
}

impl CollectorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `HWINVENTORY_BACKEND` unless a backend was already chosen
    pub fn from_env(mut self) -> Result<Self, ConfigError> {
        if self.backend.is_none()
            && let Ok(value) = std::env::var(BACKEND_ENV)
            && !value.trim().is_empty()
        {
            self.backend = Some(value.parse()?);
        }
        Ok(self)
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = Some(timeout);
        self
    }

    /// Add a directory searched for provider manifests
    pub fn provider_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.provider_dirs.push(dir.into());
        self
    }

    pub fn provider_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.provider_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    pub fn module_caching(mut self, enabled: bool) -> Self {
        self.module_caching = Some(enabled);
        self
    }

    pub fn providers_enabled(mut self, enabled: bool) -> Self {
        self.providers_enabled = Some(enabled);
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = Some(root.into());
        self
    }

    pub fn fixture_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixture_path = Some(path.into());
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<CollectorConfig, ConfigError> {
        let defaults = CollectorConfig::default();
        let config = CollectorConfig {
            namespace: self.namespace.unwrap_or(defaults.namespace),
            pass_timeout: self.pass_timeout.unwrap_or(defaults.pass_timeout),
            provider_dirs: self.provider_dirs,
            module_caching: self.module_caching.unwrap_or(defaults.module_caching),
            providers_enabled: self.providers_enabled.unwrap_or(defaults.providers_enabled),
            backend: self.backend.unwrap_or(defaults.backend),
            sysfs_root: self.sysfs_root,
            fixture_path: self.fixture_path,
        };

        Self::validate_namespace(&config.namespace)?;
        Self::validate_timeout(config.pass_timeout)?;
        for dir in &config.provider_dirs {
            Self::validate_directory(dir)?;
        }
        if let Some(root) = &config.sysfs_root {
            Self::validate_directory(root)?;
        }
        if config.backend == BackendKind::Fixture && config.fixture_path.is_none() {
            return Err(ConfigError::missing_field("fixture_path"));
        }

        Ok(config)
    }

    fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
        let reason = if namespace.trim().is_empty() {
            "namespace cannot be empty"
        } else if namespace.contains('\0') {
            "namespace contains null character"
        } else {
            return Ok(());
        };
        Err(ConfigError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason: reason.to_string(),
        })
    }

    fn validate_timeout(timeout: Duration) -> Result<(), ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::invalid_timeout(
                timeout,
                "Pass timeout must be greater than zero",
            ));
        }
        if timeout > Duration::from_secs(MAX_PASS_TIMEOUT_SECS) {
            return Err(ConfigError::invalid_timeout(
                timeout,
                format!("Pass timeout cannot exceed {MAX_PASS_TIMEOUT_SECS} seconds"),
            ));
        }
        Ok(())
    }

    fn validate_directory(path: &Path) -> Result<(), ConfigError> {
        if !path.is_dir() {
            return Err(ConfigError::invalid_path(path, "not a directory"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::builder().build().unwrap();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.pass_timeout, Duration::from_secs(30));
        assert!(config.module_caching);
        assert!(config.providers_enabled);
        assert_eq!(config.backend, BackendKind::Auto);
    }

    #[test]
    fn test_timeout_validation() {
        let zero = CollectorConfig::builder()
            .pass_timeout(Duration::ZERO)
            .build();
        assert!(matches!(zero, Err(ConfigError::InvalidTimeout { .. })));

        let huge = CollectorConfig::builder()
            .pass_timeout(Duration::from_secs(MAX_PASS_TIMEOUT_SECS + 1))
            .build();
        assert!(matches!(huge, Err(ConfigError::InvalidTimeout { .. })));
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let result = CollectorConfig::builder().namespace("  ").build();
        assert!(matches!(result, Err(ConfigError::InvalidNamespace { .. })));
    }

    #[test]
    fn test_fixture_requires_path() {
        let result = CollectorConfig::builder()
            .backend(BackendKind::Fixture)
            .build();
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_provider_dir_must_exist() {
        let dir = tempdir().unwrap();
        assert!(
            CollectorConfig::builder()
                .provider_dir(dir.path())
                .build()
                .is_ok()
        );
        let missing = CollectorConfig::builder()
            .provider_dir(dir.path().join("absent"))
            .build();
        assert!(matches!(missing, Err(ConfigError::InvalidPath { .. })));
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("SYSFS".parse::<BackendKind>().unwrap(), BackendKind::Sysfs);
        assert_eq!("wmi".parse::<BackendKind>().unwrap(), BackendKind::Cim);
        assert!("registry".parse::<BackendKind>().is_err());
        assert_ne!(BackendKind::Auto.resolve(), BackendKind::Auto);
    }

    #[test]
    fn test_create_fixture_backend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"{"classes":{"Win32_BaseBoard":[{"SerialNumber":"ABC123"}]}}"#,
        )
        .unwrap();
        let config = CollectorConfig::builder()
            .backend(BackendKind::Fixture)
            .fixture_path(&path)
            .build()
            .unwrap();
        let backend = config.create_backend().unwrap();
        assert_eq!(backend.name(), "fixture");
    }

    #[test]
    fn test_disabled_providers_use_disabled_loader() {
        let config = CollectorConfig::builder()
            .providers_enabled(false)
            .build()
            .unwrap();
        let cache = config.create_module_cache();
        assert!(matches!(
            cache.acquire("host"),
            Err(crate::provider::ModuleError::Load { .. })
        ));
    }

    #[test]
    fn test_builtin_provider_reachable_through_chain() {
        let config = CollectorConfig::builder().build().unwrap();
        let cache = config.create_module_cache();
        assert!(cache.acquire("host").unwrap().is_loaded());
        assert!(cache.acquire("missing_provider").unwrap_err().is_not_found());
    }
}
