// ⚙️ Configuration
//
// DbConfig     - connection settings entered once at setup
// ConfigStore  - where those settings live between runs (JSON file)
// Settings     - runtime knobs read from the environment

use crate::db::{MockDatabase, Persistence, SqliteDatabase};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_FILE: &str = "sql_server_config.json";
pub const DEFAULT_HOME: &str = ".cashguard";
pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";

// ============================================================================
// DATABASE CONNECTION CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConfig {
    pub server: String,
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub integrated_security: bool,
}

impl DbConfig {
    /// Server and database are required. Without integrated security both
    /// user and password must be present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::Invalid("server is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid("database is required".to_string()));
        }
        if self.database.contains(|c: char| c == '/' || c == '\\') || self.database.contains("..") {
            return Err(ConfigError::Invalid(format!(
                "database name {:?} is not a plain name",
                self.database
            )));
        }
        if !self.integrated_security && (self.user.is_empty() || self.password.is_empty()) {
            return Err(ConfigError::Invalid(
                "user and password are required without integrated security".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_string(&self) -> String {
        if self.integrated_security {
            format!(
                "Server={};Database={};Trusted_Connection=True;",
                self.server, self.database
            )
        } else {
            format!(
                "Server={};Database={};User Id={};Password={};",
                self.server, self.database, self.user, self.password
            )
        }
    }
}

// ============================================================================
// CONFIG STORE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(home: &Path) -> Self {
        Self::new(home.join(CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_config(&self) -> bool {
        self.path.is_file()
    }

    pub fn save(&self, config: &DbConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::info!(path = %self.path.display(), "saved database config");
        Ok(())
    }

    pub fn load(&self) -> Result<DbConfig> {
        if !self.has_config() {
            return Err(ConfigError::NotConfigured.into());
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let config: DbConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        Ok(config)
    }
}

// ============================================================================
// RUNTIME SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Mock,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Mock => "mock",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "mock" => Ok(Backend::Mock),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub home: PathBuf,
    pub backend: Backend,
    pub addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: PathBuf::from(DEFAULT_HOME),
            backend: Backend::Sqlite,
            addr: DEFAULT_ADDR.to_string(),
        }
    }
}

impl Settings {
    /// CASHGUARD_HOME, CASHGUARD_BACKEND, CASHGUARD_ADDR
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let home = lookup("CASHGUARD_HOME")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.home);
        let backend = match lookup("CASHGUARD_BACKEND") {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => defaults.backend,
        };
        let addr = lookup("CASHGUARD_ADDR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.addr);

        Ok(Settings {
            home,
            backend,
            addr,
        })
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::in_dir(&self.home)
    }

    /// SQLite file for a configured database
    pub fn database_path(&self, config: &DbConfig) -> PathBuf {
        self.home.join(format!("{}.db", config.database.trim()))
    }

    fn open_backend(&self, config: &DbConfig) -> Result<Box<dyn Persistence>> {
        match self.backend {
            Backend::Mock => Ok(Box::new(MockDatabase::new())),
            Backend::Sqlite => {
                std::fs::create_dir_all(&self.home)
                    .with_context(|| format!("Failed to create {}", self.home.display()))?;
                let db = SqliteDatabase::open(&self.database_path(config))?;
                Ok(Box::new(db))
            }
        }
    }

    /// Validate, store and initialize a new configuration
    pub fn setup(&self, config: &DbConfig) -> Result<Box<dyn Persistence>> {
        config.validate()?;
        tracing::info!(server = %config.server, database = %config.database, "testing connection");

        let mut db = self.open_backend(config)?;
        db.initialize(config)?;
        self.config_store().save(config)?;

        Ok(db)
    }

    /// Open the configured store
    pub fn connect(&self) -> Result<Box<dyn Persistence>> {
        let config = self.config_store().load()?;
        config.validate()?;

        let mut db = self.open_backend(&config)?;
        // Schema creation is idempotent; seeding only happens on an empty store
        db.initialize(&config)?;
        tracing::debug!(backend = %self.backend, database = %config.database, "connected");

        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sql_auth_config() -> DbConfig {
        DbConfig {
            server: "localhost\\SQLEXPRESS".to_string(),
            database: "CashGuardDB".to_string(),
            user: "sa".to_string(),
            password: "secret".to_string(),
            integrated_security: false,
        }
    }

    #[test]
    fn test_validate_requires_auth() {
        let mut config = sql_auth_config();
        assert!(config.validate().is_ok());

        config.password.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.integrated_security = true;
        assert!(config.validate().is_ok());

        config.server.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_path_like_names() {
        let mut config = sql_auth_config();
        config.database = "../etc".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_string() {
        let mut config = sql_auth_config();
        assert_eq!(
            config.connection_string(),
            "Server=localhost\\SQLEXPRESS;Database=CashGuardDB;User Id=sa;Password=secret;"
        );

        config.integrated_security = true;
        assert_eq!(
            config.connection_string(),
            "Server=localhost\\SQLEXPRESS;Database=CashGuardDB;Trusted_Connection=True;"
        );
    }

    #[test]
    fn test_config_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::in_dir(&dir.path().join("nested"));

        assert!(!store.has_config());
        let err = store.load().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::NotConfigured)
        );

        store.save(&sql_auth_config()).unwrap();
        assert!(store.has_config());
        assert_eq!(store.load().unwrap(), sql_auth_config());
    }

    #[test]
    fn test_settings_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("CASHGUARD_HOME", "/tmp/cg"),
            ("CASHGUARD_BACKEND", "Mock"),
        ]
        .into_iter()
        .collect();

        let settings = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.home, PathBuf::from("/tmp/cg"));
        assert_eq!(settings.backend, Backend::Mock);
        assert_eq!(settings.addr, DEFAULT_ADDR);

        let bad = Settings::from_lookup(|k| {
            (k == "CASHGUARD_BACKEND").then(|| "oracle".to_string())
        });
        assert_eq!(bad.unwrap_err(), ConfigError::UnknownBackend("oracle".to_string()));
    }

    #[test]
    fn test_setup_then_connect_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            home: dir.path().to_path_buf(),
            backend: Backend::Sqlite,
            addr: DEFAULT_ADDR.to_string(),
        };

        // Not configured yet
        assert!(settings.connect().is_err());

        let mut config = sql_auth_config();
        config.database = "Caja".to_string();
        settings.setup(&config).unwrap();

        assert!(settings.database_path(&config).is_file());

        let mut db = settings.connect().unwrap();
        assert_eq!(db.load().unwrap().custodians.len(), 3);
    }
}
