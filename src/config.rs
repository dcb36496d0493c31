// src/config.rs

use crate::ldap::Filter;
use crate::models::GroupMapping;
use crate::raddb::MasterKey;
use crate::sync::mapping::{FieldMapping, default_mappings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BIND_PASSWORD_ENV: &str = "DIRSYNC_BIND_PASSWORD";
pub const MASTER_KEY_ENV: &str = "DIRSYNC_MASTER_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ldap: LdapConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// === Подключение к LDAP ===

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LdapConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub bind_dn: String,
    /// Обычно задаётся через `DIRSYNC_BIND_PASSWORD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,
    #[serde(default)]
    pub base_dn: String,
    #[serde(default)]
    pub starttls: bool,
    pub ca_cert_file: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: Option<u64>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub resolve_ranged_attributes: bool,
}

fn default_url() -> String {
    "ldap://localhost:389".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_page_size() -> u32 {
    250
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            bind_dn: String::new(),
            bind_password: None,
            base_dn: String::new(),
            starttls: false,
            ca_cert_file: None,
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: None,
            page_size: default_page_size(),
            resolve_ranged_attributes: false,
        }
    }
}

// === Синхронизация ===

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_users_filter")]
    pub users_filter: String,
    /// Где искать пользователей; если пусто, то `base_dn`
    #[serde(default)]
    pub users_search_locations: Vec<String>,
    #[serde(default = "default_guid_attribute")]
    pub guid_attribute: String,
    #[serde(default = "default_email_attribute")]
    pub email_attribute: String,
    #[serde(default = "default_email_field")]
    pub email_field: String,
    #[serde(default = "default_member_of_attribute")]
    pub member_of_attribute: String,
    #[serde(default)]
    pub reset_missing_attributes: bool,
    #[serde(default)]
    pub destructive: bool,
    #[serde(default = "default_mappings")]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub group_mappings: Vec<GroupMapping>,
    pub default_group: Option<String>,
}

fn default_users_filter() -> String {
    "(&(objectClass=user)(!(objectClass=computer)))".to_string()
}

fn default_guid_attribute() -> String {
    "objectguid".to_string()
}

fn default_email_attribute() -> String {
    "mail".to_string()
}

fn default_email_field() -> String {
    "Email".to_string()
}

fn default_member_of_attribute() -> String {
    "memberof".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            users_filter: default_users_filter(),
            users_search_locations: Vec::new(),
            guid_attribute: default_guid_attribute(),
            email_attribute: default_email_attribute(),
            email_field: default_email_field(),
            member_of_attribute: default_member_of_attribute(),
            reset_missing_attributes: false,
            destructive: false,
            field_mappings: default_mappings(),
            group_mappings: Vec::new(),
            default_group: None,
        }
    }
}

// === Хранилище ===

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// 32 байта в hex. Обычно через `DIRSYNC_MASTER_KEY`
    #[serde(default)]
    pub master_key_hex: String,
}

fn default_db_path() -> String {
    "dirsync.rdb".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            master_key_hex: String::new(),
        }
    }
}

// === Логирование ===

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub enable_json_output: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            enable_json_output: false,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// `<config_dir>/dirsync/config.yaml`, иначе текущая директория
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("dirsync").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    }

    /// Секреты из окружения важнее файла
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(BIND_PASSWORD_ENV) {
            self.ldap.bind_password = Some(password);
        }
        if let Ok(key) = std::env::var(MASTER_KEY_ENV) {
            self.store.master_key_hex = key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ldap.page_size == 0 {
            return Err(ConfigError::Invalid("ldap.page_size must be > 0".to_string()));
        }
        if self.ldap.base_dn.trim().is_empty() {
            return Err(ConfigError::Invalid("ldap.base_dn is required".to_string()));
        }
        Filter::parse(&self.sync.users_filter).map_err(|e| {
            ConfigError::Invalid(format!("sync.users_filter: {e}"))
        })?;
        self.master_key()?;
        Ok(())
    }

    pub fn master_key(&self) -> Result<MasterKey, ConfigError> {
        let bytes = hex::decode(self.store.master_key_hex.trim())
            .map_err(|e| ConfigError::Invalid(format!("master key is not hex: {e}")))?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            ConfigError::Invalid(format!(
                "master key must be 32 bytes, got {}",
                bytes.len()
            ))
        })
    }

    /// Корни поиска для полной синхронизации, в порядке из конфига
    pub fn users_search_bases(&self) -> Vec<Option<String>> {
        if self.sync.users_search_locations.is_empty() {
            vec![None]
        } else {
            self.sync
                .users_search_locations
                .iter()
                .cloned()
                .map(Some)
                .collect()
        }
    }
}
