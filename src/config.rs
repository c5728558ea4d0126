//! Configuration management for driveup
//!
//! Settings live in `~/.driveup/config.json` (or a file given with
//! `--config`). OAuth client credentials can also be taken from the
//! `client_secrets.json` downloaded from the Google Cloud Console.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DriveupError, Result};
use crate::oauth::{with_callback_port, OAuthCredentials};

/// Authentication type for Google Drive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriveAuthType {
    /// OAuth2 installed-application flow
    #[default]
    OAuth,
    /// Service account key file
    ServiceAccount,
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub settings: UploadSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub auth_type: DriveAuthType,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default)]
    pub service_account_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// chrono format of the per-run folder created with `-f`
    #[serde(default = "default_dated_folder_format")]
    pub dated_folder_format: String,
    /// Use resumable uploads unless overridden on the command line
    #[serde(default)]
    pub resumable_upload: bool,
}

fn default_redirect_uri() -> String {
    "http://localhost:8085".to_string()
}

fn default_dated_folder_format() -> String {
    "%Y%m%d".to_string()
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            auth_type: DriveAuthType::OAuth,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            service_account_file: String::new(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            dated_folder_format: default_dated_folder_format(),
            resumable_upload: false,
        }
    }
}

impl GlobalConfig {
    /// Get the global config directory path
    pub fn config_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".driveup"))
            .ok_or_else(|| DriveupError::Config("Could not find home directory".to_string()))
    }

    /// Get the global config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load the global configuration, creating a default file if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, creating a default file if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: GlobalConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = GlobalConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// OAuth credentials from this config, validated
    pub fn oauth_credentials(&self) -> Result<OAuthCredentials> {
        let credentials = OAuthCredentials {
            client_id: self.drive.client_id.clone(),
            client_secret: self.drive.client_secret.clone(),
            redirect_uri: self.drive.redirect_uri.clone(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Overwrite the OAuth credentials with those from a client secrets file
    pub fn apply_client_secrets(&mut self, secrets: &ClientSecrets) {
        let details = secrets.details();
        self.drive.auth_type = DriveAuthType::OAuth;
        self.drive.client_id = details.client_id.clone();
        self.drive.client_secret = details.client_secret.clone();
        if let Some(uri) = details.redirect_uris.iter().find(|u| u.starts_with("http://")) {
            self.drive.redirect_uri = with_callback_port(uri);
        }
    }
}

/// Google Cloud Console `client_secrets.json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientSecrets {
    Installed(ClientSecretDetails),
    Web(ClientSecretDetails),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecretDetails {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl ClientSecrets {
    /// Read and parse a client secrets file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DriveupError::Config(format!("Cannot read client secrets {:?}: {}", path, e))
        })?;
        let secrets: ClientSecrets = serde_json::from_str(&content)?;
        Ok(secrets)
    }

    pub fn details(&self) -> &ClientSecretDetails {
        match self {
            ClientSecrets::Installed(d) | ClientSecrets::Web(d) => d,
        }
    }
}
