use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::endpoint::Region;
use crate::{Error, Result};

pub const ACCOUNTS_DIR: &str = "accounts";

/// OAuth application registration for one cloud.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppRegistration {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub global: AppRegistration,
    #[serde(default)]
    pub china: AppRegistration,
}

impl AppConfig {
    pub fn registration(&self, region: Region) -> Result<&AppRegistration> {
        let (app, table) = match region {
            Region::Global => (&self.global, "global"),
            Region::China => (&self.china, "china"),
        };
        validate_registration(app, table, region)?;
        Ok(app)
    }
}

fn validate_registration(app: &AppRegistration, table: &str, region: Region) -> Result<()> {
    if app.client_id.trim().is_empty() {
        return Err(Error::InvalidConfig {
            message: format!("{table}.client_id must not be empty"),
        });
    }
    let has_secret = app
        .client_secret
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if region.is_mainland() && !has_secret {
        return Err(Error::InvalidConfig {
            message: format!("{table}.client_secret is required for the mainland cloud"),
        });
    }
    if let Some(uri) = app.redirect_uri.as_deref()
        && !uri.trim().is_empty()
        && url::Url::parse(uri.trim()).is_err()
    {
        return Err(Error::InvalidConfig {
            message: format!("{table}.redirect_uri is not a valid url: {uri}"),
        });
    }
    Ok(())
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn accounts_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(ACCOUNTS_DIR)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    parse_app_config(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })
}

pub fn parse_app_config(text: &str) -> std::result::Result<AppConfig, toml::de::Error> {
    toml::from_str(text)
}

pub fn save_app_config(config_dir: &Path, config: &AppConfig) -> Result<()> {
    let path = config_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::InvalidConfig {
            message: format!("config dir create failed: {e}"),
        })?;
    }

    let text = toml::to_string(config).map_err(|e| Error::InvalidConfig {
        message: format!("config encode failed: {e}"),
    })?;

    atomic_write(&path, text.as_bytes()).map_err(|e| Error::InvalidConfig {
        message: format!("config write failed: {e}"),
    })?;
    Ok(())
}

/// Writes `<path>.tmp` and renames it over `path`.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[global]
client_id = "11111111-2222-3333-4444-555555555555"

[china]
client_id = "aaaa"
client_secret = "s3cret"
redirect_uri = "http://localhost/onedrive-login"
"#;

    #[test]
    fn both_regions_parse_and_validate() {
        let cfg = parse_app_config(SAMPLE).unwrap();
        assert!(cfg.registration(Region::Global).is_ok());
        let china = cfg.registration(Region::China).unwrap();
        assert_eq!(china.client_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let cfg = parse_app_config("").unwrap();
        let err = cfg.registration(Region::Global).unwrap_err();
        assert!(err.to_string().contains("global.client_id"));
    }

    #[test]
    fn mainland_requires_secret() {
        let cfg = parse_app_config("[china]\nclient_id = \"x\"\n").unwrap();
        let err = cfg.registration(Region::China).unwrap_err();
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn redirect_uri_must_be_a_url() {
        let cfg =
            parse_app_config("[global]\nclient_id = \"x\"\nredirect_uri = \"not a url\"\n").unwrap();
        assert!(cfg.registration(Region::Global).is_err());
    }

    #[test]
    fn save_then_load_keeps_registrations() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = parse_app_config(SAMPLE).unwrap();
        save_app_config(temp.path(), &cfg).unwrap();

        let loaded = load_app_config(temp.path()).unwrap();
        assert_eq!(loaded.china.client_id, "aaaa");
        assert!(!temp.path().join("config.tmp").exists());
    }

    #[test]
    fn absent_file_loads_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = load_app_config(temp.path()).unwrap();
        assert!(cfg.global.client_id.is_empty());
    }
}
