use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::atomic_write;
use crate::identity::{IdentityProvider, TokenGrant, TokenResponse};
use crate::{Error, Result};

pub const DEFAULT_THREAD_COUNT: u32 = 3;
pub const DEFAULT_BLOCK_SIZE_MB: u32 = 10;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveKind {
    #[default]
    Business,
    Personal,
}

impl std::str::FromStr for DriveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "business" | "sharepoint" => Ok(DriveKind::Business),
            "personal" => Ok(DriveKind::Personal),
            other => Err(Error::InvalidConfig {
                message: format!("unknown drive kind: {other}"),
            }),
        }
    }
}

/// The persisted account record. Only the refresh token is secret on
/// disk; access tokens are never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub drive_kind: DriveKind,
    pub refresh_token: String,
    pub thread_count: u32,
    #[serde(rename = "blockSizeMB")]
    pub block_size_mb: u32,
    pub is_mainland_endpoint: bool,
    pub language: String,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub notifier_key: String,
    #[serde(default)]
    pub notifier_target_id: String,
}

impl CredentialRecord {
    pub fn new(drive_kind: DriveKind, refresh_token: String, is_mainland_endpoint: bool) -> Self {
        Self {
            drive_kind,
            refresh_token,
            thread_count: DEFAULT_THREAD_COUNT,
            block_size_mb: DEFAULT_BLOCK_SIZE_MB,
            is_mainland_endpoint,
            language: DEFAULT_LANGUAGE.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            notifier_key: String::new(),
            notifier_target_id: String::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(e, &bytes))
    }

    fn store(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_vec_pretty(self).map_err(|e| Error::InvalidConfig {
            message: format!("credential encode failed: {e}"),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_write(path, &text)?;
        Ok(())
    }

    pub fn notifier_enabled(&self) -> bool {
        !self.notifier_key.trim().is_empty() && !self.notifier_target_id.trim().is_empty()
    }

    fn apply(&mut self, overrides: &RefreshOverrides) {
        if let Some(v) = overrides.thread_count {
            self.thread_count = v;
        }
        if let Some(v) = overrides.block_size_mb {
            self.block_size_mb = v;
        }
        if let Some(v) = &overrides.language {
            self.language = v.clone();
        }
        if let Some(v) = overrides.timeout_seconds {
            self.timeout_seconds = v;
        }
        if let Some(v) = &overrides.notifier_key {
            self.notifier_key = v.clone();
        }
        if let Some(v) = &overrides.notifier_target_id {
            self.notifier_target_id = v.clone();
        }
    }
}

/// Caller-supplied settings that replace the stored ones during refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshOverrides {
    pub thread_count: Option<u32>,
    pub block_size_mb: Option<u32>,
    pub language: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub notifier_key: Option<String>,
    pub notifier_target_id: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub access_token: AccessToken,
    pub record: CredentialRecord,
}

pub struct CredentialStore {
    provider: Arc<dyn IdentityProvider>,
    refreshed: AtomicBool,
}

impl CredentialStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            refreshed: AtomicBool::new(false),
        }
    }

    /// Exchanges the code carried by `login_redirect_url` and writes a new
    /// record named after the account identity into `accounts_dir`.
    pub async fn authorize(
        &self,
        login_redirect_url: &str,
        drive_kind: DriveKind,
        is_mainland_endpoint: bool,
        accounts_dir: &Path,
    ) -> Result<PathBuf> {
        let code = extract_auth_code(login_redirect_url).ok_or_else(|| Error::Auth {
            message: "no authorization code found in redirect url".to_string(),
        })?;

        let tokens = self
            .provider
            .exchange(TokenGrant::AuthorizationCode(&code))
            .await?;
        let (access_token, refresh_token) = require_tokens(tokens)?;

        let account_id = self.resolve_identity(&access_token).await?;
        let record = CredentialRecord::new(drive_kind, refresh_token, is_mainland_endpoint);

        let path = accounts_dir.join(format!("{}.json", sanitize_account_id(&account_id)));
        record.store(&path)?;
        info!(
            event = "credential.authorized",
            account_id = %account_id,
            drive_kind = ?drive_kind,
            path = %path.display(),
            "credential.authorized"
        );
        Ok(path)
    }

    pub async fn resolve_identity(&self, access_token: &AccessToken) -> Result<String> {
        let body = self.provider.profile(access_token.secret()).await?;
        let profile: Profile =
            serde_json::from_slice(&body).map_err(|e| Error::decode(e, &body))?;

        let id = [profile.mail, profile.user_principal_name]
            .into_iter()
            .flatten()
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty());
        match id {
            Some(id) => Ok(id),
            None => {
                let body = String::from_utf8_lossy(&body).into_owned();
                error!(event = "identity.unresolved", body = %body, "identity.unresolved");
                Err(Error::Identity { body })
            }
        }
    }

    /// Exchanges the stored refresh token once and rewrites the record with
    /// the rotated token before returning.
    pub async fn refresh(
        &self,
        location: &Path,
        overrides: &RefreshOverrides,
    ) -> Result<RefreshedCredential> {
        if self.refreshed.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidConfig {
                message: "credentials were already refreshed in this process".to_string(),
            });
        }

        let mut record = CredentialRecord::load(location)?;
        let tokens = self
            .provider
            .exchange(TokenGrant::RefreshToken(&record.refresh_token))
            .await?;
        let (access_token, refresh_token) = require_tokens(tokens)?;
        if refresh_token == record.refresh_token {
            return Err(Error::Auth {
                message: "token endpoint did not rotate the refresh token".to_string(),
            });
        }

        record.refresh_token = refresh_token;
        record.apply(overrides);
        record.store(location)?;
        info!(
            event = "credential.refreshed",
            path = %location.display(),
            thread_count = record.thread_count,
            block_size_mb = record.block_size_mb,
            "credential.refreshed"
        );

        Ok(RefreshedCredential {
            access_token,
            record,
        })
    }

    /// The account identity a record was stored under.
    pub fn account_id(location: &Path) -> Result<String> {
        location
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::NonUtf8Path {
                path: location.to_path_buf(),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    mail: Option<String>,
    user_principal_name: Option<String>,
}

fn require_tokens(tokens: TokenResponse) -> Result<(AccessToken, String)> {
    if tokens.error.is_some() || tokens.error_description.is_some() {
        return Err(Error::Auth {
            message: tokens
                .error_description
                .or(tokens.error)
                .unwrap_or_default(),
        });
    }
    let access_token = tokens
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Auth {
            message: "missing access_token in token response".to_string(),
        })?;
    let refresh_token = tokens
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Auth {
            message: "missing refresh_token in token response".to_string(),
        })?;
    Ok((AccessToken::new(access_token), refresh_token))
}

pub fn extract_auth_code(redirect: &str) -> Option<String> {
    let redirect = redirect.trim();
    if let Ok(url) = url::Url::parse(redirect)
        && let Some((_, code)) = url.query_pairs().find(|(k, _)| k == "code")
        && !code.is_empty()
    {
        return Some(code.into_owned());
    }

    // Pasted fragments such as "code=...&state=..." without a scheme.
    redirect
        .split(['?', '&', '#'])
        .filter(|part| part.starts_with("code="))
        .flat_map(|part| url::form_urlencoded::parse(part.as_bytes()))
        .map(|(_, v)| v.into_owned())
        .find(|v| !v.is_empty())
}

fn sanitize_account_id(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' | '@' => c,
            _ => '_',
        })
        .collect()
}
