use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AppRegistration;
use crate::{Error, Result};

const GLOBAL_LOGIN: &str = "https://login.microsoftonline.com/common/oauth2/v2.0";
const GLOBAL_GRAPH: &str = "https://graph.microsoft.com/v1.0";
const GLOBAL_SCOPE: &str = "offline_access Files.ReadWrite.All User.Read";

const CHINA_LOGIN: &str = "https://login.chinacloudapi.cn/common/oauth2/v2.0";
const CHINA_GRAPH: &str = "https://microsoftgraph.chinacloudapi.cn/v1.0";
const CHINA_SCOPE: &str = "offline_access https://microsoftgraph.chinacloudapi.cn/Files.ReadWrite.All https://microsoftgraph.chinacloudapi.cn/User.Read";

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost/onedrive-login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Global,
    China,
}

impl Region {
    pub fn from_mainland_flag(is_mainland: bool) -> Self {
        if is_mainland {
            Region::China
        } else {
            Region::Global
        }
    }

    pub fn is_mainland(self) -> bool {
        self == Region::China
    }
}

/// One cloud's identity and Graph endpoints. Built once at startup and
/// passed by value into every component that talks to the cloud.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub region: Region,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub graph_base: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
}

impl EndpointConfig {
    pub fn new(region: Region, app: &AppRegistration) -> Self {
        let (login, graph, scope) = match region {
            Region::Global => (GLOBAL_LOGIN, GLOBAL_GRAPH, GLOBAL_SCOPE),
            Region::China => (CHINA_LOGIN, CHINA_GRAPH, CHINA_SCOPE),
        };
        Self {
            region,
            authorize_url: format!("{login}/authorize"),
            token_url: format!("{login}/token"),
            profile_url: format!("{graph}/me"),
            graph_base: graph.to_string(),
            client_id: app.client_id.trim().to_string(),
            client_secret: app
                .client_secret
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            redirect_uri: app
                .redirect_uri
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_REDIRECT_URI)
                .to_string(),
            scope: scope.to_string(),
        }
    }

    /// URL the user opens in a browser; the browser is then redirected to
    /// `redirect_uri?code=...`, which is what `CredentialStore::authorize`
    /// consumes.
    pub fn login_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", self.scope.as_str()),
            ],
        )
        .map_err(|e| Error::InvalidConfig {
            message: format!("invalid authorize url: {e}"),
        })?;
        Ok(url.into())
    }
}
