use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::endpoint::EndpointConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub enum TokenGrant<'a> {
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

impl TokenGrant<'_> {
    fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::AuthorizationCode(_) => "authorization_code",
            TokenGrant::RefreshToken(_) => "refresh_token",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Token and profile endpoints of the identity provider.
pub trait IdentityProvider: Send + Sync {
    fn exchange<'a>(
        &'a self,
        grant: TokenGrant<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;

    /// Raw profile body; callers pick the fields they need.
    fn profile<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

pub struct HttpIdentityProvider {
    endpoints: EndpointConfig,
    client: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(endpoints: EndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::InvalidConfig {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { endpoints, client })
    }

    fn form<'a>(&'a self, grant: TokenGrant<'a>) -> Vec<(&'static str, &'a str)> {
        let mut form = vec![
            ("client_id", self.endpoints.client_id.as_str()),
            ("scope", self.endpoints.scope.as_str()),
            ("redirect_uri", self.endpoints.redirect_uri.as_str()),
            ("grant_type", grant.grant_type()),
        ];
        match grant {
            TokenGrant::AuthorizationCode(code) => form.push(("code", code)),
            TokenGrant::RefreshToken(token) => form.push(("refresh_token", token)),
        }
        if let Some(secret) = self.endpoints.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        form
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn exchange<'a>(
        &'a self,
        grant: TokenGrant<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            debug!(
                event = "token.exchange",
                grant_type = grant.grant_type(),
                region = ?self.endpoints.region,
                "token.exchange"
            );
            let res = self
                .client
                .post(&self.endpoints.token_url)
                .form(&self.form(grant))
                .send()
                .await
                .map_err(|e| Error::transport("token request failed", e))?;

            // Error replies carry error_description in a JSON body, so the
            // status is not checked here.
            let body = res
                .bytes()
                .await
                .map_err(|e| Error::transport("token read response failed", e))?;
            serde_json::from_slice(&body).map_err(|e| Error::decode(e, &body))
        })
    }

    fn profile<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .get(&self.endpoints.profile_url)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| Error::transport("profile request failed", e))?;
            let body = res
                .bytes()
                .await
                .map_err(|e| Error::transport("profile read response failed", e))?;
            Ok(body.to_vec())
        })
    }
}
