use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::credential::AccessToken;
use crate::endpoint::EndpointConfig;
use crate::{Error, Result};

pub const CONFLICT_QUERY_KEY: &str = "@microsoft.graph.conflictBehavior";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Server-side handling of a name collision on upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Rename,
    Replace,
    Fail,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::Rename => "rename",
            ConflictPolicy::Replace => "replace",
            ConflictPolicy::Fail => "fail",
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(ConflictPolicy::Rename),
            "replace" => Ok(ConflictPolicy::Replace),
            "fail" => Ok(ConflictPolicy::Fail),
            other => Err(Error::InvalidConfig {
                message: format!("conflict policy must be rename, replace or fail (got {other})"),
            }),
        }
    }
}

/// Account and token every drive request is made with.
#[derive(Debug, Clone)]
pub struct DriveAuth {
    pub account_id: String,
    pub access_token: AccessToken,
}

/// Status and raw body of a request that reached the server.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

pub type DriveFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpReply>> + Send + 'a>>;

/// Graph drive operations used by the uploaders. Implementations return
/// `Error::Transport` only when no reply was received.
pub trait DriveApi: Send + Sync {
    fn put_content<'a>(
        &'a self,
        auth: &'a DriveAuth,
        remote_path: &'a str,
        conflict: ConflictPolicy,
        bytes: Vec<u8>,
    ) -> DriveFuture<'a>;

    fn list_children<'a>(&'a self, auth: &'a DriveAuth, folder: &'a str) -> DriveFuture<'a>;

    /// Follows an `@odata.nextLink` returned by `list_children`.
    fn get_page<'a>(&'a self, auth: &'a DriveAuth, url: &'a str) -> DriveFuture<'a>;

    fn create_upload_session<'a>(
        &'a self,
        auth: &'a DriveAuth,
        remote_path: &'a str,
        conflict: ConflictPolicy,
    ) -> DriveFuture<'a>;

    fn put_range<'a>(
        &'a self,
        upload_url: &'a str,
        range: ByteRange,
        bytes: Vec<u8>,
    ) -> DriveFuture<'a>;

    fn session_status<'a>(&'a self, upload_url: &'a str) -> DriveFuture<'a>;

    /// Metadata of the item at `remote_path`.
    fn get_item<'a>(&'a self, auth: &'a DriveAuth, remote_path: &'a str) -> DriveFuture<'a>;
}

pub struct GraphDrive {
    graph_base: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl GraphDrive {
    pub fn new(endpoints: &EndpointConfig, request_timeout: Duration) -> Self {
        Self {
            graph_base: endpoints.graph_base.trim_end_matches('/').to_string(),
            request_timeout,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, context: &str) -> Result<HttpReply> {
        let res = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::transport(context, e))?;
        let status = res.status().as_u16();
        let body = res
            .bytes()
            .await
            .map_err(|e| Error::transport(context, e))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

impl DriveApi for GraphDrive {
    fn put_content<'a>(
        &'a self,
        auth: &'a DriveAuth,
        remote_path: &'a str,
        conflict: ConflictPolicy,
        bytes: Vec<u8>,
    ) -> DriveFuture<'a> {
        Box::pin(async move {
            let url = content_url(&self.graph_base, &auth.account_id, remote_path, conflict);
            let request = self
                .client
                .put(url)
                .bearer_auth(auth.access_token.secret())
                .header("Content-Type", "application/octet-stream")
                .body(bytes);
            self.send(request, "upload request failed").await
        })
    }

    fn list_children<'a>(&'a self, auth: &'a DriveAuth, folder: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            let url = children_url(&self.graph_base, &auth.account_id, folder);
            let request = self.client.get(url).bearer_auth(auth.access_token.secret());
            self.send(request, "list children failed").await
        })
    }

    fn get_page<'a>(&'a self, auth: &'a DriveAuth, url: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            let request = self.client.get(url).bearer_auth(auth.access_token.secret());
            self.send(request, "list children page failed").await
        })
    }

    fn create_upload_session<'a>(
        &'a self,
        auth: &'a DriveAuth,
        remote_path: &'a str,
        conflict: ConflictPolicy,
    ) -> DriveFuture<'a> {
        Box::pin(async move {
            let url = session_url(&self.graph_base, &auth.account_id, remote_path);
            let body = serde_json::json!({
                "item": { "@microsoft.graph.conflictBehavior": conflict.as_str() }
            });
            let request = self
                .client
                .post(url)
                .bearer_auth(auth.access_token.secret())
                .json(&body);
            self.send(request, "create upload session failed").await
        })
    }

    fn put_range<'a>(
        &'a self,
        upload_url: &'a str,
        range: ByteRange,
        bytes: Vec<u8>,
    ) -> DriveFuture<'a> {
        Box::pin(async move {
            // The pre-authenticated upload url rejects an Authorization header.
            let request = self
                .client
                .put(upload_url)
                .header("Content-Range", range.content_range())
                .header("Content-Type", "application/octet-stream")
                .body(bytes);
            self.send(request, "upload range failed").await
        })
    }

    fn session_status<'a>(&'a self, upload_url: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            let request = self.client.get(upload_url);
            self.send(request, "upload session status failed").await
        })
    }

    fn get_item<'a>(&'a self, auth: &'a DriveAuth, remote_path: &'a str) -> DriveFuture<'a> {
        Box::pin(async move {
            let url = item_url(&self.graph_base, &auth.account_id, remote_path);
            let request = self.client.get(url).bearer_auth(auth.access_token.secret());
            self.send(request, "get item failed").await
        })
    }
}

pub fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| utf8_percent_encode(seg, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins the restore target folder and a file's relative path.
pub fn remote_path(target_folder: &str, relative_path: &str) -> String {
    let folder = target_folder.trim_matches('/');
    let rel = relative_path.trim_start_matches('/');
    if folder.is_empty() {
        rel.to_string()
    } else {
        format!("{folder}/{rel}")
    }
}

fn drive_root(graph_base: &str, account_id: &str) -> String {
    format!(
        "{graph_base}/users/{}/drive/root",
        utf8_percent_encode(account_id, PATH_SEGMENT)
    )
}

pub fn content_url(
    graph_base: &str,
    account_id: &str,
    remote_path: &str,
    conflict: ConflictPolicy,
) -> String {
    format!(
        "{}:/{}:/content?{CONFLICT_QUERY_KEY}={}",
        drive_root(graph_base, account_id),
        encode_path(remote_path),
        conflict.as_str()
    )
}

pub fn children_url(graph_base: &str, account_id: &str, folder: &str) -> String {
    let root = drive_root(graph_base, account_id);
    let folder = encode_path(folder);
    if folder.is_empty() {
        format!("{root}/children")
    } else {
        format!("{root}:/{folder}:/children")
    }
}

pub fn session_url(graph_base: &str, account_id: &str, remote_path: &str) -> String {
    format!(
        "{}:/{}:/createUploadSession",
        drive_root(graph_base, account_id),
        encode_path(remote_path)
    )
}

pub fn item_url(graph_base: &str, account_id: &str, remote_path: &str) -> String {
    format!(
        "{}:/{}",
        drive_root(graph_base, account_id),
        encode_path(remote_path)
    )
}
