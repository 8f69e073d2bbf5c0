//! Docker volume plugin protocol.
//!
//! JSON over HTTP/1.1 on a Unix socket. Every endpoint is a POST whose
//! path names the call (`/VolumeDriver.Mount`); bodies use PascalCase keys.
//! Each response carries `Err`, empty on success.
//!
//! ```text
//! volume host --POST /VolumeDriver.Mount {"Name":"db","ID":"c1"}--> plugin
//!             <--200 {"Err":"","Mountpoint":"/var/lib/.../db"}-------
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

use vaultfs_kernel::{CreateOutcome, DriverError, VolumeDriver, VolumeInfo, VolumeStatus};

use crate::constants::{PLUGIN_CONTENT_TYPE, VOLUME_DRIVER_INTERFACE};

// ============================================================================
// Wire types
// ============================================================================

/// Body of every volume driver request. Unused fields are absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub opts: Option<BTreeMap<String, String>>,
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// A volume as reported by Get and List.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireVolume {
    pub name: String,
    pub mountpoint: String,
    pub created_at: String,
    pub status: VolumeStatus,
}

impl From<VolumeInfo> for WireVolume {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint.display().to_string(),
            created_at: info.created_at.to_rfc3339(),
            status: info.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireCapabilities {
    pub scope: String,
}

/// Response body for every volume driver call.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeResponse {
    pub err: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<WireVolume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<WireVolume>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<WireCapabilities>,
}

impl VolumeResponse {
    fn error(err: impl std::fmt::Display) -> Self {
        Self {
            err: err.to_string(),
            ..Default::default()
        }
    }

    fn mountpoint(path: &Path) -> Self {
        Self {
            mountpoint: Some(path.display().to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: Vec<&'static str>,
}

/// Status code and JSON body to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self {
                status: 500,
                body: format!("{{\"Err\":\"encode response: {}\"}}", e).into_bytes(),
            },
        }
    }

    fn volume(response: VolumeResponse) -> Self {
        let status = if response.err.is_empty() { 200 } else { 500 };
        Self::json(status, &response)
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Handle one plugin call.
pub async fn dispatch(driver: &VolumeDriver, endpoint: &str, body: &[u8]) -> Reply {
    tracing::debug!(endpoint, "plugin request");

    if endpoint == "/Plugin.Activate" {
        return Reply::json(
            200,
            &ActivateResponse {
                implements: vec![VOLUME_DRIVER_INTERFACE],
            },
        );
    }

    let Some(call) = endpoint.strip_prefix("/VolumeDriver.") else {
        return Reply::json(404, &VolumeResponse::error(format!("unknown endpoint {}", endpoint)));
    };

    let request = match parse_request(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "malformed request body");
            return Reply::json(400, &VolumeResponse::error(format!("malformed request: {}", e)));
        }
    };

    let name = request.name.clone();
    let response = match call {
        "Create" => create(driver, request).await,
        "Remove" => driver
            .remove(&request.name)
            .await
            .map(|_| VolumeResponse::default()),
        "Get" => driver.get(&request.name).map(|info| VolumeResponse {
            volume: Some(info.into()),
            ..Default::default()
        }),
        "List" => Ok(VolumeResponse {
            volumes: Some(driver.list().into_iter().map(WireVolume::from).collect()),
            ..Default::default()
        }),
        "Path" => driver
            .path(&request.name)
            .map(|path| VolumeResponse::mountpoint(&path)),
        "Mount" => driver
            .mount(&request.name, &request.id)
            .await
            .map(|path| VolumeResponse::mountpoint(&path)),
        "Unmount" => driver
            .unmount(&request.name, &request.id)
            .await
            .map(|_| VolumeResponse::default()),
        "Capabilities" => Ok(VolumeResponse {
            capabilities: Some(WireCapabilities {
                scope: driver.capabilities().scope.to_string(),
            }),
            ..Default::default()
        }),
        _ => {
            return Reply::json(404, &VolumeResponse::error(format!("unknown endpoint {}", endpoint)));
        }
    };

    match response {
        Ok(response) => Reply::volume(response),
        Err(e) => {
            tracing::warn!(endpoint, volume = %name, error = %e, "request failed");
            Reply::volume(VolumeResponse::error(e))
        }
    }
}

fn parse_request(body: &[u8]) -> serde_json::Result<VolumeRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VolumeRequest::default());
    }
    serde_json::from_slice(body)
}

async fn create(driver: &VolumeDriver, request: VolumeRequest) -> Result<VolumeResponse, DriverError> {
    let options = request.opts.unwrap_or_default();
    match driver.create(&request.name, options).await? {
        CreateOutcome::Created | CreateOutcome::Scoped { .. } => Ok(VolumeResponse::default()),
        // Registered, but still on the root token.
        CreateOutcome::Unscoped { policy, error } => {
            let error = DriverError::BackendUnavailable(error);
            Ok(VolumeResponse::error(format!(
                "volume {} created without policy {}: {}",
                request.name, policy, error
            )))
        }
    }
}

// ============================================================================
// Socket server
// ============================================================================

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("cannot listen on {path}: {reason}")]
    Bind { path: PathBuf, reason: String },
}

/// Plugin protocol server bound to a Unix socket.
pub struct PluginServer {
    server: Arc<tiny_http::Server>,
    socket: PathBuf,
}

impl std::fmt::Debug for PluginServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginServer")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl PluginServer {
    /// Bind `socket`, creating its directory and replacing a stale socket file.
    pub fn bind(socket: impl Into<PathBuf>) -> Result<Self, ServeError> {
        let socket = socket.into();

        if let Some(dir) = socket.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ServeError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        match std::fs::remove_file(&socket) {
            Ok(()) => tracing::debug!(socket = %socket.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ServeError::Io {
                    path: socket,
                    source,
                });
            }
        }

        let server = tiny_http::Server::http_unix(&socket).map_err(|e| ServeError::Bind {
            path: socket.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!(socket = %socket.display(), "plugin socket listening");
        Ok(Self {
            server: Arc::new(server),
            socket,
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Handle that stops [`run`](Self::run) when called.
    pub fn stopper(&self) -> impl Fn() + Send + Sync + 'static {
        let server = Arc::clone(&self.server);
        move || server.unblock()
    }

    /// Serve requests until stopped, one thread per request.
    ///
    /// Driver calls run on `runtime`. Blocks the calling thread.
    pub fn run(&self, driver: Arc<VolumeDriver>, runtime: Handle) {
        for request in self.server.incoming_requests() {
            let driver = Arc::clone(&driver);
            let runtime = runtime.clone();
            std::thread::spawn(move || handle(request, &driver, &runtime));
        }
        tracing::info!(socket = %self.socket.display(), "plugin socket closed");
    }
}

impl Drop for PluginServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket);
    }
}

fn handle(mut request: tiny_http::Request, driver: &VolumeDriver, runtime: &Handle) {
    let endpoint = request.url().to_string();
    let mut body = Vec::new();
    let reply = match request.as_reader().read_to_end(&mut body) {
        Ok(_) => runtime.block_on(dispatch(driver, &endpoint, &body)),
        Err(e) => Reply::json(400, &VolumeResponse::error(format!("read body: {}", e))),
    };

    let mut response = tiny_http::Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(header) = tiny_http::Header::from_bytes(&b"Content-Type"[..], PLUGIN_CONTENT_TYPE.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        tracing::warn!(endpoint, error = %e, "failed to send response");
    }
}
