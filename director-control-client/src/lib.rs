//! Client port for the camera control services.
//!
//! The [ControlClient] trait models the four request/response RPCs a camera
//! agent issues against the control plane: register, unregister, heartbeat
//! and polling. [HttpControlClient] is the JSON-over-HTTP adapter used in
//! production; tests substitute scripted implementations of the trait.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use director_types::{
    CameraDescriptor, CameraId, CameraMode, CameraStatus, DeviceStatus, PtzParameters, Task,
};

pub type Result<T> = std::result::Result<T, ControlClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ControlClientError {
    /// The control service does not know this camera id (typically after a
    /// server restart). The agent re-registers when it sees this.
    #[error("camera not found")]
    NotFound,
    #[error("HTTP status {0} calling {1}")]
    HttpStatus(http::StatusCode, String),
    #[error("{0}")]
    Hyper(#[from] hyper::Error),
    #[error("{0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Request(#[from] http::Error),
}

impl ControlClientError {
    /// Transient errors are logged and the calling loop continues; only
    /// `NotFound` changes agent behavior.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ControlClientError::NotFound)
    }
}

/// The camera record as the control service stores it.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RegisteredCamera {
    pub id: CameraId,
    pub name: String,
    pub mode: CameraMode,
    pub status: String,
    pub master_mf_id: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RegisterCameraResponse {
    pub camera: RegisteredCamera,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UnregisterCameraRequest {
    pub camera_id: CameraId,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UnregisterCameraResponse {
    pub success: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub camera_id: CameraId,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ptz: Option<PtzParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CameraStatus>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    pub server_timestamp_ms: i64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PollingRequest {
    pub camera_id: CameraId,
    pub device_status: DeviceStatus,
    pub camera_status: CameraStatus,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executing_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ptz: Option<PtzParameters>,
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct PollingResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_command: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_command: Option<Task>,
    #[serde(default)]
    pub interrupt: bool,
}

/// The four control-plane RPCs, from the camera's point of view.
#[async_trait::async_trait]
pub trait ControlClient: Send {
    async fn register_camera(
        &mut self,
        descriptor: &CameraDescriptor,
    ) -> Result<RegisterCameraResponse>;

    async fn unregister_camera(
        &mut self,
        camera_id: &CameraId,
    ) -> Result<UnregisterCameraResponse>;

    async fn heartbeat(&mut self, request: &HeartbeatRequest) -> Result<HeartbeatResponse>;

    async fn polling(&mut self, request: &PollingRequest) -> Result<PollingResponse>;
}

/// JSON-over-HTTP adapter for the control services.
///
/// RPCs are POSTs of JSON bodies to `{base_url}/v1/{Rpc}`. A 404 maps to
/// [ControlClientError::NotFound]; other non-success statuses surface as
/// transient transport errors. Transport security is terminated outside
/// this process; `--insecure` is accepted by the CLI and only logged here.
#[derive(Clone)]
pub struct HttpControlClient {
    base_url: String,
    client: hyper_util::client::legacy::Client<
        hyper_util::client::legacy::connect::HttpConnector,
        http_body_util::Full<bytes::Bytes>,
    >,
}

impl HttpControlClient {
    pub fn new(base_url: impl Into<String>, insecure: bool) -> Self {
        if insecure {
            warn!("TLS certificate verification disabled by --insecure");
        }
        let client = hyper_util::client::legacy::Client::builder(
            hyper_util::rt::TokioExecutor::new(),
        )
        .build_http();
        HttpControlClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post_json<Req, Resp>(&mut self, rpc: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/v1/{}", self.base_url, rpc);
        debug!("POST {}", url);

        let body = serde_json::to_vec(request)?;
        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri(&url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(http_body_util::Full::new(bytes::Bytes::from(body)))?;

        let resp = self.client.request(req).await?;
        let status = resp.status();
        if status == http::StatusCode::NOT_FOUND {
            return Err(ControlClientError::NotFound);
        }
        if !status.is_success() {
            return Err(ControlClientError::HttpStatus(status, url));
        }

        let collected = {
            use http_body_util::BodyExt;
            resp.into_body().collect().await?
        };
        Ok(serde_json::from_slice(&collected.to_bytes())?)
    }
}

#[async_trait::async_trait]
impl ControlClient for HttpControlClient {
    async fn register_camera(
        &mut self,
        descriptor: &CameraDescriptor,
    ) -> Result<RegisterCameraResponse> {
        self.post_json("RegisterCamera", descriptor).await
    }

    async fn unregister_camera(
        &mut self,
        camera_id: &CameraId,
    ) -> Result<UnregisterCameraResponse> {
        let request = UnregisterCameraRequest {
            camera_id: camera_id.clone(),
        };
        self.post_json("UnregisterCamera", &request).await
    }

    async fn heartbeat(&mut self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        self.post_json("Heartbeat", request).await
    }

    async fn polling(&mut self, request: &PollingRequest) -> Result<PollingResponse> {
        self.post_json("Polling", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_request_omits_empty_fields() {
        let req = PollingRequest {
            camera_id: CameraId::new("c1".to_string()),
            device_status: DeviceStatus::Idle,
            camera_status: CameraStatus::Active,
            timestamp_ms: 1000,
            completed_task_id: None,
            executing_task_id: None,
            current_ptz: None,
        };
        let val = serde_json::to_value(&req).unwrap();
        assert_eq!(val["camera_id"], "c1");
        assert_eq!(val["device_status"], "IDLE");
        assert!(val.get("completed_task_id").is_none());
    }

    #[test]
    fn polling_response_defaults() {
        let resp: PollingResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.current_command.is_none());
        assert!(resp.next_command.is_none());
        assert!(!resp.interrupt);
    }

    #[test]
    fn transient_classification() {
        assert!(!ControlClientError::NotFound.is_transient());
        assert!(ControlClientError::HttpStatus(
            http::StatusCode::INTERNAL_SERVER_ERROR,
            "url".to_string()
        )
        .is_transient());
    }

    #[test]
    fn heartbeat_response_roundtrip() {
        let resp = HeartbeatResponse {
            acknowledged: true,
            server_timestamp_ms: 123,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: HeartbeatResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }
}
