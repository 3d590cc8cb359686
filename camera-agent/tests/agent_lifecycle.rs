//! Lifecycle tests for the camera agent against a scripted control client.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use camera_agent::CameraAgent;
use director_control_client::{
    ControlClient, ControlClientError, HeartbeatRequest, HeartbeatResponse, PollingRequest,
    PollingResponse, RegisterCameraResponse, RegisteredCamera, UnregisterCameraResponse,
};
use director_types::{
    CameraCapabilities, CameraConnection, CameraDescriptor, CameraId, CameraMode, CommandLayer,
    ConnectionType, NormalizedPosition, PtzCommand, PtzCorrection, PtzVelocity, Task, TaskBody,
    TaskStatus,
};
use ptz_control::{PtzExecutor, VirtualBackend};

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    register_ids: VecDeque<String>,
    poll_responses: VecDeque<PollingResponse>,
    polling_requests: Vec<PollingRequest>,
    heartbeat_requests: Vec<HeartbeatRequest>,
    heartbeat_not_found_once: bool,
}

#[derive(Clone, Default)]
struct MockControlClient(Arc<Mutex<MockState>>);

impl MockControlClient {
    fn with_register_ids(ids: &[&str]) -> Self {
        let mock = Self::default();
        mock.0.lock().register_ids = ids.iter().map(|s| s.to_string()).collect();
        mock
    }

    fn push_poll_response(&self, response: PollingResponse) {
        self.0.lock().poll_responses.push_back(response);
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    fn polling_requests(&self) -> Vec<PollingRequest> {
        self.0.lock().polling_requests.clone()
    }

    fn heartbeat_requests(&self) -> Vec<HeartbeatRequest> {
        self.0.lock().heartbeat_requests.clone()
    }
}

#[async_trait]
impl ControlClient for MockControlClient {
    async fn register_camera(
        &mut self,
        descriptor: &CameraDescriptor,
    ) -> Result<RegisterCameraResponse, ControlClientError> {
        let mut state = self.0.lock();
        let id = state
            .register_ids
            .pop_front()
            .unwrap_or_else(|| "c1".to_string());
        state.calls.push(format!("register:{}", id));
        Ok(RegisterCameraResponse {
            camera: RegisteredCamera {
                id: CameraId::new(id),
                name: descriptor.name.clone(),
                mode: descriptor.mode,
                status: "ACTIVE".to_string(),
                master_mf_id: descriptor.master_mf_id.clone(),
            },
        })
    }

    async fn unregister_camera(
        &mut self,
        camera_id: &CameraId,
    ) -> Result<UnregisterCameraResponse, ControlClientError> {
        self.0
            .lock()
            .calls
            .push(format!("unregister:{}", camera_id));
        Ok(UnregisterCameraResponse { success: true })
    }

    async fn heartbeat(
        &mut self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ControlClientError> {
        let mut state = self.0.lock();
        state.calls.push("heartbeat".to_string());
        state.heartbeat_requests.push(request.clone());
        if state.heartbeat_not_found_once {
            state.heartbeat_not_found_once = false;
            return Err(ControlClientError::NotFound);
        }
        Ok(HeartbeatResponse {
            acknowledged: true,
            server_timestamp_ms: request.timestamp_ms + 1,
        })
    }

    async fn polling(
        &mut self,
        request: &PollingRequest,
    ) -> Result<PollingResponse, ControlClientError> {
        let mut state = self.0.lock();
        state.calls.push("poll".to_string());
        state.polling_requests.push(request.clone());
        Ok(state.poll_responses.pop_front().unwrap_or_default())
    }
}

fn descriptor(supports_ptz: bool) -> CameraDescriptor {
    CameraDescriptor {
        name: "cam-A".to_string(),
        mode: CameraMode::Autonomous,
        master_mf_id: "mf-0".to_string(),
        connection: CameraConnection {
            connection_type: ConnectionType::Webrtc,
            address: "192.168.1.10".to_string(),
            port: None,
            credentials: None,
        },
        capabilities: CameraCapabilities { supports_ptz },
        metadata: BTreeMap::new(),
    }
}

fn ptz_task(task_id: &str, command: PtzCommand) -> Task {
    Task {
        task_id: task_id.to_string(),
        layer: CommandLayer::Ptz,
        status: TaskStatus::Executing,
        body: TaskBody::PtzCommand(command),
    }
}

fn virtual_executor() -> (PtzExecutor, VirtualBackend) {
    let backend = VirtualBackend::new();
    let executor = PtzExecutor::new(PtzCorrection::default(), Box::new(backend.clone()));
    (executor, backend)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn registration_roundtrip() {
    let mock = MockControlClient::default();
    let (executor, _backend) = virtual_executor();
    let agent = CameraAgent::new(Box::new(mock.clone()), descriptor(true), Some(executor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    let calls = mock.calls();
    assert_eq!(calls.first().map(|s| s.as_str()), Some("register:c1"));
    assert_eq!(calls.last().map(|s| s.as_str()), Some("unregister:c1"));
    assert_eq!(calls.iter().filter(|c| c.starts_with("register")).count(), 1);
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("unregister")).count(),
        1
    );
    assert!(calls.iter().filter(|c| *c == "poll").count() >= 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn absolute_task_is_executed_and_reported() {
    let mock = MockControlClient::default();
    mock.push_poll_response(PollingResponse {
        current_command: Some(ptz_task(
            "T7",
            PtzCommand::AbsoluteMove {
                position: NormalizedPosition {
                    x: 0.5,
                    y: -0.2,
                    z: 0.3,
                },
                speed: None,
            },
        )),
        ..Default::default()
    });

    let (executor, backend) = virtual_executor();
    let agent = CameraAgent::new(Box::new(mock.clone()), descriptor(true), Some(executor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    // The motor was driven exactly once, with the clamped servo angles.
    assert_eq!(backend.commands(), vec![(180, 72)]);

    let requests = mock.polling_requests();
    let completed: Vec<&PollingRequest> = requests
        .iter()
        .filter(|r| r.completed_task_id.as_deref() == Some("T7"))
        .collect();
    // Completion is reported in exactly one polling exchange.
    assert_eq!(completed.len(), 1);
    let ptz = completed[0].current_ptz.unwrap();
    assert_eq!(ptz.pan, 90.0);
    assert_eq!(ptz.tilt, -18.0);
    assert_eq!(ptz.zoom, 0.3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn continuous_move_is_interrupted_by_polling() {
    let mock = MockControlClient::default();
    mock.push_poll_response(PollingResponse {
        current_command: Some(ptz_task(
            "T9",
            PtzCommand::ContinuousMove {
                velocity: PtzVelocity {
                    pan_velocity: 1.0,
                    tilt_velocity: 0.0,
                    zoom_velocity: 0.0,
                },
                timeout_ms: 10_000,
            },
        )),
        ..Default::default()
    });
    mock.push_poll_response(PollingResponse {
        interrupt: true,
        ..Default::default()
    });

    let (executor, backend) = virtual_executor();
    let agent = CameraAgent::new(Box::new(mock.clone()), descriptor(true), Some(executor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    // A 10 s continuous move would take 200 steps; the interrupt at the
    // second poll (t = 0.5 s) stopped it at the next step boundary.
    let steps = backend.commands().len();
    assert!(steps >= 1 && steps < 30, "got {} steps", steps);

    let requests = mock.polling_requests();
    // While executing: status EXECUTING with the task id.
    assert!(requests.iter().any(|r| {
        r.executing_task_id.as_deref() == Some("T9")
            && r.device_status == director_types::DeviceStatus::Executing
    }));
    // After the interrupt: back to IDLE and the completion is reported.
    assert!(requests
        .iter()
        .any(|r| r.completed_task_id.as_deref() == Some("T9")));
    let last = requests.last().unwrap();
    assert_eq!(last.device_status, director_types::DeviceStatus::Idle);
    assert!(last.executing_task_id.is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn heartbeat_not_found_triggers_one_reregistration() {
    let mock = MockControlClient::with_register_ids(&["c1", "c2"]);
    mock.0.lock().heartbeat_not_found_once = true;

    let agent = CameraAgent::new(Box::new(mock.clone()), descriptor(false), None);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(std::time::Duration::from_secs(16)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    let calls = mock.calls();
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("register")).count(),
        2,
        "exactly one re-registration per NOT_FOUND: {:?}",
        calls
    );

    let heartbeats = mock.heartbeat_requests();
    assert!(heartbeats.len() >= 3);
    assert_eq!(heartbeats[0].camera_id.as_str(), "c1");
    // Every heartbeat after the re-registration uses the new id.
    assert!(heartbeats[1..]
        .iter()
        .all(|r| r.camera_id.as_str() == "c2"));
    assert_eq!(calls.last().map(|s| s.as_str()), Some("unregister:c2"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cinematic_task_is_acknowledged() {
    let mock = MockControlClient::default();
    mock.push_poll_response(PollingResponse {
        current_command: Some(Task {
            task_id: "C1".to_string(),
            layer: CommandLayer::Cinematic,
            status: TaskStatus::Executing,
            body: TaskBody::CinematicCommand(director_types::CinematicCommand {
                name: "orbit".to_string(),
                params: BTreeMap::new(),
            }),
        }),
        ..Default::default()
    });

    let (executor, backend) = virtual_executor();
    let agent = CameraAgent::new(Box::new(mock.clone()), descriptor(true), Some(executor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    shutdown_tx.send(()).await.unwrap();
    handle.await.unwrap().unwrap();

    // No motor movement, but the task still completes.
    assert!(backend.commands().is_empty());
    assert!(mock
        .polling_requests()
        .iter()
        .any(|r| r.completed_task_id.as_deref() == Some("C1")));
}
