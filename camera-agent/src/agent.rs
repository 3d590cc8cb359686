//! The camera agent lifecycle.
//!
//! Register with the control service, then either poll for PTZ command
//! tasks every 500 ms (cameras with PTZ support; the polls double as the
//! liveness signal) or send heartbeats every 5 s. A `NOT_FOUND` answer
//! means the control plane forgot us (typically a server restart): the
//! agent re-registers once, adopts the fresh camera id and carries on. On
//! shutdown the camera is deregistered.
//!
//! Task execution runs on its own task, fed through a bounded channel and
//! answered through a latest-wins slot, so polling continues while a
//! continuous move is in flight and an `interrupt=true` response can reach
//! the executor between movement steps.

use eyre::WrapErr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use director_control_client::{
    ControlClient, ControlClientError, HeartbeatRequest, PollingRequest,
};
use director_types::{timestamp, CameraDescriptor, CameraId, CameraStatus, PtzParameters, Task, TaskBody};
use latest_wins::LatestValue;
use ptz_control::{InterruptFlag, PtzExecutor};

use crate::task_state::TaskStateMachine;

pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Result of one task execution, handed back to the polling loop.
struct ExecOutcome {
    task_id: String,
    success: bool,
    ptz: PtzParameters,
}

async fn executor_task(
    mut executor: PtzExecutor,
    mut task_rx: mpsc::Receiver<Task>,
    outcome_slot: LatestValue<ExecOutcome>,
    interrupt: InterruptFlag,
) {
    while let Some(task) = task_rx.recv().await {
        let task_id = task.task_id.clone();
        let success = match &task.body {
            TaskBody::PtzCommand(command) => match executor.execute(command, &interrupt).await {
                Ok(_) => true,
                Err(e) => {
                    error!("task {} failed: {}", task_id, e);
                    false
                }
            },
            TaskBody::CinematicCommand(command) => {
                info!("cinematic task {} ({}) acknowledged", task_id, command.name);
                true
            }
        };
        info!("task {} completed (success={})", task_id, success);
        outcome_slot.put(ExecOutcome {
            task_id,
            success,
            ptz: executor.current_ptz(),
        });
    }
    debug!("executor task exiting");
}

pub struct CameraAgent {
    client: Box<dyn ControlClient>,
    descriptor: CameraDescriptor,
    executor: Option<PtzExecutor>,
    camera_id: Option<CameraId>,
    state: TaskStateMachine,
    interrupt: InterruptFlag,
    outcome_slot: LatestValue<ExecOutcome>,
    last_ptz: PtzParameters,
    poll_interval: std::time::Duration,
    heartbeat_interval: std::time::Duration,
}

impl CameraAgent {
    pub fn new(
        client: Box<dyn ControlClient>,
        descriptor: CameraDescriptor,
        executor: Option<PtzExecutor>,
    ) -> Self {
        let interrupt = InterruptFlag::new();
        CameraAgent {
            client,
            descriptor,
            executor,
            camera_id: None,
            state: TaskStateMachine::new(interrupt.clone()),
            interrupt,
            outcome_slot: LatestValue::new(),
            last_ptz: PtzParameters::default(),
            poll_interval: POLL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Run the full lifecycle until `shutdown_rx` fires. Startup failures
    /// (backend connect, registration) are returned; everything after
    /// registration is handled in-loop.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> eyre::Result<()> {
        let supports_ptz = self.descriptor.capabilities.supports_ptz;

        let mut executor = self.executor.take();
        if let Some(executor) = executor.as_mut() {
            executor
                .connect()
                .await
                .wrap_err("PTZ backend initialization failed")?;
        }

        let response = self
            .client
            .register_camera(&self.descriptor)
            .await
            .wrap_err("camera registration refused")?;
        info!(
            "registered camera \"{}\" as {}",
            self.descriptor.name, response.camera.id
        );
        self.camera_id = Some(response.camera.id);

        let exec_tx = executor.map(|executor| {
            let (exec_tx, task_rx) = mpsc::channel::<Task>(1);
            tokio::spawn(executor_task(
                executor,
                task_rx,
                self.outcome_slot.clone(),
                self.interrupt.clone(),
            ));
            exec_tx
        });

        if supports_ptz {
            self.ptz_polling_loop(exec_tx, &mut shutdown_rx).await;
        } else {
            self.heartbeat_loop(&mut shutdown_rx).await;
        }

        // Graceful deregistration on the way out; cancellation bypasses the
        // in-loop error handling entirely.
        if let Some(camera_id) = self.camera_id.take() {
            match self.client.unregister_camera(&camera_id).await {
                Ok(resp) if resp.success => {
                    info!("deregistered camera {}", camera_id);
                }
                Ok(_) => {
                    warn!("control service refused to deregister {}", camera_id);
                }
                Err(e) => {
                    error!("deregistration of {} failed: {}", camera_id, e);
                }
            }
        }
        Ok(())
    }

    fn camera_id(&self) -> CameraId {
        // Only called between registration and deregistration.
        self.camera_id.clone().expect("camera is registered")
    }

    /// One in-place re-registration after the control service reported the
    /// camera id unknown.
    async fn reregister(&mut self) {
        warn!("camera id unknown to control service; re-registering");
        match self.client.register_camera(&self.descriptor).await {
            Ok(response) => {
                info!("re-registered, new camera id {}", response.camera.id);
                self.camera_id = Some(response.camera.id);
            }
            Err(e) => {
                error!("re-registration failed: {}", e);
            }
        }
    }

    async fn ptz_polling_loop(
        &mut self,
        exec_tx: Option<mpsc::Sender<Task>>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) {
        info!("entering PTZ polling loop ({:?} cadence)", self.poll_interval);
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, leaving polling loop");
                    return;
                }
                _ = interval.tick() => {}
            }

            // Collect any finished execution before reporting state.
            if let Some(outcome) = self.outcome_slot.take() {
                self.last_ptz = outcome.ptz;
                if !outcome.success {
                    warn!("reporting task {} after failed execution", outcome.task_id);
                }
                self.state.finish(&outcome.task_id);
            }

            let completed = self.state.completed_task_id().cloned();
            let request = PollingRequest {
                camera_id: self.camera_id(),
                device_status: self.state.device_status(),
                camera_status: CameraStatus::Active,
                timestamp_ms: timestamp::now_ms(),
                completed_task_id: completed.clone(),
                executing_task_id: self.state.executing_task_id().cloned(),
                current_ptz: Some(self.last_ptz),
            };

            match self.client.polling(&request).await {
                Ok(response) => {
                    if let Some(reported) = completed {
                        self.state.clear_completed(&reported);
                    }
                    if response.interrupt {
                        self.state.request_interrupt();
                    }
                    if let Some(next) = &response.next_command {
                        debug!("next command prefetched: {}", next.task_id);
                    }
                    if let Some(task) = response.current_command {
                        self.maybe_start_task(task, exec_tx.as_ref());
                    }
                }
                Err(ControlClientError::NotFound) => {
                    self.reregister().await;
                }
                Err(e) => {
                    // Transient; the poll interval provides the backoff.
                    error!("polling error: {}", e);
                }
            }
        }
    }

    fn maybe_start_task(&mut self, task: Task, exec_tx: Option<&mpsc::Sender<Task>>) {
        let exec_tx = match exec_tx {
            Some(exec_tx) => exec_tx,
            None => {
                warn!("task {} received but no executor configured", task.task_id);
                return;
            }
        };
        if !self.state.try_begin(&task.task_id) {
            return;
        }
        info!("task accepted: {}", task.task_id);
        if let Err(e) = exec_tx.try_send(task) {
            // The channel holds one task and we only send while idle, so
            // this indicates the executor task died.
            error!("could not hand task to executor: {}", e);
            let task_id = match e {
                mpsc::error::TrySendError::Full(task) => task.task_id,
                mpsc::error::TrySendError::Closed(task) => task.task_id,
            };
            self.state.finish(&task_id);
        }
    }

    async fn heartbeat_loop(&mut self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            "entering heartbeat loop ({:?} cadence)",
            self.heartbeat_interval
        );
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, leaving heartbeat loop");
                    return;
                }
                _ = interval.tick() => {}
            }

            let request = HeartbeatRequest {
                camera_id: self.camera_id(),
                timestamp_ms: timestamp::now_ms(),
                current_ptz: None,
                status: Some(CameraStatus::Active),
            };
            match self.client.heartbeat(&request).await {
                Ok(response) => {
                    debug!(
                        "heartbeat acknowledged={} server_time={}",
                        response.acknowledged, response.server_timestamp_ms
                    );
                }
                Err(ControlClientError::NotFound) => {
                    self.reregister().await;
                }
                Err(e) => {
                    error!("heartbeat error: {}", e);
                }
            }
        }
    }
}
