use tracing::{debug, info, warn};

use director_types::{NormalizedPosition, PtzCommand, PtzParameters, PtzCorrection, PtzSpeed};

use crate::correction::{correct_axes, correct_axes_with_speeds};
use crate::{InterruptFlag, MotorBackend, Result};

/// Cadence of the continuous-move integration loop.
pub const STEP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Continuous moves without an explicit timeout run this long.
pub const DEFAULT_CONTINUOUS_TIMEOUT_MS: u64 = 500;

// Per-step integration scale for the angular axes (step interval seconds
// times ten, carried over from the reference controller) and for zoom (step
// interval seconds).
const ANGULAR_STEP_SCALE: f64 = 0.5;
const ZOOM_STEP_SCALE: f64 = 0.05;

/// Executes PTZ command tasks against a motor backend.
///
/// Owns the current PTZ state. Every operation corrects its inputs, clamps
/// the result into the semantic axis ranges, commits the new state and then
/// drives the mount, so `current_ptz` is always in range and an interrupted
/// continuous move leaves the state at the last completed step.
pub struct PtzExecutor {
    correction: PtzCorrection,
    current: PtzParameters,
    backend: Box<dyn MotorBackend>,
}

impl PtzExecutor {
    pub fn new(correction: PtzCorrection, backend: Box<dyn MotorBackend>) -> Self {
        PtzExecutor {
            correction,
            current: PtzParameters::default(),
            backend,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.backend.connect().await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.backend.disconnect().await
    }

    pub fn current_ptz(&self) -> PtzParameters {
        self.current
    }

    /// Run one PTZ command to completion (or interruption). Returns the
    /// committed PTZ state.
    pub async fn execute(
        &mut self,
        command: &PtzCommand,
        interrupt: &InterruptFlag,
    ) -> Result<PtzParameters> {
        match command {
            PtzCommand::AbsoluteMove { position, speed } => {
                self.absolute_move(position, speed.as_ref()).await?;
            }
            PtzCommand::RelativeMove { translation, speed } => {
                let (pan_delta, tilt_delta) =
                    correct_axes(&self.correction, translation.pan_delta, translation.tilt_delta);
                self.apply_speed(speed.as_ref());
                self.current.pan += pan_delta;
                self.current.tilt += tilt_delta;
                self.current.zoom += translation.zoom_delta;
                self.current.clamp_to_range();
                self.drive_motor().await?;
            }
            PtzCommand::ContinuousMove {
                velocity,
                timeout_ms,
            } => {
                let (pan_velocity, tilt_velocity) = correct_axes(
                    &self.correction,
                    velocity.pan_velocity,
                    velocity.tilt_velocity,
                );
                let timeout_ms = if *timeout_ms == 0 {
                    DEFAULT_CONTINUOUS_TIMEOUT_MS
                } else {
                    *timeout_ms
                };
                let steps = (timeout_ms / STEP_INTERVAL.as_millis() as u64).max(1);
                debug!(
                    "continuous move: pan_v={}, tilt_v={}, zoom_v={}, {} steps",
                    pan_velocity, tilt_velocity, velocity.zoom_velocity, steps
                );
                for _ in 0..steps {
                    if interrupt.take() {
                        info!("continuous move interrupted");
                        break;
                    }
                    self.current.pan += pan_velocity * ANGULAR_STEP_SCALE;
                    self.current.tilt += tilt_velocity * ANGULAR_STEP_SCALE;
                    self.current.zoom += velocity.zoom_velocity * ZOOM_STEP_SCALE;
                    self.current.clamp_to_range();
                    self.drive_motor().await?;
                    tokio::time::sleep(STEP_INTERVAL).await;
                }
            }
        }
        Ok(self.current)
    }

    async fn absolute_move(
        &mut self,
        position: &NormalizedPosition,
        speed: Option<&PtzSpeed>,
    ) -> Result<()> {
        // Normalized x/y map onto the full pan/tilt degree ranges.
        let pan = position.x * director_types::PAN_MAX_DEG;
        let tilt = position.y * director_types::TILT_MAX_DEG;

        if let Some(speed) = speed {
            let ((pan, tilt), (pan_speed, tilt_speed)) = correct_axes_with_speeds(
                &self.correction,
                pan,
                tilt,
                speed.pan_speed,
                speed.tilt_speed,
            );
            self.current.pan = pan;
            self.current.tilt = tilt;
            self.current.pan_speed = pan_speed;
            self.current.tilt_speed = tilt_speed;
            self.current.zoom_speed = speed.zoom_speed;
        } else {
            let (pan, tilt) = correct_axes(&self.correction, pan, tilt);
            self.current.pan = pan;
            self.current.tilt = tilt;
        }
        self.current.zoom = position.z;
        self.current.clamp_to_range();
        self.drive_motor().await
    }

    fn apply_speed(&mut self, speed: Option<&PtzSpeed>) {
        if let Some(speed) = speed {
            let (pan_speed, tilt_speed) = if self.correction.swap_pan_tilt {
                (speed.tilt_speed, speed.pan_speed)
            } else {
                (speed.pan_speed, speed.tilt_speed)
            };
            self.current.pan_speed = pan_speed;
            self.current.tilt_speed = tilt_speed;
            self.current.zoom_speed = speed.zoom_speed;
        }
    }

    /// Convert the signed axis state to servo-native angles and drive the
    /// mount. The +90 offset centers the servo; saturation clamps at the
    /// servo limits.
    async fn drive_motor(&mut self) -> Result<()> {
        let pan_angle = (self.current.pan + 90.0).round().clamp(0.0, 180.0) as u8;
        let tilt_angle = (self.current.tilt + 90.0).round().clamp(0.0, 180.0) as u8;
        match self.backend.move_both(pan_angle, tilt_angle).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("servo drive failed: {}", e);
                Err(e)
            }
        }
    }
}
