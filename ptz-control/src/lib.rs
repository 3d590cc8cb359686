//! PTZ movement execution for a pan/tilt servo mount.
//!
//! The executor translates command-space PTZ operations (absolute, relative,
//! continuous) through the configured axis correction into bounded servo
//! angles, committing the current PTZ state after every step so observers
//! only ever see in-range values. Motor hardware is behind the
//! [MotorBackend] port; the serial implementation speaks the two-servo
//! line protocol, the virtual implementation logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod correction;
mod executor;
pub mod serial;

pub use executor::{PtzExecutor, DEFAULT_CONTINUOUS_TIMEOUT_MS, STEP_INTERVAL};

pub type Result<T> = std::result::Result<T, PtzError>;

#[derive(thiserror::Error, Debug)]
pub enum PtzError {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("servo angle {0} out of range (must be 0-180)")]
    AngleOutOfRange(u16),
    #[error("servo controller reported an error")]
    DeviceError,
    #[error("not connected to servo controller")]
    NotConnected,
}

/// Cross-task interrupt signal for the continuous-move loop.
///
/// The polling loop requests an interrupt; the executor observes it at its
/// next 50 ms step and clears it. SeqCst ordering gives the required
/// happens-before edge between set and check.
#[derive(Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Consume the flag: true exactly once per request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Capability port for the pan/tilt mount.
///
/// Angles are servo-native: 0-180 degrees, 90 is centered. Implementations
/// serialize their own access; the executor issues at most one movement at a
/// time.
#[async_trait::async_trait]
pub trait MotorBackend: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn move_both(&mut self, pan_angle: u8, tilt_angle: u8) -> Result<()>;
}

/// Backend that performs no hardware access. Every movement is logged and
/// recorded, which also makes it the observation point for tests.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    history: Arc<std::sync::Mutex<Vec<(u8, u8)>>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `move_both` calls seen so far, oldest first.
    pub fn commands(&self) -> Vec<(u8, u8)> {
        self.history.lock().expect("virtual backend lock").clone()
    }
}

#[async_trait::async_trait]
impl MotorBackend for VirtualBackend {
    async fn connect(&mut self) -> Result<()> {
        tracing::info!("virtual PTZ backend connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        tracing::info!("virtual PTZ backend disconnected");
        Ok(())
    }

    async fn move_both(&mut self, pan_angle: u8, tilt_angle: u8) -> Result<()> {
        if pan_angle > 180 || tilt_angle > 180 {
            return Err(PtzError::AngleOutOfRange(pan_angle.max(tilt_angle) as u16));
        }
        tracing::info!(
            "virtual servo move: pan={}°, tilt={}°",
            pan_angle,
            tilt_angle
        );
        self.history
            .lock()
            .expect("virtual backend lock")
            .push((pan_angle, tilt_angle));
        Ok(())
    }
}
