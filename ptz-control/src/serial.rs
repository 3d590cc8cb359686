//! USB/serial servo controller backend.
//!
//! Line protocol at 115200 baud: each command is ASCII
//! `"{servo_id},{angle}\n"` (servo 1 = pan, servo 2 = tilt, servo 0 queries
//! positions). The controller answers `"POS:{pos1},{pos2}\n"` and emits the
//! token `"ERROR"` on a bad command. Large excursions are interpolated in
//! unit steps so both servos arrive together.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info, warn};

use crate::{MotorBackend, PtzError, Result};

pub const BAUD_RATE: u32 = 115_200;
pub const DEFAULT_STEP_DELAY: std::time::Duration = std::time::Duration::from_millis(15);
const REPLY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ServoCommand {
    Move { servo_id: u8, angle: u8 },
    QueryPositions,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ServoReply {
    Positions(u8, u8),
}

/// Codec for the servo controller line protocol.
#[derive(Default)]
pub struct ServoCodec;

impl Decoder for ServoCodec {
    type Item = ServoReply;
    type Error = PtzError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(newline) = buf.iter().position(|b| *b == b'\n') {
            let line = buf.split_to(newline + 1);
            let line = std::str::from_utf8(&line[..newline])
                .unwrap_or("")
                .trim()
                .to_string();
            if let Some(rest) = line.strip_prefix("POS:") {
                let mut parts = rest.splitn(2, ',');
                let pos1 = parts.next().and_then(|p| p.trim().parse::<u8>().ok());
                let pos2 = parts.next().and_then(|p| p.trim().parse::<u8>().ok());
                if let (Some(pos1), Some(pos2)) = (pos1, pos2) {
                    return Ok(Some(ServoReply::Positions(pos1, pos2)));
                }
                warn!("unparseable position report: \"{}\"", line);
            } else if line == "ERROR" {
                return Err(PtzError::DeviceError);
            } else if !line.is_empty() {
                debug!("ignoring serial line: \"{}\"", line);
            }
        }
        Ok(None)
    }
}

impl Encoder<ServoCommand> for ServoCodec {
    type Error = PtzError;

    fn encode(&mut self, cmd: ServoCommand, buf: &mut BytesMut) -> Result<()> {
        let (servo_id, angle) = match cmd {
            ServoCommand::Move { servo_id, angle } => (servo_id, angle),
            ServoCommand::QueryPositions => (0, 0),
        };
        buf.extend_from_slice(format!("{},{}\n", servo_id, angle).as_bytes());
        Ok(())
    }
}

/// Serial servo mount. Tracks the last known position of both servos so
/// movements can be interpolated from where the hardware actually is.
pub struct SerialBackend {
    port_path: String,
    step_delay: std::time::Duration,
    positions: (u8, u8),
    framed: Option<Framed<tokio_serial::SerialStream, ServoCodec>>,
}

impl SerialBackend {
    pub fn new(port_path: impl Into<String>) -> Self {
        SerialBackend {
            port_path: port_path.into(),
            step_delay: DEFAULT_STEP_DELAY,
            positions: (90, 90),
            framed: None,
        }
    }

    /// Set the per-step delay of the interpolated movement.
    pub fn set_speed(&mut self, delay: std::time::Duration) {
        info!("servo step speed set: {:?}/step", delay);
        self.step_delay = delay;
    }

    pub fn positions(&self) -> (u8, u8) {
        self.positions
    }

    /// Drive both servos back to 90°.
    pub async fn center(&mut self) -> Result<()> {
        info!("centering both servos to 90°");
        self.move_both(90, 90).await
    }

    async fn send(&mut self, cmd: ServoCommand) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(PtzError::NotConnected)?;
        framed.send(cmd).await
    }

    /// Ask the controller where the servos are; keeps the cached positions
    /// if the controller stays silent.
    async fn query_positions(&mut self) -> Result<()> {
        self.send(ServoCommand::QueryPositions).await?;
        let framed = self.framed.as_mut().ok_or(PtzError::NotConnected)?;
        match tokio::time::timeout(REPLY_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(ServoReply::Positions(pos1, pos2)))) => {
                debug!("servo positions reported: {}°, {}°", pos1, pos2);
                self.positions = (pos1, pos2);
                Ok(())
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(PtzError::NotConnected),
            Err(_) => {
                warn!("no position report within {:?}", REPLY_TIMEOUT);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl MotorBackend for SerialBackend {
    async fn connect(&mut self) -> Result<()> {
        info!("connecting to servo controller on {}", self.port_path);
        #[allow(unused_mut)]
        let mut port = tokio_serial::new(&self.port_path, BAUD_RATE).open_native_async()?;

        #[cfg(unix)]
        port.set_exclusive(false)?;

        let mut framed = ServoCodec.framed(port);

        // Drain whatever the controller printed while we were away.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(50), framed.next()).await;

        self.framed = Some(framed);
        self.query_positions().await?;
        info!("servo controller connected on {}", self.port_path);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.framed.take().is_some() {
            info!("servo controller disconnected from {}", self.port_path);
        }
        Ok(())
    }

    async fn move_both(&mut self, pan_angle: u8, tilt_angle: u8) -> Result<()> {
        if pan_angle > 180 || tilt_angle > 180 {
            return Err(PtzError::AngleOutOfRange(pan_angle.max(tilt_angle) as u16));
        }

        let (current1, current2) = self.positions;
        let diff1 = pan_angle as i32 - current1 as i32;
        let diff2 = tilt_angle as i32 - current2 as i32;
        let max_steps = diff1.abs().max(diff2.abs());
        if max_steps == 0 {
            return Ok(());
        }

        info!(
            "servo move: pan {}°->{}°, tilt {}°->{}°",
            current1, pan_angle, current2, tilt_angle
        );

        // Scale each axis to the larger excursion so both servos arrive at
        // the same time.
        let step1 = diff1 as f64 / max_steps as f64;
        let step2 = diff2 as f64 / max_steps as f64;
        for i in 1..=max_steps {
            let angle1 = (current1 as f64 + step1 * i as f64).round() as u8;
            let angle2 = (current2 as f64 + step2 * i as f64).round() as u8;
            self.send(ServoCommand::Move {
                servo_id: 1,
                angle: angle1,
            })
            .await?;
            self.send(ServoCommand::Move {
                servo_id: 2,
                angle: angle2,
            })
            .await?;
            tokio::time::sleep(self.step_delay).await;
        }

        self.positions = (pan_angle, tilt_angle);
        Ok(())
    }
}
