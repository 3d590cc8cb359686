//! Command line surface of the camera agent.

use std::collections::BTreeMap;

use clap::Parser;
use eyre::WrapErr;
use tracing::{info, warn};

use director_control_client::HttpControlClient;
use director_types::{
    CameraCapabilities, CameraConnection, CameraCredentials, CameraDescriptor, CameraMode,
    ConnectionType, PtzCorrection,
};
use ptz_control::{serial::SerialBackend, MotorBackend, PtzExecutor, VirtualBackend};

use crate::agent::CameraAgent;

#[derive(Debug, Parser)]
#[command(author, version, about = "camera agent for the director control plane")]
pub struct AgentArgs {
    /// Control service endpoint.
    #[arg(long, default_value = "http://localhost:8080")]
    pub url: String,

    /// Camera name to register.
    #[arg(long)]
    pub name: String,

    /// Master frame id grouping this camera in the control plane.
    #[arg(long)]
    pub master_mf_id: String,

    /// Camera mode: AUTONOMOUS or LIGHTWEIGHT.
    #[arg(long, default_value = "AUTONOMOUS")]
    pub mode: String,

    /// Connection type: ONVIF, NDI, USB_SERIAL, WEBRTC or RTSP.
    #[arg(long, default_value = "WEBRTC")]
    pub connection_type: String,

    /// Camera address (IP address or URL).
    #[arg(long, default_value = "127.0.0.1")]
    pub address: String,

    /// Camera port.
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub token: Option<String>,

    /// Disable PTZ support (registers the camera without PTZ and sends
    /// heartbeats instead of polling).
    #[arg(long)]
    pub no_ptz: bool,

    /// Do not drive servo hardware; log movements only.
    #[arg(long)]
    pub virtual_ptz: bool,

    /// Serial port of the servo controller (e.g. /dev/ttyUSB0). Required
    /// unless --virtual-ptz or --no-ptz is given.
    #[arg(long)]
    pub serial_port: Option<String>,

    /// PTZ correction: swap the pan and tilt axes.
    #[arg(long)]
    pub ptz_swap_pan_tilt: bool,

    /// PTZ correction: invert the pan axis.
    #[arg(long)]
    pub ptz_invert_pan: bool,

    /// PTZ correction: invert the tilt axis.
    #[arg(long)]
    pub ptz_invert_tilt: bool,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub insecure: bool,

    /// Free-form metadata, KEY=VALUE (repeatable).
    #[arg(long, num_args = 0.., value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,
}

/// KEY=VALUE pairs into a map; malformed entries are skipped with a
/// warning.
pub fn parse_metadata(items: &[String]) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for item in items {
        match item.split_once('=') {
            Some((key, value)) => {
                result.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                warn!("ignoring malformed metadata \"{}\" (expected KEY=VALUE)", item);
            }
        }
    }
    result
}

pub fn build_descriptor(args: &AgentArgs) -> eyre::Result<CameraDescriptor> {
    let mode: CameraMode = args.mode.parse()?;
    let connection_type: ConnectionType = args.connection_type.parse()?;

    let credentials = CameraCredentials {
        username: args.username.clone(),
        password: args.password.clone(),
        token: args.token.clone(),
    };
    let credentials = if credentials.is_empty() {
        None
    } else {
        Some(credentials)
    };

    let descriptor = CameraDescriptor {
        name: args.name.clone(),
        mode,
        master_mf_id: args.master_mf_id.clone(),
        connection: CameraConnection {
            connection_type,
            address: args.address.clone(),
            port: args.port,
            credentials,
        },
        capabilities: CameraCapabilities {
            supports_ptz: !args.no_ptz,
        },
        metadata: parse_metadata(&args.metadata),
    };
    descriptor.validate()?;
    Ok(descriptor)
}

/// Default `RUST_LOG` and install the tracing subscriber. Call once, before
/// anything logs.
pub fn agent_start() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var(
            "RUST_LOG",
            "camera_agent=info,director_control_client=info,ptz_control=info,warn",
        );
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Build the agent from parsed arguments and run it to completion.
pub async fn run_agent(args: AgentArgs) -> eyre::Result<()> {
    let descriptor = build_descriptor(&args).wrap_err("invalid camera configuration")?;

    let correction = PtzCorrection {
        swap_pan_tilt: args.ptz_swap_pan_tilt,
        invert_pan: args.ptz_invert_pan,
        invert_tilt: args.ptz_invert_tilt,
    };

    let executor = if descriptor.capabilities.supports_ptz {
        let backend: Box<dyn MotorBackend> = if args.virtual_ptz {
            info!("virtual PTZ mode: servo hardware bypassed");
            Box::new(VirtualBackend::new())
        } else {
            let port = args.serial_port.clone().ok_or_else(|| {
                eyre::eyre!("--serial-port is required unless --virtual-ptz or --no-ptz is given")
            })?;
            Box::new(SerialBackend::new(port))
        };
        Some(PtzExecutor::new(correction, backend))
    } else {
        None
    };

    let client = HttpControlClient::new(&args.url, args.insecure);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        info!("got termination signal, shutting down");
        if shutdown_tx.blocking_send(()).is_err() {
            warn!("shutdown already in progress");
        }
    })
    .wrap_err("could not install the signal handler")?;

    let agent = CameraAgent::new(Box::new(client), descriptor, executor);
    agent.run(shutdown_rx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> AgentArgs {
        AgentArgs::parse_from([
            "camera-agent",
            "--name",
            "cam-A",
            "--master-mf-id",
            "mf-0",
        ])
    }

    #[test]
    fn metadata_parsing_skips_malformed() {
        let items = vec![
            "site=studio-1".to_string(),
            "bogus".to_string(),
            "rig = overhead ".to_string(),
        ];
        let map = parse_metadata(&items);
        assert_eq!(map.len(), 2);
        assert_eq!(map["site"], "studio-1");
        assert_eq!(map["rig"], "overhead");
    }

    #[test]
    fn descriptor_from_args() {
        let descriptor = build_descriptor(&base_args()).unwrap();
        assert_eq!(descriptor.name, "cam-A");
        assert_eq!(descriptor.mode, CameraMode::Autonomous);
        assert_eq!(descriptor.connection.connection_type, ConnectionType::Webrtc);
        assert!(descriptor.capabilities.supports_ptz);
        assert!(descriptor.connection.credentials.is_none());
    }

    #[test]
    fn bad_mode_is_rejected() {
        let mut args = base_args();
        args.mode = "TURBO".to_string();
        assert!(build_descriptor(&args).is_err());
    }

    #[test]
    fn credentials_forwarded_when_present() {
        let mut args = base_args();
        args.username = Some("user".to_string());
        let descriptor = build_descriptor(&args).unwrap();
        let creds = descriptor.connection.credentials.unwrap();
        assert_eq!(creds.username.as_deref(), Some("user"));
        assert!(creds.password.is_none());
    }
}
