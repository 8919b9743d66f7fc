//! # Simulation Client
//!
//! The SimClient drives the simulator on behalf of the track controller. The simulator runs in
//! synchronous mode, so the client and the simulator alternate strictly: the client requests the
//! data of the current step, and the simulator only advances once it has received the control for
//! that step.
//!
//! Messages are the JSON encoded [`SimRequest`]s and [`SimResponse`]s defined in `comms_if`,
//! exchanged over a ZMQ REQ socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    sim::{
        Measurements, SceneDescription, SensorData, SettingsSpec, SimRequest, SimResponse,
        VehicleControl,
    },
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time to wait for the simulator to answer a request.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Receive poll period in milliseconds, the interrupt flag is checked this often while waiting.
const RECV_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A lock-step session with the simulator.
pub trait SimSession {
    /// Load new settings, returning the description of the resulting scene.
    fn configure(&mut self, settings: &SettingsSpec) -> Result<SceneDescription, SimClientError>;

    /// Start a new episode with the player at the given start spot.
    fn start_episode(&mut self, player_start: usize) -> Result<(), SimClientError>;

    /// Read the measurements and sensor data of the current step.
    fn read_data(&mut self) -> Result<(Measurements, SensorData), SimClientError>;

    /// Send the control for the current step, which advances the simulation.
    fn send_control(&mut self, control: &VehicleControl) -> Result<(), SimClientError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SimClient {
    socket: MonitoredSocket,

    endpoint: String,

    /// Set when the user asks for the program to stop
    interrupt: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimClientError {
    #[error("Could not connect to the simulator: {0}")]
    ConnectionFailed(MonitoredSocketError),

    #[error("The client is not connected to the simulator")]
    NotConnected,

    #[error("The simulator did not respond within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Could not send the request to the simulator: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the simulator: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the simulator: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The simulator rejected the request: {0}")]
    ServerError(String),

    #[error("Expected a {expected} response, got {found:?}")]
    UnexpectedResponse {
        expected: &'static str,
        found: Box<SimResponse>,
    },

    #[error("Interrupted while waiting for the simulator")]
    Interrupted,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimClient {
    /// Connect to the simulator listening on the given host and port.
    pub fn connect(
        ctx: &zmq::Context,
        host: &str,
        port: u16,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self, SimClientError> {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: RECV_POLL_MS,
            send_timeout: 1000,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let endpoint = format!("tcp://{}:{}", host, port);

        let socket = MonitoredSocket::new(ctx, zmq::REQ, socket_options, &endpoint)
            .map_err(SimClientError::ConnectionFailed)?;

        debug!("Connected to the simulator at {}", endpoint);

        Ok(Self {
            socket,
            endpoint,
            interrupt,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a request and wait for the simulator's response.
    ///
    /// Error responses from the simulator are returned as `SimClientError::ServerError`.
    fn request(&mut self, request: &SimRequest) -> Result<SimResponse, SimClientError> {
        if !self.socket.connected() {
            return Err(SimClientError::NotConnected);
        }

        let req_str =
            serde_json::to_string(request).map_err(SimClientError::SerializationError)?;

        self.socket
            .send(&req_str, 0)
            .map_err(SimClientError::SendError)?;

        let start = Instant::now();

        let msg = loop {
            match self.socket.recv_msg(0) {
                Ok(m) => break m,
                Err(zmq::Error::EAGAIN) => {
                    if self.interrupt.load(Ordering::Relaxed) {
                        return Err(SimClientError::Interrupted);
                    }
                    if start.elapsed() > RESPONSE_TIMEOUT {
                        return Err(SimClientError::ConnectionTimeout(RESPONSE_TIMEOUT));
                    }
                    if !self.socket.connected() {
                        warn!("Lost connection to the simulator while waiting for a response");
                        return Err(SimClientError::NotConnected);
                    }
                }
                Err(e) => return Err(SimClientError::RecvError(e)),
            }
        };

        let response: SimResponse = serde_json::from_str(msg.as_str().unwrap_or(""))
            .map_err(SimClientError::DeserializeError)?;

        match response {
            SimResponse::Error(e) => Err(SimClientError::ServerError(e)),
            r => Ok(r),
        }
    }
}

impl SimSession for SimClient {
    fn configure(&mut self, settings: &SettingsSpec) -> Result<SceneDescription, SimClientError> {
        match self.request(&SimRequest::LoadSettings(settings.clone()))? {
            SimResponse::Scene(s) => Ok(s),
            r => Err(SimClientError::unexpected("Scene", r)),
        }
    }

    fn start_episode(&mut self, player_start: usize) -> Result<(), SimClientError> {
        match self.request(&SimRequest::StartEpisode { player_start })? {
            SimResponse::EpisodeStarted => Ok(()),
            r => Err(SimClientError::unexpected("EpisodeStarted", r)),
        }
    }

    fn read_data(&mut self) -> Result<(Measurements, SensorData), SimClientError> {
        match self.request(&SimRequest::ReadData)? {
            SimResponse::Data {
                measurements,
                sensor_data,
            } => Ok((measurements, sensor_data)),
            r => Err(SimClientError::unexpected("Data", r)),
        }
    }

    fn send_control(&mut self, control: &VehicleControl) -> Result<(), SimClientError> {
        match self.request(&SimRequest::SendControl(*control))? {
            SimResponse::ControlAck => Ok(()),
            r => Err(SimClientError::unexpected("ControlAck", r)),
        }
    }
}

impl SimClientError {
    fn unexpected(expected: &'static str, found: SimResponse) -> Self {
        SimClientError::UnexpectedResponse {
            expected,
            found: Box::new(found),
        }
    }

    /// True if the error comes from the connection to the simulator rather than the content of
    /// the exchange. These are recovered from by reconnecting.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SimClientError::ConnectionFailed(_)
                | SimClientError::NotConnected
                | SimClientError::ConnectionTimeout(_)
                | SimClientError::SendError(_)
                | SimClientError::RecvError(_)
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
