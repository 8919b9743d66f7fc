//! # Simulator Interface
//!
//! Messages exchanged between the track controller and the driving simulator. The simulator runs
//! in synchronous mode: every [`SimRequest`] is answered by exactly one [`SimResponse`], and the
//! simulation only advances a step once the control for the current step has been received.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Settings for a new simulation session generated by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// Run the simulator in lock-step with the client
    pub synchronous_mode: bool,

    /// Include information about non-player agents in the measurements
    pub send_non_player_agents_info: bool,

    pub number_of_vehicles: u32,

    pub number_of_pedestrians: u32,

    pub weather_id: u32,

    pub quality_level: QualityLevel,

    /// Seed for the non-player vehicles, `None` lets the simulator choose
    pub seed_vehicles: Option<u64>,

    /// Seed for the pedestrians, `None` lets the simulator choose
    pub seed_pedestrians: Option<u64>,

    /// Cameras attached to the player vehicle
    pub cameras: Vec<CameraSettings>,
}

/// A camera attached to the player vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraSettings {
    /// Name of the camera, which is also the key of its frames in [`SensorData`]
    pub name: String,

    pub post_processing: PostProcessing,

    /// Image width in pixels
    pub image_size_x: u32,

    /// Image height in pixels
    pub image_size_y: u32,

    /// Position relative to the vehicle in meters
    pub position_m: [f64; 3],
}

/// Description of the scene returned after loading new settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneDescription {
    /// Positions the player vehicle can start an episode from
    pub player_start_spots: Vec<Location>,
}

/// A location in the simulator's world frame.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Measurements of one simulation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurements {
    /// Simulator frame counter
    pub frame_number: u64,

    /// Simulation time in milliseconds
    pub game_timestamp_ms: u64,

    pub player_measurements: PlayerMeasurements,

    /// Number of non-player agents in the scene
    pub num_non_player_agents: usize,
}

/// Measurements of the player vehicle.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlayerMeasurements {
    pub location: Location,

    /// Speed along the vehicle's forward axis in meters/second
    pub forward_speed_ms: f64,
}

/// A single image from one of the player's cameras.
///
/// Pixel values are little-endian `f32`s, row major, base64 encoded for transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorFrame {
    pub width: u32,
    pub height: u32,
    pub data: String,
}

/// Vehicle control demands sent to the simulator.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VehicleControl {
    pub steer: f64,
    pub throttle: f64,
    pub brake: f64,
    pub hand_brake: bool,
    pub reverse: bool,
}

/// Sensor frames of one step, keyed by camera name.
pub type SensorData = HashMap<String, SensorFrame>;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Graphics quality level of the simulator. A lower level runs considerably faster.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum QualityLevel {
    Low,
    Epic,
}

/// Post processing applied by a camera.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostProcessing {
    /// Final rendered scene
    SceneFinal,

    /// Ground truth depth
    Depth,
}

/// The settings to load into the simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SettingsSpec {
    /// Settings generated by the controller
    Generated(SessionSettings),

    /// Contents of an externally authored settings file, passed through untouched
    Raw(String),
}

/// Requests sent to the simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SimRequest {
    LoadSettings(SettingsSpec),
    StartEpisode { player_start: usize },
    ReadData,
    SendControl(VehicleControl),
}

/// Responses from the simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SimResponse {
    Scene(SceneDescription),
    EpisodeStarted,
    Data {
        measurements: Measurements,
        sensor_data: SensorData,
    },
    ControlAck,

    /// The simulator rejected the request
    Error(String),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SensorFrameError {
    #[error("Could not decode the frame data: {0}")]
    DecodeError(String),

    #[error("Expected {expected} bytes of pixel data for a {width}x{height} frame, found {found}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Unknown quality level \"{0}\", expected one of Low or Epic")]
pub struct ParseQualityLevelError(String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorFrame {
    /// Build a frame from row major pixel values.
    pub fn from_values(width: u32, height: u32, values: &[f32]) -> Self {
        let mut bytes = vec![0u8; values.len() * 4];
        LittleEndian::write_f32_into(values, &mut bytes);

        Self {
            width,
            height,
            data: base64::encode(&bytes),
        }
    }

    /// Number of pixels in the frame.
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Decode the row major pixel values.
    pub fn values(&self) -> Result<Vec<f32>, SensorFrameError> {
        let bytes =
            base64::decode(&self.data).map_err(|e| SensorFrameError::DecodeError(e.to_string()))?;

        let expected = self.num_pixels() * 4;
        if bytes.len() != expected {
            return Err(SensorFrameError::SizeMismatch {
                width: self.width,
                height: self.height,
                expected,
                found: bytes.len(),
            });
        }

        let mut values = vec![0f32; self.num_pixels()];
        LittleEndian::read_f32_into(&bytes, &mut values);

        Ok(values)
    }
}

impl FromStr for QualityLevel {
    type Err = ParseQualityLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityLevel::Low),
            "epic" => Ok(QualityLevel::Epic),
            _ => Err(ParseQualityLevelError(s.into())),
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityLevel::Low => write!(f, "Low"),
            QualityLevel::Epic => write!(f, "Epic"),
        }
    }
}

impl VehicleControl {
    /// Control with the given steer and throttle, no brake, forward gear.
    pub fn drive(steer: f64, throttle: f64) -> Self {
        Self {
            steer,
            throttle,
            brake: 0.0,
            hand_brake: false,
            reverse: false,
        }
    }
}
