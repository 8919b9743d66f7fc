//! # Simulator session settings
//!
//! Settings are either generated from the `sim_session.toml` parameter file, or taken verbatim
//! from an externally authored settings file. Generated settings are rebuilt for every episode so
//! the weather and the non-player seeds are drawn afresh each time.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use rand::{seq::SliceRandom, Rng};
use serde::Deserialize;
use std::path::Path;

// Internal
use comms_if::sim::{CameraSettings, QualityLevel, SessionSettings, SettingsSpec};
use util::params;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters used to generate the simulator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SimSessionParams {
    pub synchronous_mode: bool,

    pub send_non_player_agents_info: bool,

    pub number_of_vehicles: u32,

    pub number_of_pedestrians: u32,

    /// Weather presets to choose from, one is picked at random per episode
    pub weather_ids: Vec<u32>,

    /// Draw new non-player seeds for every episode
    pub randomise_seeds: bool,

    pub cameras: Vec<CameraSettings>,
}

/// Where the settings of each episode come from.
#[derive(Debug, Clone)]
pub enum SettingsSource {
    Generated {
        params: SimSessionParams,
        quality_level: QualityLevel,
    },

    /// Text of a settings file, sent to the simulator untouched
    Raw(String),
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not load the session parameters: {0}")]
    ParamLoadError(params::LoadError),

    #[error("Could not read the settings file {0:?}: {1}")]
    FileReadError(std::path::PathBuf, std::io::Error),

    #[error("At least one weather id must be given")]
    NoWeather,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SettingsSource {
    /// Generate settings from the given parameter file, relative to the params directory.
    pub fn from_params(
        param_file_path: &str,
        quality_level: QualityLevel,
    ) -> Result<Self, SettingsError> {
        let params: SimSessionParams =
            params::load(param_file_path).map_err(SettingsError::ParamLoadError)?;

        if params.weather_ids.is_empty() {
            return Err(SettingsError::NoWeather);
        }

        info!(
            "Generating simulator settings from {} at {} quality",
            param_file_path, quality_level
        );

        Ok(SettingsSource::Generated {
            params,
            quality_level,
        })
    }

    /// Use the contents of a settings file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        std::fs::read_to_string(path.as_ref())
            .map(SettingsSource::Raw)
            .map_err(|e| SettingsError::FileReadError(path.as_ref().to_path_buf(), e))
    }

    /// Build the settings of the next episode.
    pub fn build<R: Rng>(&self, rng: &mut R) -> Result<SettingsSpec, SettingsError> {
        match self {
            SettingsSource::Generated {
                params,
                quality_level,
            } => {
                let weather_id = *params
                    .weather_ids
                    .choose(rng)
                    .ok_or(SettingsError::NoWeather)?;

                let (seed_vehicles, seed_pedestrians) = if params.randomise_seeds {
                    (Some(rng.gen()), Some(rng.gen()))
                } else {
                    (None, None)
                };

                Ok(SettingsSpec::Generated(SessionSettings {
                    synchronous_mode: params.synchronous_mode,
                    send_non_player_agents_info: params.send_non_player_agents_info,
                    number_of_vehicles: params.number_of_vehicles,
                    number_of_pedestrians: params.number_of_pedestrians,
                    weather_id,
                    quality_level: *quality_level,
                    seed_vehicles,
                    seed_pedestrians,
                    cameras: params.cameras.clone(),
                }))
            }
            SettingsSource::Raw(s) => Ok(SettingsSpec::Raw(s.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
