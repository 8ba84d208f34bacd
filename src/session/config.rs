use crate::analysis::{Normalizer, PostProcessConfig};
use crate::config::ServerSettings;
use crate::core::CropWindow;
use crate::error::ConfigError;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fields a SETUP event may carry. Anything else rejects the whole event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupPayload {
    pub nplanes: Option<usize>,
    pub nchannels: Option<usize>,
    pub fr: Option<f64>,
    pub folder: Option<PathBuf>,
    pub x_start: Option<usize>,
    pub x_end: Option<usize>,
    pub y_start: Option<usize>,
    pub y_end: Option<usize>,
    pub num_frames_max: Option<usize>,
    /// Seconds; `null` marks an unstimulated cell/trial
    pub stim_times: Option<Vec<Option<f64>>>,
    pub align_to: Option<f64>,
    pub total_length: Option<f64>,
    pub normalizer: Option<Normalizer>,
    pub use_picker: Option<bool>,
}

/// The strongly typed session, owned and mutated only by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub nplanes: usize,
    pub nchannels: usize,
    pub fr: Option<f64>,
    pub folder: Option<PathBuf>,
    pub crop: CropWindow,
    pub num_frames_max: usize,
    pub use_picker: bool,
    pub normalizer: Normalizer,
    pub align_to: f64,
    pub total_length: Option<f64>,
    pub stim_times: Option<Vec<f64>>,
}

macro_rules! apply_field {
    ($payload:expr, $field:ident, $target:expr) => {
        if let Some(value) = $payload.$field {
            info!("Setting {} to {:?}", stringify!($field), value);
            $target = value.into();
        }
    };
}

impl SessionConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            nplanes: 3,
            nchannels: 2,
            fr: None,
            folder: None,
            crop: settings.crop(),
            num_frames_max: settings.num_frames_max,
            use_picker: settings.use_picker,
            normalizer: settings.normalizer,
            align_to: settings.align_to,
            total_length: settings.total_length,
            stim_times: None,
        }
    }

    /// Copy every field present in `payload` onto the session
    pub fn apply(&mut self, payload: SetupPayload) {
        apply_field!(payload, nplanes, self.nplanes);
        apply_field!(payload, nchannels, self.nchannels);
        apply_field!(payload, fr, self.fr);
        apply_field!(payload, folder, self.folder);
        apply_field!(payload, x_start, self.crop.x_start);
        apply_field!(payload, x_end, self.crop.x_end);
        apply_field!(payload, y_start, self.crop.y_start);
        apply_field!(payload, y_end, self.crop.y_end);
        apply_field!(payload, num_frames_max, self.num_frames_max);
        apply_field!(payload, align_to, self.align_to);
        apply_field!(payload, total_length, self.total_length);
        apply_field!(payload, normalizer, self.normalizer);
        apply_field!(payload, use_picker, self.use_picker);

        if let Some(stim_times) = payload.stim_times {
            info!("Setting stim_times for {} entries", stim_times.len());
            self.stim_times = Some(
                stim_times
                    .into_iter()
                    .map(|s| s.unwrap_or(f64::NAN))
                    .collect(),
            );
        }
    }

    /// Everything streaming needs must be present and sane
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fr()?;
        self.folder()?;
        if self.nplanes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "nplanes",
                reason: "at least one plane is required".to_string(),
            });
        }
        if self.nchannels == 0 {
            return Err(ConfigError::InvalidValue {
                field: "nchannels",
                reason: "at least one channel is required".to_string(),
            });
        }
        if self.crop.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "crop",
                reason: format!("window {:?} is empty", self.crop),
            });
        }
        if self.num_frames_max == 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_frames_max",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn fr(&self) -> Result<f64, ConfigError> {
        match self.fr {
            None => Err(ConfigError::MissingField("fr")),
            Some(fr) if !(fr.is_finite() && fr > 0.0) => Err(ConfigError::InvalidValue {
                field: "fr",
                reason: format!("frame rate must be positive, got {}", fr),
            }),
            Some(fr) => Ok(fr),
        }
    }

    pub fn folder(&self) -> Result<&Path, ConfigError> {
        self.folder
            .as_deref()
            .ok_or(ConfigError::MissingField("folder"))
    }

    pub fn post_process(&self) -> Result<PostProcessConfig, ConfigError> {
        Ok(PostProcessConfig {
            fr: self.fr()?,
            normalizer: self.normalizer,
            align_to: self.align_to,
            total_length: self.total_length,
            stim_times: self.stim_times.clone(),
        })
    }
}
