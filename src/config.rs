//! Node configuration, loaded once at startup.
//!
//! The configuration file is YAML: capture mode, detection sensitivity,
//! decimation stride, and the per-mode stream settings. Unknown modes and
//! unreadable files are startup errors; nothing here is re-read at runtime.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Which sensor the node is consuming.
///
/// The mode is selected once at startup and drives preprocessing, extractor
/// layering, and stream selection for the pipeline's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Camera,
    Sonar,
}

impl CaptureMode {
    /// Scale-space layering for the feature extractor.
    ///
    /// Sonar imagery is coarse and low-contrast, so it gets a single octave
    /// layer; camera imagery uses the detector's default layering.
    pub fn octave_layers(&self) -> i32 {
        match self {
            CaptureMode::Camera => 3,
            CaptureMode::Sonar => 1,
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera" => Ok(CaptureMode::Camera),
            "sonar" => Ok(CaptureMode::Sonar),
            other => Err(format!("unknown capture mode '{other}' (expected 'camera' or 'sonar')")),
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Camera => write!(f, "camera"),
            CaptureMode::Sonar => write!(f, "sonar"),
        }
    }
}

/// Settings for the camera image stream.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraStreamConfig {
    /// Name of the inbound image stream.
    #[serde(default = "default_camera_stream")]
    pub stream: String,
    /// Transport hint forwarded to the messaging layer.
    #[serde(default = "default_transport")]
    pub transport: String,
}

/// Settings for the sonar image stream.
#[derive(Debug, Clone, Deserialize)]
pub struct SonarStreamConfig {
    /// Name of the inbound image stream.
    #[serde(default = "default_sonar_stream")]
    pub stream: String,
    /// Transport hint forwarded to the messaging layer.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Grayscale source image for the static validity mask.
    #[serde(default = "default_sonar_mask")]
    pub mask: PathBuf,
}

/// Top-level perception node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PerceptionConfig {
    /// Active capture mode (`camera` or `sonar`).
    #[serde(default = "default_mode")]
    pub mode: CaptureMode,
    /// Feature detection sensitivity (SIFT contrast threshold).
    #[serde(default = "default_threshold")]
    pub detection_threshold: f64,
    /// Process one frame, then skip this many minus one. 0 processes all.
    #[serde(default)]
    pub frames_to_jump: u32,
    #[serde(default = "default_camera_config")]
    pub camera: CameraStreamConfig,
    #[serde(default = "default_sonar_config")]
    pub sonar: SonarStreamConfig,
}

impl PerceptionConfig {
    /// Load and validate the configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("failed to open config {}", path.display()))?;
        let config: PerceptionConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Name of the image stream the active mode subscribes to.
    pub fn active_stream(&self) -> &str {
        match self.mode {
            CaptureMode::Camera => &self.camera.stream,
            CaptureMode::Sonar => &self.sonar.stream,
        }
    }

    /// Transport hint for the active mode's subscription.
    pub fn transport_hint(&self) -> &str {
        match self.mode {
            CaptureMode::Camera => &self.camera.transport,
            CaptureMode::Sonar => &self.sonar.transport,
        }
    }
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            detection_threshold: default_threshold(),
            frames_to_jump: 0,
            camera: default_camera_config(),
            sonar: default_sonar_config(),
        }
    }
}

fn default_mode() -> CaptureMode {
    CaptureMode::Camera
}

fn default_threshold() -> f64 {
    0.04
}

fn default_transport() -> String {
    "raw".to_string()
}

fn default_camera_stream() -> String {
    "image_raw".to_string()
}

fn default_sonar_stream() -> String {
    "sonar".to_string()
}

fn default_sonar_mask() -> PathBuf {
    PathBuf::from("sonar_mask.jpg")
}

fn default_camera_config() -> CameraStreamConfig {
    CameraStreamConfig {
        stream: default_camera_stream(),
        transport: default_transport(),
    }
}

fn default_sonar_config() -> SonarStreamConfig {
    SonarStreamConfig {
        stream: default_sonar_stream(),
        transport: default_transport(),
        mask: default_sonar_mask(),
    }
}
