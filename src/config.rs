//! Session and target configuration for Lumenar

use std::time::Duration;

/// Rendering backend used for the camera video background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoBackgroundBackend {
    /// Platform-preferred backend.
    #[default]
    Default,
    /// No video background rendering (e.g. offline processing).
    Headless,
    GlEs3,
    Dx11,
    Metal,
}

/// Camera video mode preset applied before the engine is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraVideoMode {
    #[default]
    Default,
    OptimizeSpeed,
    OptimizeQuality,
}

/// Camera focus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFocusMode {
    Unknown,
    Normal,
    /// Trigger a single autofocus operation in the current position.
    TriggerAuto,
    /// Continuous autofocus; the mode the session restores after start.
    ContinuousAuto,
    Infinity,
    Macro,
    Fixed,
}

/// Device orientation of the rendering view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// Policy for recovering from a device tracker that is stuck relocalizing.
///
/// Vision-based relocalization can loop indefinitely in degenerate
/// environments; after `timeout` of continuous relocalizing the session asks
/// the engine to reset world tracking rather than leaving the user stuck.
/// The threshold is product policy, not an engine contract, so it is
/// configurable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocalizationPolicy {
    pub timeout: Duration,
}

impl Default for RelocalizationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
        }
    }
}

/// Configuration passed to [`crate::session::LumenarSession::init`].
///
/// Platform data that the C-style API would reach for through process
/// globals (JVM pointer, activity handle) is carried here explicitly.
#[derive(Debug, Clone)]
pub struct LumenarConfig {
    pub license_key: String,
    /// Opaque platform payload handed to the engine backend unchanged.
    pub app_data: Option<String>,
    pub vb_backend: VideoBackgroundBackend,
    /// Preferred camera video mode, applied before each start.
    pub video_mode: CameraVideoMode,
    /// Near clipping plane for the projection matrix.
    pub near_plane: f32,
    /// Far clipping plane for the projection matrix.
    pub far_plane: f32,
    pub relocalization: RelocalizationPolicy,
}

impl Default for LumenarConfig {
    fn default() -> Self {
        Self {
            license_key: String::new(),
            app_data: None,
            vb_backend: VideoBackgroundBackend::Default,
            video_mode: CameraVideoMode::Default,
            near_plane: 0.01,
            far_plane: 5.0,
            relocalization: RelocalizationPolicy::default(),
        }
    }
}

impl LumenarConfig {
    pub fn new(license_key: impl Into<String>) -> Self {
        Self {
            license_key: license_key.into(),
            ..Default::default()
        }
    }

    pub fn app_data(mut self, data: impl Into<String>) -> Self {
        self.app_data = Some(data.into());
        self
    }

    pub fn vb_backend(mut self, backend: VideoBackgroundBackend) -> Self {
        self.vb_backend = backend;
        self
    }

    pub fn video_mode(mut self, mode: CameraVideoMode) -> Self {
        self.video_mode = mode;
        self
    }

    pub fn clipping_planes(mut self, near: f32, far: f32) -> Self {
        self.near_plane = near;
        self.far_plane = far;
        self
    }

    pub fn relocalization_timeout(mut self, timeout: Duration) -> Self {
        self.relocalization = RelocalizationPolicy { timeout };
        self
    }
}

/// Which kind of target the session tracks alongside the device pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    ImageTarget,
    ModelTarget,
}

/// Target observer configuration.
///
/// The database path points at an externally authored recognition database;
/// it is passed to the engine backend verbatim.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub kind: TargetKind,
    pub database_path: String,
    pub target_name: String,
    /// Activate the observer immediately on creation.
    pub activate: bool,
}

impl TargetConfig {
    pub fn image_target(database_path: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::ImageTarget,
            database_path: database_path.into(),
            target_name: target_name.into(),
            activate: true,
        }
    }

    pub fn model_target(database_path: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::ModelTarget,
            database_path: database_path.into(),
            target_name: target_name.into(),
            activate: true,
        }
    }

    pub fn activate(mut self, activate: bool) -> Self {
        self.activate = activate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_sample_policy() {
        let config = LumenarConfig::default();
        assert_eq!(config.near_plane, 0.01);
        assert_eq!(config.far_plane, 5.0);
        assert_eq!(config.relocalization.timeout, Duration::from_secs(15));
        assert_eq!(config.video_mode, CameraVideoMode::Default);
    }

    #[test]
    fn builder_chains() {
        let config = LumenarConfig::new("key")
            .video_mode(CameraVideoMode::OptimizeSpeed)
            .clipping_planes(0.1, 100.0)
            .relocalization_timeout(Duration::from_secs(5));
        assert_eq!(config.license_key, "key");
        assert_eq!(config.video_mode, CameraVideoMode::OptimizeSpeed);
        assert_eq!(config.far_plane, 100.0);
        assert_eq!(config.relocalization.timeout, Duration::from_secs(5));
    }
}
