//! The engine backend seam.
//!
//! The actual AR runtime (feature tracking, sensor fusion, SLAM) is an
//! external collaborator; Lumenar talks to it exclusively through the
//! [`Engine`] and [`EngineDriver`] traits. An FFI binding to a vendor
//! runtime implements these out-of-tree; the in-crate [`ScriptedEngine`]
//! implements them deterministically for tests and headless development.
//!
//! Backends are not expected to be internally thread safe; all trait methods
//! take `&mut self` or `&self` on a value owned by a single session, which
//! serializes access on the render thread.

mod scripted;

pub use scripted::{ScriptedDriver, ScriptedEngine, ScriptedEngineStats};

use crate::config::{CameraFocusMode, CameraVideoMode, LumenarConfig, ViewOrientation};
use crate::error::{EngineCreationError, ObserverCreationError, Result};
use crate::state::StateSnapshot;
use std::fmt;
use uuid::Uuid;

/// Handle to a tracker instance owned by the engine.
///
/// Ids are minted by the backend on observer creation and must be handed
/// back via [`Engine::destroy_observer`] before the engine is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for creating an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverConfig {
    DevicePose,
    ImageTarget {
        database_path: String,
        target_name: String,
        activate: bool,
    },
    ModelTarget {
        database_path: String,
        target_name: String,
        activate: bool,
    },
}

/// Image metadata of a guide view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideViewImage {
    pub width: u32,
    pub height: u32,
}

impl GuideViewImage {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// A rendered hint image assisting the user in aligning the camera with a
/// model target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideView {
    pub name: String,
    pub image: GuideViewImage,
    /// True when the engine has re-rendered the image since it was last
    /// fetched, e.g. after an intrinsics change.
    pub image_outdated: bool,
}

/// A created engine instance.
///
/// Call order is enforced by the session: lifecycle and camera configuration
/// first, then one `acquire_state` per render frame. Observers created on an
/// engine must all be destroyed before the engine value is dropped; backends
/// are expected to surface violations (the scripted backend logs them).
pub trait Engine: Send {
    fn is_running(&self) -> bool;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Select the camera video mode. Only valid while stopped.
    fn set_video_mode(&mut self, mode: CameraVideoMode) -> Result<()>;

    fn set_focus_mode(&mut self, mode: CameraFocusMode) -> Result<()>;

    fn set_projection_planes(&mut self, near: f32, far: f32) -> Result<()>;

    fn set_view_orientation(&mut self, orientation: ViewOrientation) -> Result<()>;

    fn set_render_view_size(&mut self, width: u32, height: u32) -> Result<()>;

    /// Dimensions to use for the video background texture.
    fn video_background_texture_size(&self) -> Result<(u32, u32)>;

    fn create_observer(
        &mut self,
        config: &ObserverConfig,
    ) -> std::result::Result<ObserverId, ObserverCreationError>;

    fn destroy_observer(&mut self, id: ObserverId) -> Result<()>;

    /// Guide views authored for the model target behind `id`. Empty for
    /// observers without guide views.
    fn guide_views(&self, id: ObserverId) -> Result<Vec<GuideView>>;

    /// Acquire the latest state snapshot. The returned value is immutable
    /// and owned by the caller; dropping it releases the frame.
    fn acquire_state(&mut self) -> Result<StateSnapshot>;

    /// Discard the world map and restart tracking from scratch.
    fn reset_world_tracking(&mut self) -> Result<()>;
}

/// Factory for engine instances, the seam where creation errors carry
/// distinct diagnostic codes.
pub trait EngineDriver {
    fn create_engine(
        &mut self,
        config: &LumenarConfig,
    ) -> std::result::Result<Box<dyn Engine>, EngineCreationError>;
}
