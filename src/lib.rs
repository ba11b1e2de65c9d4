//! Lumenar: AR session lifecycle and per-frame tracking state orchestration.
//!
//! The heavy lifting of an AR runtime (feature tracking, sensor fusion,
//! SLAM) lives in an engine backend behind the [`engine::Engine`] trait.
//! Lumenar owns everything around it: engine and observer lifetimes, the
//! per-frame acquire/render/release bracket, pose and scale matrices for
//! tracked targets, guide view overlays and the relocalization timeout
//! policy.
//!
//! ```
//! use lumenar::{LumenarConfig, LumenarSession, TargetConfig};
//! use lumenar::engine::{ScriptedDriver, ScriptedEngine};
//!
//! let mut driver = ScriptedDriver::with_engine(ScriptedEngine::new());
//! let config = LumenarConfig::new("your-license-key");
//! let target = TargetConfig::image_target("TestDB1.xml", "VeneraMarker");
//!
//! let mut session = LumenarSession::init(&mut driver, config, target)?;
//! session.start()?;
//!
//! // Per render frame:
//! if session.prepare_to_render().is_ok() {
//!     if let Some(result) = session.image_target_result() {
//!         // draw with result.projection / result.scaled_model_view
//!     }
//! }
//! session.finish_render();
//!
//! session.stop()?;
//! session.deinit();
//! # Ok::<(), lumenar::LumenarError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod math;
pub mod relocalize;
pub mod session;
pub mod state;

pub use config::{
    CameraFocusMode, CameraVideoMode, LumenarConfig, RelocalizationPolicy, TargetConfig,
    TargetKind, VideoBackgroundBackend, ViewOrientation,
};
pub use error::{EngineCreationError, LumenarError, ObserverCreationError, Result};
pub use events::LumenarEvent;
pub use session::{DevicePoseData, GuideViewRenderInfo, LumenarSession, TargetRenderInfo};
pub use state::{
    DevicePoseStatusInfo, Observation, ObservationKind, PoseStatus, RenderState, StateSnapshot,
};
