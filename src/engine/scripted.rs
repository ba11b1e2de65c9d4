//! Deterministic in-memory engine backend.
//!
//! `ScriptedEngine` replays a pre-built sequence of state snapshots and
//! records every side-effecting call, which makes the session controller
//! fully exercisable without a vendor runtime or a camera.

use crate::config::{CameraFocusMode, CameraVideoMode, LumenarConfig, ViewOrientation};
use crate::engine::{Engine, EngineDriver, GuideView, ObserverConfig, ObserverId};
use crate::error::{EngineCreationError, LumenarError, ObserverCreationError, Result};
use crate::state::StateSnapshot;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared with the test that scripted the engine.
///
/// The engine itself is consumed by the session as a `Box<dyn Engine>`;
/// assertions go through a clone of this handle instead.
#[derive(Debug, Default)]
pub struct ScriptedEngineStats {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub states_acquired: AtomicUsize,
    pub world_tracking_resets: AtomicUsize,
    /// Observers still alive when the engine was dropped. Non-zero means the
    /// teardown-order invariant was violated.
    pub leaked_observers: AtomicUsize,
    pub focus_modes: Mutex<Vec<CameraFocusMode>>,
    pub video_modes: Mutex<Vec<CameraVideoMode>>,
    pub projection_planes: Mutex<Option<(f32, f32)>>,
    pub view_orientation: Mutex<Option<ViewOrientation>>,
    pub render_view_size: Mutex<Option<(u32, u32)>>,
}

impl ScriptedEngineStats {
    pub fn resets(&self) -> usize {
        self.world_tracking_resets.load(Ordering::Relaxed)
    }

    pub fn last_focus_mode(&self) -> Option<CameraFocusMode> {
        self.focus_modes.lock().unwrap().last().copied()
    }

    pub fn projection_planes(&self) -> Option<(f32, f32)> {
        *self.projection_planes.lock().unwrap()
    }

    pub fn view_orientation(&self) -> Option<ViewOrientation> {
        *self.view_orientation.lock().unwrap()
    }

    pub fn render_view_size(&self) -> Option<(u32, u32)> {
        *self.render_view_size.lock().unwrap()
    }
}

pub struct ScriptedEngine {
    running: bool,
    frames: VecDeque<StateSnapshot>,
    /// Replayed once the script is exhausted, like a tracker that keeps
    /// reporting its latest state.
    last_frame: Option<StateSnapshot>,
    observers: HashMap<ObserverId, ObserverConfig>,
    guide_views: Vec<GuideView>,
    texture_size: (u32, u32),
    fail_target_observer: Option<ObserverCreationError>,
    fail_world_tracking_reset: bool,
    stats: Arc<ScriptedEngineStats>,
}

impl ScriptedEngine {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            running: false,
            frames: VecDeque::new(),
            last_frame: None,
            observers: HashMap::new(),
            guide_views: Vec::new(),
            texture_size: (1280, 720),
            fail_target_observer: None,
            fail_world_tracking_reset: false,
            stats: Arc::new(ScriptedEngineStats::default()),
        }
    }

    /// Append one frame to the replay script.
    pub fn push_frame(&mut self, snapshot: StateSnapshot) {
        self.frames.push_back(snapshot);
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = StateSnapshot>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn with_guide_views(mut self, guide_views: Vec<GuideView>) -> Self {
        self.guide_views = guide_views;
        self
    }

    pub fn with_texture_size(mut self, width: u32, height: u32) -> Self {
        self.texture_size = (width, height);
        self
    }

    /// Script the next image/model target observer creation to fail.
    pub fn fail_target_observer(mut self, error: ObserverCreationError) -> Self {
        self.fail_target_observer = Some(error);
        self
    }

    pub fn fail_world_tracking_reset(mut self) -> Self {
        self.fail_world_tracking_reset = true;
        self
    }

    pub fn stats(&self) -> Arc<ScriptedEngineStats> {
        Arc::clone(&self.stats)
    }
}

impl Engine for ScriptedEngine {
    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(LumenarError::Engine("engine is already running".into()));
        }
        self.running = true;
        self.stats.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Err(LumenarError::Engine("engine is not running".into()));
        }
        self.running = false;
        self.stats.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_video_mode(&mut self, mode: CameraVideoMode) -> Result<()> {
        if self.running {
            return Err(LumenarError::Engine(
                "video mode cannot be changed while the engine is running".into(),
            ));
        }
        self.stats.video_modes.lock().unwrap().push(mode);
        Ok(())
    }

    fn set_focus_mode(&mut self, mode: CameraFocusMode) -> Result<()> {
        if !self.running {
            return Err(LumenarError::Engine(
                "focus mode requires a running camera".into(),
            ));
        }
        self.stats.focus_modes.lock().unwrap().push(mode);
        Ok(())
    }

    fn set_projection_planes(&mut self, near: f32, far: f32) -> Result<()> {
        if near <= 0.0 || far <= near {
            return Err(LumenarError::Engine(format!(
                "invalid projection planes near={near} far={far}"
            )));
        }
        *self.stats.projection_planes.lock().unwrap() = Some((near, far));
        Ok(())
    }

    fn set_view_orientation(&mut self, orientation: ViewOrientation) -> Result<()> {
        *self.stats.view_orientation.lock().unwrap() = Some(orientation);
        Ok(())
    }

    fn set_render_view_size(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(LumenarError::Engine("render view size must be non-zero".into()));
        }
        *self.stats.render_view_size.lock().unwrap() = Some((width, height));
        Ok(())
    }

    fn video_background_texture_size(&self) -> Result<(u32, u32)> {
        Ok(self.texture_size)
    }

    fn create_observer(
        &mut self,
        config: &ObserverConfig,
    ) -> std::result::Result<ObserverId, ObserverCreationError> {
        if !matches!(config, ObserverConfig::DevicePose) {
            if let Some(error) = self.fail_target_observer.take() {
                return Err(error);
            }
        }
        let id = ObserverId::new();
        self.observers.insert(id, config.clone());
        Ok(id)
    }

    fn destroy_observer(&mut self, id: ObserverId) -> Result<()> {
        if self.observers.remove(&id).is_none() {
            return Err(LumenarError::Engine(format!("unknown observer {id}")));
        }
        Ok(())
    }

    fn guide_views(&self, id: ObserverId) -> Result<Vec<GuideView>> {
        match self.observers.get(&id) {
            Some(ObserverConfig::ModelTarget { .. }) => Ok(self.guide_views.clone()),
            Some(_) => Ok(Vec::new()),
            None => Err(LumenarError::Engine(format!("unknown observer {id}"))),
        }
    }

    fn acquire_state(&mut self) -> Result<StateSnapshot> {
        if !self.running {
            return Err(LumenarError::Engine("engine is not running".into()));
        }
        self.stats.states_acquired.fetch_add(1, Ordering::Relaxed);
        if let Some(snapshot) = self.frames.pop_front() {
            self.last_frame = Some(snapshot.clone());
            return Ok(snapshot);
        }
        Ok(self.last_frame.clone().unwrap_or_else(StateSnapshot::empty))
    }

    fn reset_world_tracking(&mut self) -> Result<()> {
        self.stats
            .world_tracking_resets
            .fetch_add(1, Ordering::Relaxed);
        if self.fail_world_tracking_reset {
            return Err(LumenarError::Engine("world tracking reset failed".into()));
        }
        Ok(())
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        if !self.observers.is_empty() {
            log::warn!(
                "Engine dropped with {} observer(s) still alive",
                self.observers.len()
            );
            self.stats
                .leaked_observers
                .store(self.observers.len(), Ordering::Relaxed);
        }
    }
}

/// Driver handing out a single pre-scripted engine, or a scripted creation
/// failure for exercising init error paths.
pub struct ScriptedDriver {
    engine: Option<ScriptedEngine>,
    error: Option<EngineCreationError>,
}

impl ScriptedDriver {
    pub fn with_engine(engine: ScriptedEngine) -> Self {
        Self {
            engine: Some(engine),
            error: None,
        }
    }

    pub fn failing(error: EngineCreationError) -> Self {
        Self {
            engine: None,
            error: Some(error),
        }
    }
}

impl EngineDriver for ScriptedDriver {
    fn create_engine(
        &mut self,
        config: &LumenarConfig,
    ) -> std::result::Result<Box<dyn Engine>, EngineCreationError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if config.license_key.is_empty() {
            return Err(EngineCreationError::LicenseKeyMissing);
        }
        match self.engine.take() {
            Some(engine) => Ok(Box::new(engine)),
            None => Err(EngineCreationError::Initialization),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CameraFrame, StateSnapshot};
    use std::time::Duration;

    fn frame(index: u64) -> StateSnapshot {
        StateSnapshot::empty().with_camera_frame(CameraFrame {
            index,
            timestamp: Duration::from_millis(index * 33),
        })
    }

    #[test]
    fn replays_script_then_holds_last_frame() {
        let mut engine = ScriptedEngine::new().with_frames([frame(0), frame(1)]);
        engine.start().unwrap();

        assert_eq!(engine.acquire_state().unwrap().camera_frame.unwrap().index, 0);
        assert_eq!(engine.acquire_state().unwrap().camera_frame.unwrap().index, 1);
        // Script exhausted; the last frame is held.
        assert_eq!(engine.acquire_state().unwrap().camera_frame.unwrap().index, 1);
    }

    #[test]
    fn acquire_requires_running_engine() {
        let mut engine = ScriptedEngine::new();
        assert!(engine.acquire_state().is_err());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut engine = ScriptedEngine::new();
        engine.start().unwrap();
        assert!(engine.start().is_err());
        engine.stop().unwrap();
        assert!(engine.stop().is_err());
    }

    #[test]
    fn leaked_observers_are_reported() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        {
            let mut engine = engine;
            engine.create_observer(&ObserverConfig::DevicePose).unwrap();
            // Dropped without destroy_observer.
        }
        assert_eq!(stats.leaked_observers.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn driver_rejects_empty_license_key() {
        let mut driver = ScriptedDriver::with_engine(ScriptedEngine::new());
        let config = LumenarConfig::default();
        assert_eq!(
            driver.create_engine(&config).err(),
            Some(EngineCreationError::LicenseKeyMissing)
        );
    }
}
