//! AR session lifecycle and per-frame orchestration.
//!
//! [`LumenarSession`] owns the engine instance and its observers, sequences
//! configure → create → start → acquire-state → render → release, and runs
//! the relocalization timeout policy. It is driven from a single render
//! thread: `prepare_to_render` at the start of each frame, the result
//! getters while the frame is active, `finish_render` at the end.

use crate::config::{CameraFocusMode, LumenarConfig, TargetConfig, TargetKind, ViewOrientation};
use crate::engine::{Engine, EngineDriver, GuideView, ObserverConfig, ObserverId};
use crate::error::{LumenarError, Result};
use crate::events::LumenarEvent;
use crate::math::{planar_target_scale, Mat4, Vec2, Vec3};
use crate::relocalize::RelocalizationMonitor;
use crate::state::{
    DevicePoseStatusInfo, ObservationKind, PoseStatus, RenderState, StateSnapshot,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Instant;

/// Capacity of the session event channel. Delivery is best-effort; when the
/// application stops polling, new events are dropped with a debug log.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Distance of the guide view plane from the camera.
const GUIDE_VIEW_PLANE_DISTANCE: f32 = 0.01;

/// Last known device pose, refreshed once per frame in `prepare_to_render`.
#[derive(Debug, Clone, Copy)]
pub struct DevicePoseData {
    pub pose: Mat4,
    pub status: PoseStatus,
    pub status_info: DevicePoseStatusInfo,
}

impl Default for DevicePoseData {
    fn default() -> Self {
        Self {
            pose: Mat4::IDENTITY,
            status: PoseStatus::NoPose,
            status_info: DevicePoseStatusInfo::Normal,
        }
    }
}

/// Matrices for rendering an augmentation on a tracked target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetRenderInfo {
    pub projection: Mat4,
    pub model_view: Mat4,
    /// Model-view scaled to the target extent, for rendering a unit
    /// bounding box.
    pub scaled_model_view: Mat4,
}

/// Rendering data for the model target guide view overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct GuideViewRenderInfo {
    pub projection: Mat4,
    pub model_view: Mat4,
    pub image_width: u32,
    pub image_height: u32,
    /// True when the guide view image must be re-uploaded this frame.
    pub image_changed: bool,
}

/// State held between `prepare_to_render` and `finish_render`.
struct ActiveFrame {
    snapshot: StateSnapshot,
    /// Populated only when the snapshot carried a camera frame and a video
    /// background mesh; getters require it.
    render_state: Option<RenderState>,
}

pub struct LumenarSession {
    config: LumenarConfig,
    target: TargetConfig,
    engine: Option<Box<dyn Engine>>,
    device_pose_observer: Option<ObserverId>,
    object_observer: Option<ObserverId>,
    frame: Option<ActiveFrame>,
    device_pose: DevicePoseData,
    relocalization: RelocalizationMonitor,
    display_aspect_ratio: f32,
    /// Guide view to overlay while the model target is not tracked.
    guide_view: Option<GuideView>,
    events_tx: Sender<LumenarEvent>,
    events_rx: Receiver<LumenarEvent>,
}

impl std::fmt::Debug for LumenarSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LumenarSession")
            .field("config", &self.config)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl LumenarSession {
    /// Create the engine through `driver`, apply the projection planes and
    /// create the observers required for `target` (a device pose observer is
    /// always created). On any failure everything created so far is torn
    /// down and the error carries a human-readable message for the UI layer.
    pub fn init<D: EngineDriver>(
        driver: &mut D,
        config: LumenarConfig,
        target: TargetConfig,
    ) -> Result<Self> {
        if config.license_key.is_empty() {
            log::error!("Failed to initialize: license key must not be empty");
            return Err(LumenarError::Configuration(
                "license key must not be empty".into(),
            ));
        }

        let mut engine = driver.create_engine(&config).map_err(|code| {
            log::error!("Failed to create engine instance: {code}");
            code
        })?;

        engine
            .set_projection_planes(config.near_plane, config.far_plane)
            .map_err(|e| {
                log::error!("Error setting clipping planes for projection: {e}");
                e
            })?;

        let relocalization = RelocalizationMonitor::new(config.relocalization);
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);

        let mut session = Self {
            config,
            target,
            engine: Some(engine),
            device_pose_observer: None,
            object_observer: None,
            frame: None,
            device_pose: DevicePoseData::default(),
            relocalization,
            display_aspect_ratio: 1.0,
            guide_view: None,
            events_tx,
            events_rx,
        };

        if let Err(e) = session.create_observers() {
            session.deinit();
            return Err(e);
        }

        log::info!("Successfully initialized AR session");
        session.emit(LumenarEvent::InitDone);
        Ok(session)
    }

    /// Receiver for session notifications. Poll it from the application
    /// loop; the channel never blocks the render thread.
    pub fn events(&self) -> &Receiver<LumenarEvent> {
        &self.events_rx
    }

    pub fn target_kind(&self) -> TargetKind {
        self.target.kind
    }

    pub fn is_running(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_running())
    }

    /// Start the AR session. Call when the app resumes.
    ///
    /// The preferred camera video mode is applied before starting;
    /// continuous autofocus is requested after. Both are best-effort and
    /// only logged on failure. Starting while already running fails without
    /// re-running the start sequence.
    pub fn start(&mut self) -> Result<()> {
        log::info!("Starting AR session");

        let Some(engine) = self.engine.as_mut() else {
            log::error!("Failed to start session as no valid engine instance is available");
            return Err(LumenarError::InvalidState("no engine instance".into()));
        };

        if engine.is_running() {
            log::error!("Failed to start session as it is already running");
            return Err(LumenarError::InvalidState("session is already running".into()));
        }

        if let Err(e) = engine.set_video_mode(self.config.video_mode) {
            log::warn!(
                "Failed to set video mode {:?} for camera device: {e}",
                self.config.video_mode
            );
        }

        engine.start().map_err(|e| {
            log::error!("Failed to start engine: {e}");
            e
        })?;

        if let Err(e) = engine.set_focus_mode(CameraFocusMode::ContinuousAuto) {
            log::warn!("Failed to select continuous autofocus for camera device: {e}");
        }

        log::info!("Successfully started AR session");
        self.emit(LumenarEvent::Started);
        Ok(())
    }

    /// Stop the AR session. Call when the app pauses. Stopping while not
    /// running fails and performs no side effects.
    pub fn stop(&mut self) -> Result<()> {
        log::info!("Stopping AR session");

        let Some(engine) = self.engine.as_mut() else {
            log::error!("Failed to stop session as no valid engine instance is available");
            return Err(LumenarError::InvalidState("no engine instance".into()));
        };

        if !engine.is_running() {
            log::error!("Failed to stop session as it is currently not running");
            return Err(LumenarError::InvalidState("session is not running".into()));
        }

        engine.stop().map_err(|e| {
            log::error!("Failed to stop engine: {e}");
            e
        })?;

        log::info!("Successfully stopped AR session");
        self.emit(LumenarEvent::Stopped);
        Ok(())
    }

    /// Stop if running, destroy all observers, then destroy the engine
    /// instance and null all cached handles. A no-op when no engine exists,
    /// so calling it repeatedly (or after a failed init) is safe. Also runs
    /// on drop.
    pub fn deinit(&mut self) {
        let Some(mut engine) = self.engine.take() else {
            log::debug!("deinit called without an engine instance");
            return;
        };

        // Release any in-flight frame before the engine goes away.
        self.frame = None;

        if engine.is_running() {
            if let Err(e) = engine.stop() {
                log::error!("Failed to stop engine during deinit: {e}");
            } else {
                self.emit(LumenarEvent::Stopped);
            }
        }

        // Observers must go before the engine that owns them; the object
        // observer first, then the device pose observer.
        for id in [self.object_observer.take(), self.device_pose_observer.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = engine.destroy_observer(id) {
                log::error!("Error destroying observer {id}: {e}");
            }
        }

        drop(engine);

        self.guide_view = None;
        self.device_pose = DevicePoseData::default();
        self.relocalization.clear();
    }

    /// Request a single autofocus operation in the current camera position.
    /// Best-effort; a no-op unless the session is running.
    pub fn camera_perform_autofocus(&mut self) {
        self.set_focus_mode_if_running(CameraFocusMode::TriggerAuto);
    }

    /// Restore the camera to continuous autofocus mode.
    pub fn camera_restore_autofocus(&mut self) {
        self.set_focus_mode_if_running(CameraFocusMode::ContinuousAuto);
    }

    /// Configure view orientation and render view size. Must be called from
    /// the rendering thread after `init` and `start`.
    pub fn configure_rendering(
        &mut self,
        width: u32,
        height: u32,
        orientation: ViewOrientation,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            log::error!("Invalid render view dimensions {width}x{height}");
            return Err(LumenarError::Configuration(
                "render view dimensions must be non-zero".into(),
            ));
        }
        if !self.is_running() {
            return Err(LumenarError::InvalidState("session is not running".into()));
        }
        let engine = self.engine.as_mut().expect("running session has an engine");

        engine.set_view_orientation(orientation).map_err(|e| {
            log::error!("Failed to set view orientation: {e}");
            e
        })?;

        self.display_aspect_ratio = width as f32 / height as f32;

        if let Err(e) = engine.set_render_view_size(width, height) {
            log::warn!("Failed to set render view configuration: {e}");
        }

        Ok(())
    }

    /// Dimensions to use when creating the video background texture. Valid
    /// after `init` and `start`.
    pub fn video_background_texture_size(&self) -> Result<(u32, u32)> {
        let Some(engine) = self.engine.as_ref() else {
            return Err(LumenarError::InvalidState("no engine instance".into()));
        };
        engine.video_background_texture_size().map_err(|e| {
            log::error!("Error getting video background texture size: {e}");
            e
        })
    }

    /// Begin a render frame: acquire the latest state snapshot and refresh
    /// the cached device pose. Fails without rendering when the engine has
    /// no camera frame yet (right after start). Whatever the result,
    /// `finish_render` must be called before the frame completes.
    pub fn prepare_to_render(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(LumenarError::InvalidState("no engine instance".into()));
        };

        let snapshot = match engine.acquire_state() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Error acquiring state: {e}");
                self.emit(LumenarEvent::EngineError {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        // The snapshot is held even on early-out so finish_render releases
        // it, matching the prepare/finish bracket contract.
        let frame = self.frame.insert(ActiveFrame {
            snapshot,
            render_state: None,
        });

        if !frame.snapshot.has_camera_frame() {
            return Err(LumenarError::NoCameraFrame);
        }

        let Some(render_state) = frame.snapshot.render_state.clone() else {
            log::error!("Error getting render state");
            return Err(LumenarError::Engine("state has no render state".into()));
        };

        if render_state.vb_mesh.is_none() {
            return Err(LumenarError::NoCameraFrame);
        }

        frame.render_state = Some(render_state);
        self.update_device_pose();

        Ok(())
    }

    /// End a render frame: run the relocalization timeout check and release
    /// the state snapshot. Safe to call when no frame is active.
    pub fn finish_render(&mut self) {
        if self
            .relocalization
            .update(self.device_pose.status, self.device_pose.status_info, Instant::now())
        {
            let success = match self.engine.as_mut().map(|e| e.reset_world_tracking()) {
                Some(Ok(())) => {
                    log::info!("Successfully reset world tracking");
                    true
                }
                Some(Err(e)) => {
                    log::error!("Failed to reset world tracking: {e}");
                    false
                }
                None => false,
            };
            self.emit(LumenarEvent::TrackingReset { success });
        }

        // Dropping the snapshot releases the frame.
        self.frame = None;
    }

    /// Render parameters of the current frame. Valid only between
    /// `prepare_to_render` and `finish_render`.
    pub fn render_state(&self) -> Result<&RenderState> {
        self.active_render_state()
    }

    /// Cached device pose for the current frame.
    pub fn device_pose(&self) -> &DevicePoseData {
        &self.device_pose
    }

    /// Projection and model-view matrices for the world origin, or `None`
    /// while the device pose is unavailable.
    pub fn origin_result(&self) -> Option<(Mat4, Mat4)> {
        let render_state = self.active_render_state().ok()?;
        if !self.device_pose.status.has_pose() {
            return None;
        }
        Some((render_state.projection, render_state.view))
    }

    /// Rendering matrices for the image target, or `None` while it is not
    /// tracked (or the session tracks a model target instead).
    pub fn image_target_result(&self) -> Option<TargetRenderInfo> {
        if self.target.kind != TargetKind::ImageTarget {
            return None;
        }
        let render_state = self.active_render_state().ok()?;
        let frame = self.frame.as_ref()?;

        let observation = frame.snapshot.image_targets().next()?;
        if !observation.pose_info.status.has_pose() {
            return None;
        }
        let ObservationKind::ImageTarget { size, .. } = &observation.kind else {
            return None;
        };

        let model_view = render_state.view * observation.pose_info.pose;
        let scaled_model_view = model_view * Mat4::from_scale(planar_target_scale(*size));

        Some(TargetRenderInfo {
            projection: render_state.projection,
            model_view,
            scaled_model_view,
        })
    }

    /// Rendering matrices for the model target, or `None` while it is not
    /// tracked. While untracked, the active guide view advertised by the
    /// engine is cached for [`Self::model_target_guide_view`]; once tracking
    /// resumes the cached guide view is cleared.
    pub fn model_target_result(&mut self) -> Option<TargetRenderInfo> {
        if self.target.kind != TargetKind::ModelTarget {
            return None;
        }
        let render_state = self.active_render_state().ok()?.clone();

        let frame = self.frame.as_ref()?;
        let observation = frame.snapshot.model_targets().next()?;
        let pose_info = observation.pose_info;
        let ObservationKind::ModelTarget {
            size,
            bbox_center,
            active_guide_view,
            ..
        } = observation.kind.clone()
        else {
            return None;
        };

        if !pose_info.status.has_pose() {
            self.refresh_guide_view(active_guide_view.as_deref());
            return None;
        }

        self.guide_view = None;

        let model_view = render_state.view * pose_info.pose;
        let scaled_model_view =
            model_view * Mat4::from_translation(bbox_center) * Mat4::from_scale(size);

        Some(TargetRenderInfo {
            projection: render_state.projection,
            model_view,
            scaled_model_view,
        })
    }

    /// Rendering data for the model target guide view, or `None` when no
    /// guide view overlay is required for the current frame.
    ///
    /// The guide view image is fit to the screen by comparing its aspect
    /// ratio with the display's: the image is scaled so that its long side
    /// matches the corresponding extent of the camera near plane, derived
    /// from the camera's vertical field of view.
    pub fn model_target_guide_view(&self) -> Option<GuideViewRenderInfo> {
        let guide_view = self.guide_view.as_ref()?;
        let frame = self.frame.as_ref()?;
        let intrinsics = frame.snapshot.camera_intrinsics?;

        let guide_view_aspect = guide_view.image.aspect_ratio();
        let display_aspect = self.display_aspect_ratio;

        let field_of_view = intrinsics.fov.y;
        let near_plane_height = GUIDE_VIEW_PLANE_DISTANCE * (field_of_view * 0.5).tan();
        let near_plane_width = near_plane_height * display_aspect;

        let (plane_width, plane_height) = if guide_view_aspect >= 1.0 && display_aspect >= 1.0 {
            // Guide view landscape, display landscape: match widths.
            let width = near_plane_width;
            (width, width / guide_view_aspect)
        } else if guide_view_aspect < 1.0 && display_aspect < 1.0 {
            // Guide view portrait, display portrait: match heights.
            let height = near_plane_height;
            (height * guide_view_aspect, height)
        } else if display_aspect < 1.0 {
            // Guide view landscape, display portrait: fit the guide view
            // width to the display's long side (its height).
            let width = near_plane_height;
            (width, width / guide_view_aspect)
        } else {
            // Guide view portrait, display landscape: fit the guide view
            // height to the display's long side (its width).
            let height = near_plane_width;
            (height * guide_view_aspect, height)
        };

        // Normalize the world-space plane size back into view space.
        let scale = Vec2::new(
            2.0 * plane_width / near_plane_width,
            2.0 * plane_height / near_plane_height,
        );

        Some(GuideViewRenderInfo {
            projection: Mat4::IDENTITY,
            model_view: Mat4::from_scale(Vec3::new(scale.x, scale.y, 1.0)),
            image_width: guide_view.image.width,
            image_height: guide_view.image.height,
            image_changed: guide_view.image_outdated,
        })
    }

    fn create_observers(&mut self) -> Result<()> {
        let engine = self.engine.as_mut().expect("init created an engine");

        let device_pose = engine
            .create_observer(&ObserverConfig::DevicePose)
            .map_err(|e| {
                log::error!("Error creating device pose observer: {e}");
                e
            })?;
        self.device_pose_observer = Some(device_pose);

        let observer_config = match self.target.kind {
            TargetKind::ImageTarget => ObserverConfig::ImageTarget {
                database_path: self.target.database_path.clone(),
                target_name: self.target.target_name.clone(),
                activate: self.target.activate,
            },
            TargetKind::ModelTarget => ObserverConfig::ModelTarget {
                database_path: self.target.database_path.clone(),
                target_name: self.target.target_name.clone(),
                activate: self.target.activate,
            },
        };

        let object = engine.create_observer(&observer_config).map_err(|e| {
            log::error!("Error creating {:?} observer: {e}", self.target.kind);
            e
        })?;
        self.object_observer = Some(object);

        Ok(())
    }

    /// Refresh the cached device pose from the active snapshot. Defaults to
    /// no-pose when the snapshot carries no device pose observation.
    fn update_device_pose(&mut self) {
        self.device_pose = DevicePoseData::default();

        let Some(frame) = self.frame.as_ref() else {
            return;
        };
        let Some(observation) = frame.snapshot.device_pose() else {
            log::debug!("State has no device pose observation");
            return;
        };

        if observation.pose_info.status.has_pose() {
            let ObservationKind::DevicePose { status_info } = &observation.kind else {
                return;
            };
            self.device_pose = DevicePoseData {
                pose: observation.pose_info.pose,
                status: observation.pose_info.status,
                status_info: *status_info,
            };
        }
    }

    /// Look up the engine's currently recommended guide view by name and
    /// cache it for rendering.
    fn refresh_guide_view(&mut self, active_name: Option<&str>) {
        let Some(active_name) = active_name else {
            self.guide_view = None;
            return;
        };
        let (Some(engine), Some(observer)) = (self.engine.as_ref(), self.object_observer) else {
            return;
        };

        match engine.guide_views(observer) {
            Ok(guide_views) => {
                self.guide_view = guide_views.into_iter().find(|gv| gv.name == active_name);
                if self.guide_view.is_none() {
                    log::warn!("Error getting guide view details for '{active_name}'");
                }
            }
            Err(e) => {
                log::warn!("Error getting list of guide views: {e}");
            }
        }
    }

    fn set_focus_mode_if_running(&mut self, mode: CameraFocusMode) {
        if !self.is_running() {
            return;
        }
        let engine = self.engine.as_mut().expect("running session has an engine");
        if let Err(e) = engine.set_focus_mode(mode) {
            log::warn!("Error setting camera focus mode {mode:?}: {e}");
        }
    }

    fn active_render_state(&self) -> Result<&RenderState> {
        self.frame
            .as_ref()
            .and_then(|f| f.render_state.as_ref())
            .ok_or(LumenarError::NoActiveFrame)
    }

    fn emit(&self, event: LumenarEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            log::debug!("Dropping session event: {e}");
        }
    }
}

impl Drop for LumenarSession {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GuideView, GuideViewImage, ScriptedDriver, ScriptedEngine};
    use crate::error::{EngineCreationError, ObserverCreationError};
    use crate::state::{
        CameraFrame, CameraIntrinsics, Observation, PoseInfo, VideoBackgroundMesh,
    };
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn test_config() -> LumenarConfig {
        LumenarConfig::new("test-license-key")
    }

    fn image_target() -> TargetConfig {
        TargetConfig::image_target("TestDB1.xml", "VeneraMarker")
    }

    fn model_target() -> TargetConfig {
        TargetConfig::model_target("MarsRover.xml", "MarsRover")
    }

    fn render_state() -> RenderState {
        RenderState::new(
            [0, 0, 1920, 1080],
            Mat4::perspective_rh_gl(1.0, 16.0 / 9.0, 0.01, 5.0),
            Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)),
        )
        .with_video_background_mesh(VideoBackgroundMesh::full_screen_quad())
    }

    fn device_pose_observation(status: PoseStatus, info: DevicePoseStatusInfo) -> Observation {
        Observation {
            observer: ObserverId::new(),
            pose_info: PoseInfo {
                status,
                pose: Mat4::from_translation(Vec3::new(0.1, 0.2, 0.3)),
            },
            kind: ObservationKind::DevicePose { status_info: info },
        }
    }

    fn camera_frame(index: u64) -> CameraFrame {
        CameraFrame {
            index,
            timestamp: Duration::from_millis(index * 33),
        }
    }

    /// A renderable frame with a tracked device pose.
    fn tracked_frame(index: u64) -> StateSnapshot {
        StateSnapshot::empty()
            .with_camera_frame(camera_frame(index))
            .with_render_state(render_state())
            .with_observation(device_pose_observation(
                PoseStatus::Tracked,
                DevicePoseStatusInfo::Normal,
            ))
    }

    fn init_session(engine: ScriptedEngine, target: TargetConfig) -> LumenarSession {
        let mut driver = ScriptedDriver::with_engine(engine);
        LumenarSession::init(&mut driver, test_config(), target).unwrap()
    }

    #[test]
    fn init_rejects_empty_license_key() {
        let mut driver = ScriptedDriver::with_engine(ScriptedEngine::new());
        let result = LumenarSession::init(&mut driver, LumenarConfig::default(), image_target());
        assert!(matches!(result, Err(LumenarError::Configuration(_))));
    }

    #[test]
    fn init_surfaces_creation_error_message() {
        let mut driver = ScriptedDriver::failing(EngineCreationError::PermissionDenied);
        let err = LumenarSession::init(&mut driver, test_config(), image_target()).unwrap_err();
        assert!(err.to_string().contains("access to the camera was denied"));
    }

    #[test]
    fn init_emits_init_done() {
        let session = init_session(ScriptedEngine::new(), image_target());
        assert_eq!(session.events().try_recv(), Ok(LumenarEvent::InitDone));
    }

    #[test]
    fn failed_observer_creation_tears_down_cleanly() {
        let engine = ScriptedEngine::new().fail_target_observer(
            ObserverCreationError::DatabaseLoadError {
                path: "TestDB1.xml".into(),
            },
        );
        let stats = engine.stats();
        let mut driver = ScriptedDriver::with_engine(engine);

        let err = LumenarSession::init(&mut driver, test_config(), image_target()).unwrap_err();
        assert!(err.to_string().contains("TestDB1.xml"));
        // The already-created device pose observer was destroyed before the
        // engine was dropped.
        assert_eq!(stats.leaked_observers.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn start_applies_video_mode_then_autofocus() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());

        session.start().unwrap();
        assert!(session.is_running());
        assert_eq!(stats.starts.load(Ordering::Relaxed), 1);
        assert_eq!(
            stats.last_focus_mode(),
            Some(CameraFocusMode::ContinuousAuto)
        );
        assert_eq!(session.events().try_iter().last(), Some(LumenarEvent::Started));
    }

    #[test]
    fn double_start_fails_without_rerunning_start_sequence() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());

        session.start().unwrap();
        assert!(session.start().is_err());
        assert_eq!(stats.starts.load(Ordering::Relaxed), 1);
        assert!(session.is_running());
    }

    #[test]
    fn stop_when_not_running_fails_with_no_side_effects() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());

        assert!(session.stop().is_err());
        assert_eq!(stats.stops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn deinit_destroys_observers_before_engine() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());

        session.start().unwrap();
        session.deinit();
        assert!(!session.is_running());
        assert_eq!(stats.stops.load(Ordering::Relaxed), 1);
        assert_eq!(stats.leaked_observers.load(Ordering::Relaxed), 0);

        // Deinit with no engine is a no-op.
        session.deinit();
    }

    #[test]
    fn drop_tears_down_like_deinit() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        {
            let mut session = init_session(engine, image_target());
            session.start().unwrap();
        }
        assert_eq!(stats.stops.load(Ordering::Relaxed), 1);
        assert_eq!(stats.leaked_observers.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn prepare_fails_without_camera_frame() {
        let mut engine = ScriptedEngine::new();
        engine.push_frame(StateSnapshot::empty());
        let mut session = init_session(engine, image_target());
        session.start().unwrap();

        assert!(matches!(
            session.prepare_to_render(),
            Err(LumenarError::NoCameraFrame)
        ));
        // The bracket still has to be closed.
        session.finish_render();
    }

    #[test]
    fn getters_fail_outside_render_bracket() {
        let mut engine = ScriptedEngine::new();
        engine.push_frame(tracked_frame(0));
        let mut session = init_session(engine, image_target());
        session.start().unwrap();

        assert!(matches!(
            session.render_state(),
            Err(LumenarError::NoActiveFrame)
        ));
        assert!(session.origin_result().is_none());

        session.prepare_to_render().unwrap();
        assert!(session.render_state().is_ok());
        assert!(session.origin_result().is_some());

        session.finish_render();
        assert!(matches!(
            session.render_state(),
            Err(LumenarError::NoActiveFrame)
        ));
    }

    #[test]
    fn device_pose_is_cached_per_frame() {
        let mut engine = ScriptedEngine::new();
        engine.push_frame(tracked_frame(0));
        engine.push_frame(
            StateSnapshot::empty()
                .with_camera_frame(camera_frame(1))
                .with_render_state(render_state())
                .with_observation(device_pose_observation(
                    PoseStatus::NoPose,
                    DevicePoseStatusInfo::NotObserved,
                )),
        );
        let mut session = init_session(engine, image_target());
        session.start().unwrap();

        session.prepare_to_render().unwrap();
        assert_eq!(session.device_pose().status, PoseStatus::Tracked);
        session.finish_render();

        session.prepare_to_render().unwrap();
        // A no-pose observation resets the cache to defaults.
        assert_eq!(session.device_pose().status, PoseStatus::NoPose);
        assert!(session.origin_result().is_none());
        session.finish_render();
    }

    fn relocalizing_frame(index: u64) -> StateSnapshot {
        StateSnapshot::empty()
            .with_camera_frame(camera_frame(index))
            .with_render_state(render_state())
            .with_observation(device_pose_observation(
                PoseStatus::Limited,
                DevicePoseStatusInfo::Relocalizing,
            ))
    }

    #[test]
    fn sustained_relocalizing_triggers_one_world_tracking_reset() {
        let engine = ScriptedEngine::new().with_frames([relocalizing_frame(0)]);
        let stats = engine.stats();
        let mut driver = ScriptedDriver::with_engine(engine);
        // Tight timeout so the test runs in real time.
        let config = test_config().relocalization_timeout(Duration::from_millis(20));
        let mut session = LumenarSession::init(&mut driver, config, image_target()).unwrap();
        session.start().unwrap();

        // First frame arms the timer.
        session.prepare_to_render().unwrap();
        session.finish_render();
        assert_eq!(stats.resets(), 0);

        std::thread::sleep(Duration::from_millis(30));

        // Past the threshold: exactly one reset.
        session.prepare_to_render().unwrap();
        session.finish_render();
        assert_eq!(stats.resets(), 1);
        let events: Vec<_> = session.events().try_iter().collect();
        assert!(events.contains(&LumenarEvent::TrackingReset { success: true }));

        // Immediately after the reset the timer has cleared.
        session.prepare_to_render().unwrap();
        session.finish_render();
        assert_eq!(stats.resets(), 1);
    }

    #[test]
    fn recovered_tracking_disarms_relocalization_timer() {
        let engine = ScriptedEngine::new().with_frames([relocalizing_frame(0), tracked_frame(1)]);
        let stats = engine.stats();
        let mut driver = ScriptedDriver::with_engine(engine);
        let config = test_config().relocalization_timeout(Duration::from_millis(20));
        let mut session = LumenarSession::init(&mut driver, config, image_target()).unwrap();
        session.start().unwrap();

        session.prepare_to_render().unwrap();
        session.finish_render();

        std::thread::sleep(Duration::from_millis(30));

        // Status recovered before the threshold elapsed: no reset, ever.
        session.prepare_to_render().unwrap();
        session.finish_render();
        assert_eq!(stats.resets(), 0);
    }

    #[test]
    fn image_target_result_computes_scaled_matrices() {
        let target_pose = Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5));
        let frame = tracked_frame(0).with_observation(Observation {
            observer: ObserverId::new(),
            pose_info: PoseInfo::tracked(target_pose),
            kind: ObservationKind::ImageTarget {
                target_name: "VeneraMarker".into(),
                size: Vec2::new(0.2, 0.1),
            },
        });
        let mut engine = ScriptedEngine::new();
        engine.push_frame(frame);
        let mut session = init_session(engine, image_target());
        session.start().unwrap();
        session.prepare_to_render().unwrap();

        let result = session.image_target_result().unwrap();
        let expected_model_view = render_state().view * target_pose;
        assert_eq!(result.model_view, expected_model_view);
        assert_eq!(
            result.scaled_model_view,
            expected_model_view * Mat4::from_scale(Vec3::new(0.2, 0.1, 0.2))
        );

        // A model target getter on an image target session yields nothing.
        assert!(session.model_target_result().is_none());
        session.finish_render();
    }

    #[test]
    fn untracked_image_target_yields_no_result() {
        let frame = tracked_frame(0).with_observation(Observation {
            observer: ObserverId::new(),
            pose_info: PoseInfo::no_pose(),
            kind: ObservationKind::ImageTarget {
                target_name: "VeneraMarker".into(),
                size: Vec2::new(0.2, 0.1),
            },
        });
        let mut engine = ScriptedEngine::new();
        engine.push_frame(frame);
        let mut session = init_session(engine, image_target());
        session.start().unwrap();
        session.prepare_to_render().unwrap();

        assert!(session.image_target_result().is_none());
        session.finish_render();
    }

    fn model_target_observation(pose_info: PoseInfo) -> Observation {
        Observation {
            observer: ObserverId::new(),
            pose_info,
            kind: ObservationKind::ModelTarget {
                target_name: "MarsRover".into(),
                size: Vec3::new(0.3, 0.2, 0.4),
                bbox_center: Vec3::new(0.0, 0.1, 0.0),
                active_guide_view: Some("guide_0".into()),
            },
        }
    }

    fn landscape_guide_view() -> GuideView {
        GuideView {
            name: "guide_0".into(),
            image: GuideViewImage {
                width: 1280,
                height: 720,
            },
            image_outdated: false,
        }
    }

    #[test]
    fn tracked_model_target_computes_bbox_matrices() {
        let target_pose = Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0));
        let frame = tracked_frame(0).with_observation(model_target_observation(
            PoseInfo::tracked(target_pose),
        ));
        let mut engine = ScriptedEngine::new();
        engine.push_frame(frame);
        let mut session = init_session(engine, model_target());
        session.start().unwrap();
        session.prepare_to_render().unwrap();

        let result = session.model_target_result().unwrap();
        let model_view = render_state().view * target_pose;
        assert_eq!(result.model_view, model_view);
        assert_eq!(
            result.scaled_model_view,
            model_view
                * Mat4::from_translation(Vec3::new(0.0, 0.1, 0.0))
                * Mat4::from_scale(Vec3::new(0.3, 0.2, 0.4))
        );
        // Tracked target needs no guide view.
        assert!(session.model_target_guide_view().is_none());
        session.finish_render();
    }

    #[test]
    fn untracked_model_target_selects_active_guide_view() {
        let frame = tracked_frame(0)
            .with_camera_intrinsics(CameraIntrinsics {
                fov: Vec2::new(1.2, 0.8),
                resolution: Vec2::new(1920.0, 1080.0),
            })
            .with_observation(model_target_observation(PoseInfo::no_pose()));
        let mut engine = ScriptedEngine::new().with_guide_views(vec![landscape_guide_view()]);
        engine.push_frame(frame);
        let mut session = init_session(engine, model_target());
        session.start().unwrap();
        session
            .configure_rendering(1920, 1080, ViewOrientation::LandscapeLeft)
            .unwrap();
        session.prepare_to_render().unwrap();

        assert!(session.model_target_result().is_none());

        let guide = session.model_target_guide_view().unwrap();
        assert_eq!(guide.projection, Mat4::IDENTITY);
        assert_eq!((guide.image_width, guide.image_height), (1280, 720));
        assert!(!guide.image_changed);

        // Landscape guide view on a landscape display: width fills the
        // screen, height follows the image aspect ratio.
        let display_aspect = 1920.0 / 1080.0;
        let guide_aspect = 1280.0 / 720.0;
        let expected_scale = Vec3::new(2.0, 2.0 * display_aspect / guide_aspect, 1.0);
        let actual_scale = guide.model_view.to_scale_rotation_translation().0;
        assert!((actual_scale - expected_scale).length() < 1e-5);

        session.finish_render();
    }

    #[test]
    fn guide_view_portrait_display_fits_long_side() {
        let frame = tracked_frame(0)
            .with_camera_intrinsics(CameraIntrinsics {
                fov: Vec2::new(1.2, 0.8),
                resolution: Vec2::new(1080.0, 1920.0),
            })
            .with_observation(model_target_observation(PoseInfo::no_pose()));
        let mut engine = ScriptedEngine::new().with_guide_views(vec![landscape_guide_view()]);
        engine.push_frame(frame);
        let mut session = init_session(engine, model_target());
        session.start().unwrap();
        session
            .configure_rendering(1080, 1920, ViewOrientation::Portrait)
            .unwrap();
        session.prepare_to_render().unwrap();

        assert!(session.model_target_result().is_none());
        let guide = session.model_target_guide_view().unwrap();

        // Landscape guide view on a portrait display: the guide view width
        // fills the display height (its long side).
        let display_aspect = 1080.0 / 1920.0;
        let guide_aspect = 1280.0 / 720.0;
        let expected_x = 2.0 / display_aspect;
        let expected_y = 2.0 / guide_aspect;
        let actual_scale = guide.model_view.to_scale_rotation_translation().0;
        assert!((actual_scale.x - expected_x).abs() < 1e-4);
        assert!((actual_scale.y - expected_y).abs() < 1e-4);

        session.finish_render();
    }

    #[test]
    fn init_applies_projection_planes_to_engine() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let _session = init_session(engine, image_target());
        assert_eq!(stats.projection_planes(), Some((0.01, 5.0)));
    }

    #[test]
    fn init_applies_configured_projection_planes() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut driver = ScriptedDriver::with_engine(engine);
        let config = test_config().clipping_planes(0.1, 100.0);
        let _session = LumenarSession::init(&mut driver, config, image_target()).unwrap();
        assert_eq!(stats.projection_planes(), Some((0.1, 100.0)));
    }

    #[test]
    fn configure_rendering_passes_orientation_and_size_through() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());
        session.start().unwrap();
        session
            .configure_rendering(1920, 1080, ViewOrientation::LandscapeLeft)
            .unwrap();
        assert_eq!(stats.view_orientation(), Some(ViewOrientation::LandscapeLeft));
        assert_eq!(stats.render_view_size(), Some((1920, 1080)));
    }

    #[test]
    fn configure_rendering_requires_running_session() {
        let mut session = init_session(ScriptedEngine::new(), image_target());
        assert!(session
            .configure_rendering(1920, 1080, ViewOrientation::LandscapeLeft)
            .is_err());
    }

    #[test]
    fn configure_rendering_rejects_zero_dimensions() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());
        session.start().unwrap();

        assert!(matches!(
            session.configure_rendering(1920, 0, ViewOrientation::LandscapeLeft),
            Err(LumenarError::Configuration(_))
        ));
        // Rejected before anything reached the engine.
        assert_eq!(stats.view_orientation(), None);
        assert_eq!(stats.render_view_size(), None);
    }

    #[test]
    fn failed_world_tracking_reset_is_reported() {
        let engine = ScriptedEngine::new()
            .with_frames([relocalizing_frame(0)])
            .fail_world_tracking_reset();
        let stats = engine.stats();
        let mut driver = ScriptedDriver::with_engine(engine);
        let config = test_config().relocalization_timeout(Duration::from_millis(20));
        let mut session = LumenarSession::init(&mut driver, config, image_target()).unwrap();
        session.start().unwrap();

        session.prepare_to_render().unwrap();
        session.finish_render();

        std::thread::sleep(Duration::from_millis(30));

        session.prepare_to_render().unwrap();
        session.finish_render();
        assert_eq!(stats.resets(), 1);
        let events: Vec<_> = session.events().try_iter().collect();
        assert!(events.contains(&LumenarEvent::TrackingReset { success: false }));
    }

    #[test]
    fn autofocus_is_a_no_op_unless_running() {
        let engine = ScriptedEngine::new();
        let stats = engine.stats();
        let mut session = init_session(engine, image_target());

        session.camera_perform_autofocus();
        assert!(stats.focus_modes.lock().unwrap().is_empty());

        session.start().unwrap();
        session.camera_perform_autofocus();
        assert_eq!(stats.last_focus_mode(), Some(CameraFocusMode::TriggerAuto));
        session.camera_restore_autofocus();
        assert_eq!(
            stats.last_focus_mode(),
            Some(CameraFocusMode::ContinuousAuto)
        );
    }

    #[test]
    fn video_background_texture_size_passthrough() {
        let engine = ScriptedEngine::new().with_texture_size(1024, 512);
        let mut session = init_session(engine, image_target());
        session.start().unwrap();
        assert_eq!(session.video_background_texture_size().unwrap(), (1024, 512));
    }
}
