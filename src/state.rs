//! Immutable per-frame state snapshots and observations.
//!
//! A [`StateSnapshot`] is the engine's answer to "what do you know right
//! now": the latest camera frame, the render parameters derived from it, and
//! one observation per active observer. The session acquires exactly one
//! snapshot per render frame and drops it when the frame finishes; data from
//! a released snapshot is unreachable by construction.

use crate::engine::ObserverId;
use crate::math::{Mat4, Vec2, Vec3};
use std::time::Duration;

/// Metadata of the camera frame a snapshot was produced from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrame {
    pub index: u64,
    /// Capture time relative to engine start.
    pub timestamp: Duration,
}

/// Camera intrinsics for the current video mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Horizontal/vertical field of view in radians.
    pub fov: Vec2,
    /// Sensor resolution in pixels.
    pub resolution: Vec2,
}

/// Mesh used to draw the camera image behind the augmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoBackgroundMesh {
    pub positions: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl VideoBackgroundMesh {
    /// Two-triangle full screen quad, sufficient for undistorted cameras.
    pub fn full_screen_quad() -> Self {
        Self {
            positions: vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            tex_coords: vec![
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

/// Render parameters computed by the engine for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    /// Viewport as x, y, width, height in pixels.
    pub viewport: [i32; 4],
    pub projection: Mat4,
    /// World-to-camera transform from the device pose.
    pub view: Mat4,
    /// Absent until the first camera frame has been processed.
    pub vb_mesh: Option<VideoBackgroundMesh>,
}

impl RenderState {
    pub fn new(viewport: [i32; 4], projection: Mat4, view: Mat4) -> Self {
        Self {
            viewport,
            projection,
            view,
            vb_mesh: None,
        }
    }

    pub fn with_video_background_mesh(mut self, mesh: VideoBackgroundMesh) -> Self {
        self.vb_mesh = Some(mesh);
        self
    }
}

/// Tracking status attached to every pose an observer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoseStatus {
    /// No pose is available; the target is not currently observed.
    #[default]
    NoPose,
    /// A pose is available but degraded.
    Limited,
    Tracked,
    /// Tracking continues from the device pose while the target itself is
    /// out of view.
    ExtendedTracked,
}

impl PoseStatus {
    pub fn has_pose(&self) -> bool {
        !matches!(self, Self::NoPose)
    }
}

/// Detail for a `Limited` device pose status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePoseStatusInfo {
    #[default]
    Normal,
    NotObserved,
    Unknown,
    Initializing,
    /// The engine is attempting to recover a lost pose lock.
    Relocalizing,
    ExcessiveMotion,
    InsufficientFeatures,
    InsufficientLight,
}

/// Pose and status shared by all observation kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseInfo {
    pub status: PoseStatus,
    /// Target-to-world model matrix. Identity when `status` is `NoPose`.
    pub pose: Mat4,
}

impl PoseInfo {
    pub fn no_pose() -> Self {
        Self {
            status: PoseStatus::NoPose,
            pose: Mat4::IDENTITY,
        }
    }

    pub fn tracked(pose: Mat4) -> Self {
        Self {
            status: PoseStatus::Tracked,
            pose,
        }
    }
}

/// Payload distinguishing what kind of observer produced an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationKind {
    DevicePose {
        status_info: DevicePoseStatusInfo,
    },
    ImageTarget {
        target_name: String,
        /// Planar target extent in meters.
        size: Vec2,
    },
    ModelTarget {
        target_name: String,
        /// Bounding box extent in meters.
        size: Vec3,
        bbox_center: Vec3,
        /// Name of the guide view the engine currently recommends, if any.
        /// Advanced model targets may not have one.
        active_guide_view: Option<String>,
    },
}

/// One detection result produced by an observer for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub observer: ObserverId,
    pub pose_info: PoseInfo,
    pub kind: ObservationKind,
}

/// Immutable bundle of everything the engine knows for one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateSnapshot {
    pub camera_frame: Option<CameraFrame>,
    pub render_state: Option<RenderState>,
    pub camera_intrinsics: Option<CameraIntrinsics>,
    pub observations: Vec<Observation>,
}

impl StateSnapshot {
    /// Snapshot with no camera frame yet, as produced right after start.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_camera_frame(mut self, frame: CameraFrame) -> Self {
        self.camera_frame = Some(frame);
        self
    }

    pub fn with_render_state(mut self, render_state: RenderState) -> Self {
        self.render_state = Some(render_state);
        self
    }

    pub fn with_camera_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.camera_intrinsics = Some(intrinsics);
        self
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observations.push(observation);
        self
    }

    pub fn has_camera_frame(&self) -> bool {
        self.camera_frame.is_some()
    }

    /// First device pose observation in this snapshot, if any.
    pub fn device_pose(&self) -> Option<&Observation> {
        self.observations
            .iter()
            .find(|o| matches!(o.kind, ObservationKind::DevicePose { .. }))
    }

    pub fn image_targets(&self) -> impl Iterator<Item = &Observation> {
        self.observations
            .iter()
            .filter(|o| matches!(o.kind, ObservationKind::ImageTarget { .. }))
    }

    pub fn model_targets(&self) -> impl Iterator<Item = &Observation> {
        self.observations
            .iter()
            .filter(|o| matches!(o.kind, ObservationKind::ModelTarget { .. }))
    }
}
