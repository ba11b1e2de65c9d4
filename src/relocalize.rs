//! Relocalization timeout tracking.

use crate::config::RelocalizationPolicy;
use crate::state::{DevicePoseStatusInfo, PoseStatus};
use std::time::{Duration, Instant};

/// Watches the device pose status across frames and decides when tracking
/// has been stuck relocalizing for long enough to warrant a hard reset.
///
/// The timer starts on the transition into the limited+relocalizing status
/// and clears the moment the status leaves it. While timing, the first frame
/// whose elapsed time exceeds the policy timeout requests a reset exactly
/// once. Time is passed in by the caller so the behavior is testable without
/// waiting wall-clock seconds.
#[derive(Debug)]
pub struct RelocalizationMonitor {
    timeout: Duration,
    entered_at: Option<Instant>,
}

impl RelocalizationMonitor {
    pub fn new(policy: RelocalizationPolicy) -> Self {
        Self {
            timeout: policy.timeout,
            entered_at: None,
        }
    }

    /// Feed the device pose status observed this frame. Returns true when a
    /// world tracking reset should be issued.
    pub fn update(
        &mut self,
        status: PoseStatus,
        status_info: DevicePoseStatusInfo,
        now: Instant,
    ) -> bool {
        let relocalizing = status == PoseStatus::Limited
            && status_info == DevicePoseStatusInfo::Relocalizing;

        if !relocalizing {
            self.entered_at = None;
            return false;
        }

        let entered_at = *self.entered_at.get_or_insert(now);
        if now.duration_since(entered_at) > self.timeout {
            self.entered_at = None;
            return true;
        }
        false
    }

    /// True while the timer is armed.
    pub fn is_timing(&self) -> bool {
        self.entered_at.is_some()
    }

    pub fn clear(&mut self) {
        self.entered_at = None;
    }
}
