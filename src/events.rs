//! Event types for Lumenar

/// Notifications published by the session over its event channel.
///
/// The channel is bounded and delivery is best-effort; if the application
/// does not poll, older notifications are dropped rather than blocking the
/// render thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LumenarEvent {
    /// Engine and observers were created successfully.
    InitDone,
    Started,
    Stopped,
    /// The relocalization timeout fired and a world tracking reset was
    /// requested from the engine.
    TrackingReset { success: bool },
    EngineError { message: String },
}

impl LumenarEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::EngineError { .. } | Self::TrackingReset { success: false }
        )
    }
}
