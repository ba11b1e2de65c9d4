//! Error types for Lumenar

use thiserror::Error;

/// Error codes reported by an engine backend when instance creation fails.
///
/// Each code carries its own human-readable message so the application can
/// surface it to the user directly.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCreationError {
    #[error("The engine failed to initialize because the device is not supported.")]
    DeviceNotSupported,

    /// On most platforms the user must explicitly grant camera access. If any
    /// required permission is denied the backend reports this code.
    #[error("The engine cannot initialize because access to the camera was denied.")]
    PermissionDenied,

    #[error("The engine cannot initialize because a valid license configuration is required.")]
    LicenseError,

    #[error("The engine failed to initialize because the license key is missing.")]
    LicenseKeyMissing,

    #[error("The engine failed to initialize because the license key is invalid.")]
    LicenseKeyInvalid,

    #[error("The engine failed to initialize because the license check encountered a permanent network error.")]
    LicenseNetworkPermanent,

    #[error("The engine failed to initialize because the license check encountered a temporary network error.")]
    LicenseNetworkTransient,

    #[error("The engine failed to initialize because the license request is malformed; ensure the app has valid name and version fields.")]
    LicenseBadRequest,

    #[error("The engine failed to initialize because the license key was canceled.")]
    LicenseKeyCanceled,

    #[error("The engine failed to initialize because the license key is for the wrong product type.")]
    LicenseProductTypeMismatch,

    #[error("The engine failed to initialize because the license check encountered an unknown error.")]
    LicenseUnknown,

    #[error("The engine failed to initialize because the requested video background rendering backend is not supported on this device.")]
    RenderBackendUnsupported,

    #[error("The engine failed to initialize because the requested video background viewport could not be set.")]
    RenderViewportInvalid,

    #[error("Engine initialization failed.")]
    Initialization,
}

/// Error codes reported by an engine backend when observer creation fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObserverCreationError {
    #[error("Failed to load target database '{path}'")]
    DatabaseLoadError { path: String },

    #[error("No target named '{name}' exists in the database")]
    InvalidTargetName { name: String },

    #[error("The observer could not be auto-activated")]
    AutoActivationFailed,

    #[error("Observer creation failed: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum LumenarError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    EngineCreation(#[from] EngineCreationError),

    #[error(transparent)]
    ObserverCreation(#[from] ObserverCreationError),

    /// A backend call failed after the engine was created.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An operation was called in the wrong lifecycle state, e.g. `start`
    /// while already running. Logged and rejected without side effects.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The latest state snapshot does not carry a camera frame yet. Expected
    /// right after engine start; not a fault.
    #[error("No camera frame is available yet")]
    NoCameraFrame,

    /// A per-frame getter was called outside a prepare/finish render bracket.
    #[error("No active frame; call prepare_to_render first")]
    NoActiveFrame,
}

pub type Result<T> = std::result::Result<T, LumenarError>;
