//! Central error type for the probe-field renderer.

use std::time::Duration;

/// Everything that can go wrong between scene upload and frame submission.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// A buffer, texture or host allocation could not be satisfied.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: &'static str, waited: Duration },

    /// Shader or pipeline creation failed; there is no fallback path.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("invalid scene: {0}")]
    InvalidScene(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("draw called without a preceding update")]
    FrameNotPrepared,
}

impl RenderError {
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn pipeline<T: ToString>(msg: T) -> Self {
        RenderError::Pipeline(msg.to_string())
    }

    pub fn exhausted<T: ToString>(msg: T) -> Self {
        RenderError::ResourceExhausted(msg.to_string())
    }
}

/// Result type alias for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;
