//! Error types for kernel and session operations.
//!
//! Both enums are `Clone` because results travel through shared
//! single-flight futures that hand the same value to every waiter.

use crate::single_flight::FlightAborted;

/// Failures reported by the kernel layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// No compatible execution environment was found.
    #[error("No usable environment with Jupyter support was found; install ipykernel and jupyter")]
    EnvironmentUnusable,

    /// The remote server presented a self-signed certificate.
    #[error("The Jupyter server's certificate is self-signed: {0}")]
    CertificateUntrusted(String),

    /// The kernel did not answer a restart within the timeout.
    #[error("Kernel did not respond within {timeout_ms}ms")]
    KernelBusy { timeout_ms: u64 },

    /// Execution was cancelled, usually because the kernel was disposed.
    #[error("Execution cancelled")]
    Cancelled,

    #[error("Failed to connect to kernel: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

impl KernelError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, KernelError::Cancelled)
    }
}

impl From<anyhow::Error> for KernelError {
    fn from(err: anyhow::Error) -> Self {
        KernelError::Other(err.to_string())
    }
}

/// Failures surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Session has been disposed")]
    Disposed,

    #[error("No kernel is connected")]
    NotConnected,

    #[error("Background task aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Host(String),
}

impl From<FlightAborted> for SessionError {
    fn from(err: FlightAborted) -> Self {
        SessionError::Aborted(err.0)
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Host(err.to_string())
    }
}

impl SessionError {
    /// Whether this is the restart-timeout signal that triggers a full reconnect.
    pub fn is_kernel_busy(&self) -> bool {
        matches!(self, SessionError::Kernel(KernelError::KernelBusy { .. }))
    }
}
