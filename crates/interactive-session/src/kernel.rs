//! The kernel boundary.
//!
//! Process spawn and the wire protocol to the kernel live behind these
//! traits. The session only needs to connect, execute, interrupt, restart,
//! and ask a few questions about the running kernel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use interactive_protocol::{Cell, CellId, InterruptResult, Variable};
use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::lock;

/// Stream of cell snapshots produced by one execution.
///
/// Each item is a batch; the stream ends when execution completes or
/// yields an error.
pub type CellBatchStream = BoxStream<'static, Result<Vec<Cell>, KernelError>>;

/// Options handed to the launcher when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Free-form purpose tag (e.g. `"interactive"`), used by launchers to pick kernels.
    pub purpose: String,
    /// Remote server to connect to; `None` means launch a local server.
    pub server_uri: Option<String>,
    /// Accept self-signed certificates from the remote server.
    pub allow_unauthorized: bool,
    pub enable_debugging: bool,
}

/// Server address shown in the start banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub base_url: String,
    pub token: String,
}

impl ConnectionInfo {
    /// `base_url?token=...`, omitting the query when there is no token.
    pub fn display_url(&self) -> String {
        if self.token.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}?token={}", self.base_url, self.token)
        }
    }
}

/// Kernel-reported details included in sys-info banners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Lines such as the interpreter version and executable path.
    pub lines: Vec<String>,
}

/// One execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub code: String,
    pub file: String,
    pub line: u32,
    pub id: CellId,
    pub debug: bool,
}

/// An environment able to host a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub path: PathBuf,
    pub display_name: String,
}

/// A connected kernel session.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Start executing; results arrive as batches of cell snapshots.
    fn execute(&self, request: ExecuteRequest) -> CellBatchStream;

    async fn interrupt(&self, timeout: Duration) -> Result<InterruptResult, KernelError>;

    /// Restart the kernel. Returns [`KernelError::KernelBusy`] if it does not
    /// come back within `timeout`.
    async fn restart(&self, timeout: Duration) -> Result<(), KernelError>;

    async fn set_initial_directory(&self, dir: &Path) -> Result<(), KernelError>;

    async fn set_plot_style(&self, is_dark: bool) -> Result<(), KernelError>;

    async fn session_metadata(&self) -> Result<SessionMetadata, KernelError>;

    fn connection_info(&self) -> Option<ConnectionInfo>;

    async fn variables(&self) -> Result<Vec<Variable>, KernelError>;

    async fn variable_value(&self, variable: &Variable) -> Result<Variable, KernelError>;

    /// Release the connection. Must be safe to call more than once.
    async fn dispose(&self);

    async fn shutdown(&self) -> Result<(), KernelError>;
}

/// Connects to (or launches) a kernel.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Kernel>, KernelError>;
}

/// Discovers environments able to run a kernel.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    /// The environment that will actually run code, if any is usable.
    async fn usable_environment(&self) -> Result<Option<EnvironmentInfo>, KernelError>;

    /// The environment the user selected.
    async fn selected_environment(&self) -> Option<EnvironmentInfo>;
}

/// Shared slot holding the session's current kernel.
///
/// The kernel session manager is the only writer; the pipeline, the
/// sys-info coalescer, and the variable correlator read it.
#[derive(Clone, Default)]
pub struct KernelSlot {
    inner: Arc<StdMutex<Option<Arc<dyn Kernel>>>>,
}

impl KernelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn Kernel>> {
        lock(&self.inner).clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner).is_some()
    }

    /// Install a kernel, returning the previous one (which the caller must dispose).
    pub(crate) fn replace(&self, kernel: Arc<dyn Kernel>) -> Option<Arc<dyn Kernel>> {
        lock(&self.inner).replace(kernel)
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn Kernel>> {
        lock(&self.inner).take()
    }
}

impl std::fmt::Debug for KernelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSlot")
            .field("connected", &self.is_connected())
            .finish()
    }
}
