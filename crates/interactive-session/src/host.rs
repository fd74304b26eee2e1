//! Host-side collaborators: the application shell, editor, export, assets,
//! telemetry, and the outbound channel to the presentation surface.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use interactive_protocol::{Cell, OutboundMessage, Variable};
use log::debug;
use tokio::sync::mpsc;

use crate::kernel::{EnvironmentProbe, Kernel, KernelLauncher};

/// Questions the session may put to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Confirm a kernel restart. Answers: Yes, DontAskAgain, No.
    RestartKernel,
    /// An interrupt timed out; offer a restart. Answers: Yes, No.
    RestartAfterInterruptTimeout,
    /// The server certificate is self-signed. Yes allows unauthorized
    /// connections from now on; No closes the session.
    TrustSelfSignedCertificate { detail: String },
    /// A data viewer request exceeds the large-result threshold.
    OpenLargeDataViewer { columns: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Yes,
    DontAskAgain,
    No,
}

/// User-facing prompts and notifications.
#[async_trait]
pub trait ApplicationShell: Send + Sync {
    /// Returns `None` if the prompt was dismissed.
    async fn prompt(&self, prompt: Prompt) -> Option<PromptAnswer>;

    fn show_error(&self, message: &str);

    fn show_warning(&self, message: &str);

    fn show_info(&self, message: &str);

    /// Ask where to save an exported notebook.
    async fn pick_export_path(&self) -> Option<PathBuf>;
}

/// Source-editor integration.
#[async_trait]
pub trait EditorIntegration: Send + Sync {
    async fn reveal(&self, file: &str, line: u32) -> anyhow::Result<()>;

    async fn open_untitled(&self, source: &str) -> anyhow::Result<()>;

    /// Insert an empty cell marker after the block that starts at `line`.
    async fn insert_cell_marker_after(&self, file: &str, line: u32) -> anyhow::Result<()>;
}

/// Debugger attachment for debug submissions.
#[async_trait]
pub trait DebugAttacher: Send + Sync {
    async fn attach(&self, kernel: Arc<dyn Kernel>) -> anyhow::Result<()>;

    async fn detach(&self, kernel: Arc<dyn Kernel>) -> anyhow::Result<()>;

    /// The kernel was restarted underneath an attached debugger.
    async fn on_restart(&self, kernel: Arc<dyn Kernel>);
}

/// Converts cells into a serializable notebook document.
pub trait Exporter: Send + Sync {
    fn translate_cells(
        &self,
        cells: &[Cell],
        working_dir: Option<&Path>,
    ) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn write_file(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DataViewer: Send + Sync {
    async fn show(&self, variable: Variable) -> anyhow::Result<()>;
}

/// Syntax-highlighting assets requested by the surface.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    async fn tm_language(&self, language_id: &str) -> Option<String>;

    async fn onigasm_assembly(&self) -> anyhow::Result<Bytes>;
}

/// Editor context keys (e.g. "have interactive cells").
pub trait ContextKeys: Send + Sync {
    fn set(&self, key: &str, value: bool);
}

/// Observability sink. Has no effect on control flow.
pub trait Telemetry: Send + Sync {
    fn event(&self, name: &str, duration: Option<Duration>, properties: serde_json::Value);
}

/// Telemetry sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn event(&self, _name: &str, _duration: Option<Duration>, _properties: serde_json::Value) {}
}

/// Outbound half of the presentation-surface transport.
#[derive(Debug, Clone)]
pub struct SurfaceSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl SurfaceSender {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Create a sender together with the receiving end the surface reads.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn post(&self, message: OutboundMessage) {
        if self.tx.send(message).is_err() {
            debug!("[surface] Surface closed, dropping outbound message");
        }
    }
}

/// Whether the surface currently shows a dark theme.
#[derive(Debug, Clone, Default)]
pub struct ThemeState {
    dark: Arc<AtomicBool>,
}

impl ThemeState {
    pub fn is_dark(&self) -> bool {
        self.dark.load(Ordering::Relaxed)
    }

    pub fn set_dark(&self, dark: bool) {
        self.dark.store(dark, Ordering::Relaxed);
    }
}

/// Everything a session talks to, supplied at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub launcher: Arc<dyn KernelLauncher>,
    pub environments: Arc<dyn EnvironmentProbe>,
    pub shell: Arc<dyn ApplicationShell>,
    pub surface: SurfaceSender,
    pub editor: Arc<dyn EditorIntegration>,
    pub debugger: Arc<dyn DebugAttacher>,
    pub exporter: Arc<dyn Exporter>,
    pub file_system: Arc<dyn FileSystem>,
    pub data_viewer: Arc<dyn DataViewer>,
    pub assets: Arc<dyn AssetProvider>,
    pub telemetry: Arc<dyn Telemetry>,
}
