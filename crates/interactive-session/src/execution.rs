//! Execution pipeline: one code submission in, a stream of cell messages out.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use interactive_protocol::{CellId, CellState, OutboundMessage, SysInfoReason, EMPTY_FILE};
use log::{debug, error, info, warn};
use regex::Regex;

use crate::cell_tracker::SharedCellTracker;
use crate::error::SessionError;
use crate::host::{ApplicationShell, Collaborators, DebugAttacher, EditorIntegration, SurfaceSender};
use crate::kernel::{ExecuteRequest, Kernel, KernelSlot};
use crate::kernel_manager::KernelSessionManager;
use crate::lock;
use crate::relay::CollaborationRelay;
use crate::settings::{SettingsStore, DEFAULT_CELL_MARKER};
use crate::single_flight::{ClearPolicy, SingleFlight};
use crate::sys_info::SysInfoCoalescer;

/// Compile a cell-marker pattern, falling back to the default marker.
pub fn compile_marker(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .or_else(|e| {
            warn!("[execution] Invalid cell marker pattern {:?}: {}", pattern, e);
            Regex::new(DEFAULT_CELL_MARKER)
        })
        .ok()
}

/// Whether `code` has nothing to run once a leading cell-marker line is removed.
pub fn is_blank_submission(code: &str, marker: Option<&Regex>) -> bool {
    let trimmed = code.trim_start_matches(['\r', '\n']);
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let body = match marker {
        Some(marker) if marker.is_match(first.trim_start()) => rest,
        _ => trimmed,
    };
    body.trim().is_empty()
}

/// The compiled marker for the most recently seen pattern.
#[derive(Debug, Default)]
pub struct MarkerCache {
    compiled: StdMutex<Option<(String, Option<Regex>)>>,
}

impl MarkerCache {
    pub fn get(&self, pattern: &str) -> Option<Regex> {
        let mut compiled = lock(&self.compiled);
        match compiled.as_ref() {
            Some((cached, marker)) if cached == pattern => marker.clone(),
            _ => {
                let marker = compile_marker(pattern);
                *compiled = Some((pattern.to_string(), marker.clone()));
                marker
            }
        }
    }
}

pub struct ExecutionPipeline {
    manager: Arc<KernelSessionManager>,
    kernel: KernelSlot,
    sys_info: Arc<SysInfoCoalescer>,
    relay: CollaborationRelay,
    cells: SharedCellTracker,
    settings: Arc<SettingsStore>,
    surface: SurfaceSender,
    shell: Arc<dyn ApplicationShell>,
    editor: Arc<dyn EditorIntegration>,
    debugger: Arc<dyn DebugAttacher>,
    markers: MarkerCache,
    /// Start banner, generated once and awaited by every file submission
    start_banner: SingleFlight<()>,
}

impl ExecutionPipeline {
    pub fn new(
        collaborators: &Collaborators,
        manager: Arc<KernelSessionManager>,
        kernel: KernelSlot,
        sys_info: Arc<SysInfoCoalescer>,
        relay: CollaborationRelay,
        cells: SharedCellTracker,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            manager,
            kernel,
            sys_info,
            relay,
            cells,
            settings,
            surface: collaborators.surface.clone(),
            shell: Arc::clone(&collaborators.shell),
            editor: Arc::clone(&collaborators.editor),
            debugger: Arc::clone(&collaborators.debugger),
            markers: MarkerCache::default(),
            start_banner: SingleFlight::new(ClearPolicy::Retain),
        }
    }

    /// Run `code` and stream its cells to the surface.
    ///
    /// Without an `id` the submission is local: a fresh id is generated and
    /// the submission is relayed to collaborators. Returns `false` if a cell
    /// failed while stop-on-error is set.
    pub async fn submit_code(
        self: &Arc<Self>,
        code: &str,
        file: &str,
        line: u32,
        id: Option<CellId>,
        debug: bool,
    ) -> Result<bool, SessionError> {
        let settings = self.settings.get();
        let marker = self.markers.get(&settings.cell_marker_pattern);
        if is_blank_submission(code, marker.as_ref()) {
            debug!("[execution] Skipping empty submission from {}:{}", file, line);
            return Ok(true);
        }

        let id = match id {
            Some(id) => id,
            None => {
                let id = CellId::new_v4();
                self.relay.publish_code(code, file, line, &id, debug);
                id
            }
        };

        if let Err(e) = self.manager.wait_for_connection().await {
            error!("[execution] No kernel for {}: {}", id, e);
            self.manager.dispose().await;
            return Err(e);
        }

        self.surface.post(OutboundMessage::Activate);
        if file != EMPTY_FILE {
            self.ensure_start_banner().await;
        }

        let kernel = self.kernel.get().ok_or(SessionError::NotConnected)?;

        if file != EMPTY_FILE {
            if let Some(dir) = Path::new(file).parent().filter(|d| !d.as_os_str().is_empty()) {
                if let Err(e) = kernel.set_initial_directory(dir).await {
                    warn!("[execution] Failed to set working directory {}: {}", dir.display(), e);
                }
            }
        }

        let request = ExecuteRequest {
            code: code.to_string(),
            file: file.to_string(),
            line,
            id,
            debug,
        };
        info!("[execution] Executing {} from {}:{}", request.id, file, line);

        // Detach must run even if the caller stops waiting.
        let this = Arc::clone(self);
        let stop_on_error = settings.stop_on_error;
        tokio::spawn(async move { this.run(kernel, request, stop_on_error).await })
            .await
            .map_err(|e| SessionError::Aborted(e.to_string()))
    }

    /// Wait until the Start banner is on the surface, generating it on the
    /// first call. Concurrent submissions all wait for the same generation.
    async fn ensure_start_banner(&self) {
        let sys_info = Arc::clone(&self.sys_info);
        let (banner, _) = self.start_banner.join_or_start(move || async move {
            if let Err(e) = sys_info.add_sys_info(SysInfoReason::Start).await {
                warn!("[execution] Failed to add start banner: {}", e);
            }
        });
        if let Err(e) = banner.await {
            warn!("[execution] Start banner task failed: {}", e);
        }
    }

    async fn run(&self, kernel: Arc<dyn Kernel>, request: ExecuteRequest, stop_on_error: bool) -> bool {
        let debug = request.debug;
        if debug {
            if let Err(e) = self.debugger.attach(Arc::clone(&kernel)).await {
                warn!("[execution] Failed to attach debugger: {}", e);
            }
        }

        let success = self.forward_cells(&kernel, request, stop_on_error).await;

        if debug {
            if let Err(e) = self.debugger.detach(kernel).await {
                warn!("[execution] Failed to detach debugger: {}", e);
            }
        }
        success
    }

    async fn forward_cells(
        &self,
        kernel: &Arc<dyn Kernel>,
        request: ExecuteRequest,
        stop_on_error: bool,
    ) -> bool {
        let file = request.file.clone();
        let line = request.line;
        let mut stream = kernel.execute(request);
        let mut success = true;
        let mut marker_inserted = false;

        while let Some(batch) = stream.next().await {
            let cells = match batch {
                Ok(cells) => cells,
                Err(e) if e.is_cancellation() => {
                    debug!("[execution] Execution cancelled");
                    break;
                }
                Err(e) => {
                    error!("[execution] Execution failed: {}", e);
                    self.shell.show_error(&e.to_string());
                    break;
                }
            };

            for cell in &cells {
                if stop_on_error && cell.state == CellState::Error {
                    success = false;
                }
                let message = lock(&self.cells).observe(cell);
                if let Some(message) = message {
                    self.surface.post(message);
                }
            }

            let second_finished = cells.get(1).is_some_and(|c| c.state == CellState::Finished);
            if second_finished && !marker_inserted && file != EMPTY_FILE {
                marker_inserted = true;
                if let Err(e) = self.editor.insert_cell_marker_after(&file, line).await {
                    warn!("[execution] Failed to insert cell marker: {}", e);
                }
            }
        }

        success
    }
}
