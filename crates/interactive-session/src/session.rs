//! The session: wiring between the kernel manager, the pipeline, the relay,
//! and the host collaborators, plus the handlers for surface messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use interactive_protocol::{
    Cell, CellId, InteractiveInfo, OutboundMessage, SysInfoReason, Variable,
};
use log::{debug, info, warn};
use serde_json::json;

use crate::cell_tracker::{CellTracker, SharedCellTracker};
use crate::error::SessionError;
use crate::execution::ExecutionPipeline;
use crate::host::{Collaborators, Prompt, PromptAnswer, ThemeState};
use crate::kernel::KernelSlot;
use crate::kernel_manager::{KernelSessionManager, SessionStatus};
use crate::relay::CollaborationRelay;
use crate::settings::SettingsStore;
use crate::single_flight::Flight;
use crate::strategy::SessionStrategy;
use crate::sys_info::SysInfoCoalescer;
use crate::variables::VariableCorrelator;

/// Data viewer requests wider than this ask for confirmation first.
pub const LARGE_RESULT_COLUMNS: u32 = 1000;

pub struct Session {
    collaborators: Collaborators,
    settings: Arc<SettingsStore>,
    strategy: Arc<dyn SessionStrategy>,
    relay: CollaborationRelay,
    cells: SharedCellTracker,
    manager: Arc<KernelSessionManager>,
    sys_info: Arc<SysInfoCoalescer>,
    pipeline: Arc<ExecutionPipeline>,
    variables: VariableCorrelator,
    theme: ThemeState,
    variable_explorer_open: AtomicBool,
}

impl Session {
    /// Build a session. Its id is the relay's session id.
    pub fn new(
        collaborators: Collaborators,
        settings: Arc<SettingsStore>,
        strategy: Arc<dyn SessionStrategy>,
        relay: CollaborationRelay,
    ) -> Arc<Self> {
        let kernel = KernelSlot::new();
        let theme = ThemeState::default();
        let cells: SharedCellTracker = Arc::new(StdMutex::new(CellTracker::new()));

        let sys_info = Arc::new(SysInfoCoalescer::new(
            kernel.clone(),
            collaborators.surface.clone(),
            relay.clone(),
            Arc::clone(&collaborators.debugger),
        ));
        let manager = Arc::new(KernelSessionManager::new(
            &collaborators,
            Arc::clone(&settings),
            Arc::clone(&strategy),
            Arc::clone(&cells),
            Arc::clone(&sys_info),
            kernel.clone(),
            theme.clone(),
        ));
        let pipeline = Arc::new(ExecutionPipeline::new(
            &collaborators,
            Arc::clone(&manager),
            kernel.clone(),
            Arc::clone(&sys_info),
            relay.clone(),
            Arc::clone(&cells),
            Arc::clone(&settings),
        ));
        let variables = VariableCorrelator::new(&collaborators, kernel, Arc::clone(&settings));

        info!("[session] Created session {}", relay.session_id());
        Arc::new(Self {
            collaborators,
            settings,
            strategy,
            relay,
            cells,
            manager,
            sys_info,
            pipeline,
            variables,
            theme,
            variable_explorer_open: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        self.relay.session_id()
    }

    pub fn relay(&self) -> &CollaborationRelay {
        &self.relay
    }

    pub fn manager(&self) -> &Arc<KernelSessionManager> {
        &self.manager
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn strategy(&self) -> &Arc<dyn SessionStrategy> {
        &self.strategy
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn theme(&self) -> &ThemeState {
        &self.theme
    }

    pub fn status(&self) -> SessionStatus {
        self.manager.status()
    }

    /// Cells that have not reached a terminal state, in submission order.
    pub fn unfinished_cells(&self) -> Vec<Cell> {
        crate::lock(&self.cells).unfinished().to_vec()
    }

    pub fn is_variable_explorer_open(&self) -> bool {
        self.variable_explorer_open.load(Ordering::Relaxed)
    }

    /// Start connecting; see [`KernelSessionManager::start_server`].
    pub fn start(&self) -> Flight<Result<(), SessionError>> {
        self.manager.start_server()
    }

    pub async fn submit_code(
        &self,
        code: &str,
        file: &str,
        line: u32,
        id: Option<CellId>,
        debug: bool,
    ) -> Result<bool, SessionError> {
        self.pipeline.submit_code(code, file, line, id, debug).await
    }

    pub async fn add_sys_info(&self, reason: SysInfoReason) -> Result<Option<Cell>, SessionError> {
        self.sys_info.add_sys_info(reason).await
    }

    pub async fn restart_kernel(&self) {
        self.manager.restart_kernel().await
    }

    pub async fn interrupt_kernel(&self) {
        self.manager.interrupt_kernel().await
    }

    pub async fn request_variables(&self, execution_count: u32) -> Result<(), SessionError> {
        self.variables.request_variables(execution_count).await
    }

    pub async fn request_variable_value(&self, variable: Variable) -> Result<(), SessionError> {
        self.variables.request_variable_value(variable).await
    }

    pub fn undo_cells(&self) {
        self.collaborators.surface.post(OutboundMessage::Undo);
    }

    pub fn redo_cells(&self) {
        self.collaborators.surface.post(OutboundMessage::Redo);
    }

    pub fn remove_all_cells(&self) {
        self.collaborators.surface.post(OutboundMessage::DeleteAllCells);
    }

    pub fn expand_all_cells(&self) {
        self.collaborators.surface.post(OutboundMessage::ExpandAll);
    }

    pub fn collapse_all_cells(&self) {
        self.collaborators.surface.post(OutboundMessage::CollapseAll);
    }

    /// Release the kernel and clear host context. Safe to call more than once.
    pub async fn dispose(&self) {
        self.manager.dispose().await;
        info!("[session] Disposed session {}", self.id());
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.manager.shutdown().await
    }

    // ── Surface message handlers ────────────────────────────────────────

    pub async fn submit_new_cell(self: &Arc<Self>, code: String, id: CellId) -> Result<(), SessionError> {
        let strategy = Arc::clone(&self.strategy);
        strategy.submit_new_cell(self, code, id).await
    }

    pub async fn export(&self, cells: Vec<Cell>) -> Result<(), SessionError> {
        if cells.is_empty() {
            return Ok(());
        }
        let surface = &self.collaborators.surface;
        surface.post(OutboundMessage::StartProgress);
        self.export_to_picked_path(&cells).await;
        surface.post(OutboundMessage::StopProgress);
        Ok(())
    }

    async fn export_to_picked_path(&self, cells: &[Cell]) {
        let Some(path) = self.collaborators.shell.pick_export_path().await else {
            debug!("[session] Export cancelled");
            return;
        };

        let working_dir = self
            .settings
            .get()
            .change_directory_on_export
            .then_some(path.as_path());
        let result = self
            .collaborators
            .exporter
            .translate_cells(cells, working_dir)
            .and_then(|notebook| serde_json::to_vec_pretty(&notebook).map_err(anyhow::Error::from));

        let written = match result {
            Ok(contents) => {
                self.collaborators
                    .file_system
                    .write_file(&path, &contents)
                    .await
            }
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                info!("[session] Exported {} cells to {}", cells.len(), path.display());
                self.collaborators
                    .shell
                    .show_info(&format!("Notebook written to {}", path.display()));
            }
            Err(e) => {
                warn!("[session] Export to {} failed: {}", path.display(), e);
                self.collaborators
                    .shell
                    .show_info(&format!("Export failed: {}", e));
            }
        }
    }

    pub async fn goto_code(&self, file: &str, line: u32) -> Result<(), SessionError> {
        self.collaborators.editor.reveal(file, line).await?;
        Ok(())
    }

    pub async fn copy_code(&self, source: &str) -> Result<(), SessionError> {
        self.collaborators.editor.open_untitled(source).await?;
        Ok(())
    }

    /// A submission relayed by another participant.
    pub async fn on_remote_add_code(
        &self,
        code: &str,
        file: &str,
        line: u32,
        id: CellId,
        originator: &str,
        debug: bool,
    ) -> Result<(), SessionError> {
        if self.relay.is_echo(originator) {
            return Ok(());
        }
        debug!("[session] Replaying submission {} from {}", id, originator);
        self.submit_code(code, file, line, Some(id), debug).await?;
        Ok(())
    }

    /// A banner generated by another participant; shown without regenerating.
    pub fn on_sys_info_added(&self, reason: SysInfoReason, cell: Cell, originator: &str) {
        if self.relay.is_echo(originator) {
            return;
        }
        debug!("[session] Showing {} banner from {}", reason, originator);
        self.collaborators
            .surface
            .post(OutboundMessage::FinishCell { cell });
    }

    pub async fn show_data_viewer(&self, variable: Variable, column_size: u32) -> Result<(), SessionError> {
        if column_size > LARGE_RESULT_COLUMNS && self.settings.get().ask_before_large_result {
            let answer = self
                .collaborators
                .shell
                .prompt(Prompt::OpenLargeDataViewer {
                    columns: column_size,
                })
                .await;
            if answer != Some(PromptAnswer::Yes) {
                return Ok(());
            }
        }
        self.collaborators.data_viewer.show(variable).await?;
        Ok(())
    }

    pub async fn load_tm_language(&self, language_id: String) {
        let content = self.collaborators.assets.tm_language(&language_id).await;
        if content.is_none() {
            warn!("[session] No grammar for {}", language_id);
        }
        self.collaborators
            .surface
            .post(OutboundMessage::LoadTmLanguageResponse {
                language_id,
                content,
            });
    }

    pub async fn load_onigasm_assembly(&self) -> Result<(), SessionError> {
        let assembly = self.collaborators.assets.onigasm_assembly().await?;
        self.collaborators
            .surface
            .post(OutboundMessage::LoadOnigasmAssemblyResponse { assembly });
        Ok(())
    }

    /// Cell-tree edits happen in the surface; the host only records them.
    pub fn on_cell_tree_change(&self, action: &str) {
        self.collaborators
            .telemetry
            .event(action, None, json!({}));
        if action == "delete_all_cells" {
            self.strategy.update_contexts(Some(&InteractiveInfo::default()));
        }
    }

    pub fn on_send_info(&self, info: &InteractiveInfo) {
        self.strategy.update_contexts(Some(info));
    }

    pub fn on_variable_explorer_toggle(&self, open: bool) {
        self.variable_explorer_open.store(open, Ordering::Relaxed);
        self.collaborators
            .telemetry
            .event("variable_explorer_toggle", None, json!({ "open": open }));
    }

    pub async fn on_theme_changed(&self, is_dark: bool) {
        self.theme.set_dark(is_dark);
        self.manager.refresh_plot_style().await;
    }
}
