//! Routes surface messages to session handlers.
//!
//! Each message is routed to its handler first, then fanned out to every
//! registered listener, then given to base handling (theme changes).
//! Handlers run as their own tasks, so a slow or failing handler never
//! holds up the messages behind it.

use std::sync::{Arc, RwLock};

use interactive_protocol::InboundMessage;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::session::Session;

/// Observes every inbound message after it has been routed.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &InboundMessage);
}

/// Tasks started for one dispatched message.
#[derive(Debug, Default)]
pub struct DispatchHandles {
    pub routed: Option<JoinHandle<()>>,
    pub base: Option<JoinHandle<()>>,
}

impl DispatchHandles {
    /// Wait for every task started for the message.
    pub async fn join(self) {
        for handle in [self.routed, self.base].into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!("[dispatcher] Handler task failed: {}", e);
            }
        }
    }
}

pub struct MessageDispatcher {
    session: Arc<Session>,
    listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
}

impl MessageDispatcher {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn dispatch(&self, message: InboundMessage) -> DispatchHandles {
        let routed = self.route(&message);

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in &listeners {
            listener.on_message(&message);
        }

        let base = self.handle_base(&message);
        DispatchHandles { routed, base }
    }

    /// Dispatch messages from `inbound` until the channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!("[dispatcher] Running for session {}", self.session.id());
        while let Some(message) = inbound.recv().await {
            debug!("[dispatcher] {}", message.kind());
            self.dispatch(message);
        }
        info!("[dispatcher] Inbound channel closed for session {}", self.session.id());
    }

    fn route(&self, message: &InboundMessage) -> Option<JoinHandle<()>> {
        if matches!(
            message,
            InboundMessage::Unknown | InboundMessage::ThemeChanged { .. }
        ) {
            return None;
        }

        let session = Arc::clone(&self.session);
        let message = message.clone();
        Some(tokio::spawn(async move {
            let kind = message.kind();
            if let Err(e) = handle_message(&session, message).await {
                error!("[dispatcher] {} failed: {}", kind, e);
                session.collaborators().shell.show_error(&e.to_string());
            }
        }))
    }

    fn handle_base(&self, message: &InboundMessage) -> Option<JoinHandle<()>> {
        match message {
            InboundMessage::ThemeChanged { is_dark } => {
                let session = Arc::clone(&self.session);
                let is_dark = *is_dark;
                Some(tokio::spawn(async move {
                    session.on_theme_changed(is_dark).await;
                }))
            }
            _ => None,
        }
    }
}

async fn handle_message(session: &Arc<Session>, message: InboundMessage) -> Result<(), SessionError> {
    match message {
        InboundMessage::SubmitNewCell { code, id } => session.submit_new_cell(code, id).await,
        InboundMessage::RestartKernel => {
            session.restart_kernel().await;
            Ok(())
        }
        InboundMessage::Interrupt => {
            session.interrupt_kernel().await;
            Ok(())
        }
        InboundMessage::Export { cells } => session.export(cells).await,
        InboundMessage::GotoCodeCell { file, line } => session.goto_code(&file, line).await,
        InboundMessage::CopyCodeCell { source } => session.copy_code(&source).await,
        InboundMessage::DeleteCell { .. }
        | InboundMessage::DeleteAllCells
        | InboundMessage::Undo
        | InboundMessage::Redo
        | InboundMessage::ExpandAll
        | InboundMessage::CollapseAll => {
            session.on_cell_tree_change(message.kind());
            Ok(())
        }
        InboundMessage::SendInfo { info } => {
            session.on_send_info(&info);
            Ok(())
        }
        InboundMessage::VariableExplorerToggle { open } => {
            session.on_variable_explorer_toggle(open);
            Ok(())
        }
        InboundMessage::SysInfoAdded {
            reason,
            cell,
            originator,
        } => {
            session.on_sys_info_added(reason, cell, &originator);
            Ok(())
        }
        InboundMessage::RemoteAddCode {
            code,
            file,
            line,
            id,
            originator,
            debug,
        } => {
            session
                .on_remote_add_code(&code, &file, line, id, &originator, debug)
                .await
        }
        InboundMessage::ShowDataViewer {
            variable,
            column_size,
        } => session.show_data_viewer(variable, column_size).await,
        InboundMessage::GetVariablesRequest { execution_count } => {
            session.request_variables(execution_count).await
        }
        InboundMessage::GetVariableValueRequest { variable } => {
            session.request_variable_value(variable).await
        }
        InboundMessage::LoadTmLanguageRequest { language_id } => {
            session.load_tm_language(language_id).await;
            Ok(())
        }
        InboundMessage::LoadOnigasmAssemblyRequest => session.load_onigasm_assembly().await,
        InboundMessage::ThemeChanged { .. } | InboundMessage::Unknown => Ok(()),
    }
}
