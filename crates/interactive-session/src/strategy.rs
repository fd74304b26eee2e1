//! Behavior that differs between kinds of interactive windows.

use std::sync::Arc;

use async_trait::async_trait;
use interactive_protocol::{CellId, InteractiveInfo, EMPTY_FILE};
use log::debug;

use crate::error::SessionError;
use crate::host::ContextKeys;
use crate::kernel::ConnectOptions;
use crate::session::Session;

pub const CONTEXT_HAVE_INTERACTIVE: &str = "interactive.haveInteractive";
pub const CONTEXT_HAVE_CELLS: &str = "interactive.haveInteractiveCells";
pub const CONTEXT_HAVE_REDOABLE_CELLS: &str = "interactive.haveRedoableCells";

#[async_trait]
pub trait SessionStrategy: Send + Sync {
    /// Handle code typed into the surface's input box.
    async fn submit_new_cell(
        &self,
        session: &Arc<Session>,
        code: String,
        id: CellId,
    ) -> Result<(), SessionError>;

    /// Options for connecting this session's kernel.
    fn session_options(&self) -> ConnectOptions;

    /// Refresh host context from the surface's state; `None` when the
    /// session is going away.
    fn update_contexts(&self, info: Option<&InteractiveInfo>);
}

/// The interactive window: input-box submissions run as if typed at the
/// top of an unnamed file.
pub struct InteractiveStrategy {
    context_keys: Arc<dyn ContextKeys>,
    server_uri: Option<String>,
    enable_debugging: bool,
}

impl InteractiveStrategy {
    pub fn new(context_keys: Arc<dyn ContextKeys>) -> Self {
        Self {
            context_keys,
            server_uri: None,
            enable_debugging: false,
        }
    }

    /// Connect to a remote Jupyter server instead of launching one.
    pub fn with_server_uri(mut self, uri: impl Into<String>) -> Self {
        self.server_uri = Some(uri.into());
        self
    }

    pub fn with_debugging(mut self, enabled: bool) -> Self {
        self.enable_debugging = enabled;
        self
    }
}

#[async_trait]
impl SessionStrategy for InteractiveStrategy {
    async fn submit_new_cell(
        &self,
        session: &Arc<Session>,
        code: String,
        id: CellId,
    ) -> Result<(), SessionError> {
        // The id came from the surface, so relay explicitly.
        session.relay().publish_code(&code, EMPTY_FILE, 0, &id, false);
        let success = session
            .submit_code(&code, EMPTY_FILE, 0, Some(id), false)
            .await?;
        debug!("[strategy] Input box submission finished, success={}", success);
        Ok(())
    }

    fn session_options(&self) -> ConnectOptions {
        ConnectOptions {
            purpose: "interactive".to_string(),
            server_uri: self.server_uri.clone(),
            allow_unauthorized: false,
            enable_debugging: self.enable_debugging,
        }
    }

    fn update_contexts(&self, info: Option<&InteractiveInfo>) {
        match info {
            Some(info) => {
                self.context_keys.set(CONTEXT_HAVE_INTERACTIVE, true);
                self.context_keys.set(CONTEXT_HAVE_CELLS, info.cell_count > 0);
                self.context_keys.set(CONTEXT_HAVE_REDOABLE_CELLS, info.redo_count > 0);
            }
            None => {
                self.context_keys.set(CONTEXT_HAVE_INTERACTIVE, false);
                self.context_keys.set(CONTEXT_HAVE_CELLS, false);
                self.context_keys.set(CONTEXT_HAVE_REDOABLE_CELLS, false);
            }
        }
    }
}
