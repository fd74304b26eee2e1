//! Typed messages exchanged with the presentation surface.
//!
//! Both directions use internally tagged JSON:
//! `{"type": "submit_new_cell", "code": "...", "id": "..."}`.
//! Binary payloads (the tokenizer assembly) travel base64-encoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::base64::{deserialize_bytes, serialize_bytes};
use crate::cell::{Cell, CellId, SysInfoReason};

/// A variable reported by the kernel's variable explorer support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Variable {
    pub name: String,
    /// Type name as reported by the kernel (`"DataFrame"`, `"int"`, ...).
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub shape: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub supports_data_explorer: bool,
    /// Execution count of the request that produced this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u32>,
}

impl Variable {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: None,
            size: 0,
            shape: String::new(),
            count: 0,
            truncated: false,
            supports_data_explorer: false,
            execution_count: None,
        }
    }
}

/// Context snapshot the surface sends so the host can update its UI state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InteractiveInfo {
    pub cell_count: u32,
    pub undo_count: u32,
    pub redo_count: u32,
}

/// Messages received from the presentation surface.
///
/// Kinds the host does not recognize deserialize into [`InboundMessage::Unknown`];
/// they are not routed but are still fanned out to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum InboundMessage {
    /// Code typed into the surface's input box.
    SubmitNewCell { code: String, id: CellId },
    RestartKernel,
    Interrupt,
    /// Export the given cells to a notebook file.
    Export { cells: Vec<Cell> },
    GotoCodeCell { file: String, line: u32 },
    CopyCodeCell { source: String },
    DeleteCell { id: CellId },
    DeleteAllCells,
    Undo,
    Redo,
    ExpandAll,
    CollapseAll,
    SendInfo { info: InteractiveInfo },
    VariableExplorerToggle { open: bool },
    /// A sys-info banner generated by another participant.
    SysInfoAdded {
        reason: SysInfoReason,
        cell: Cell,
        originator: String,
    },
    /// A code submission made by another participant.
    RemoteAddCode {
        code: String,
        file: String,
        line: u32,
        id: CellId,
        originator: String,
        #[serde(default)]
        debug: bool,
    },
    ShowDataViewer { variable: Variable, column_size: u32 },
    GetVariablesRequest { execution_count: u32 },
    GetVariableValueRequest { variable: Variable },
    LoadTmLanguageRequest { language_id: String },
    LoadOnigasmAssemblyRequest,
    /// Base-host message: the surface switched between light and dark themes.
    ThemeChanged { is_dark: bool },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::SubmitNewCell { .. } => "submit_new_cell",
            InboundMessage::RestartKernel => "restart_kernel",
            InboundMessage::Interrupt => "interrupt",
            InboundMessage::Export { .. } => "export",
            InboundMessage::GotoCodeCell { .. } => "goto_code_cell",
            InboundMessage::CopyCodeCell { .. } => "copy_code_cell",
            InboundMessage::DeleteCell { .. } => "delete_cell",
            InboundMessage::DeleteAllCells => "delete_all_cells",
            InboundMessage::Undo => "undo",
            InboundMessage::Redo => "redo",
            InboundMessage::ExpandAll => "expand_all",
            InboundMessage::CollapseAll => "collapse_all",
            InboundMessage::SendInfo { .. } => "send_info",
            InboundMessage::VariableExplorerToggle { .. } => "variable_explorer_toggle",
            InboundMessage::SysInfoAdded { .. } => "sys_info_added",
            InboundMessage::RemoteAddCode { .. } => "remote_add_code",
            InboundMessage::ShowDataViewer { .. } => "show_data_viewer",
            InboundMessage::GetVariablesRequest { .. } => "get_variables_request",
            InboundMessage::GetVariableValueRequest { .. } => "get_variable_value_request",
            InboundMessage::LoadTmLanguageRequest { .. } => "load_tm_language_request",
            InboundMessage::LoadOnigasmAssemblyRequest => "load_onigasm_assembly_request",
            InboundMessage::ThemeChanged { .. } => "theme_changed",
            InboundMessage::Unknown => "unknown",
        }
    }
}

/// Messages sent to the presentation surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum OutboundMessage {
    StartCell { cell: Cell },
    UpdateCell { cell: Cell },
    FinishCell { cell: Cell },
    /// Bring the surface to the front.
    Activate,
    StartProgress,
    StopProgress,
    Undo,
    Redo,
    DeleteAllCells,
    ExpandAll,
    CollapseAll,
    GetVariablesResponse {
        execution_count: u32,
        variables: Vec<Variable>,
    },
    GetVariableValueResponse { variable: Variable },
    LoadTmLanguageResponse {
        language_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    LoadOnigasmAssemblyResponse {
        #[serde(serialize_with = "serialize_bytes", deserialize_with = "deserialize_bytes")]
        #[ts(type = "string")]
        assembly: Bytes,
    },
    /// The kernel was restarted or replaced; the surface drops stale kernel state.
    ResetKernelView,
}

impl OutboundMessage {
    /// The cell carried by a cell lifecycle message.
    pub fn cell(&self) -> Option<&Cell> {
        match self {
            OutboundMessage::StartCell { cell }
            | OutboundMessage::UpdateCell { cell }
            | OutboundMessage::FinishCell { cell } => Some(cell),
            _ => None,
        }
    }
}
