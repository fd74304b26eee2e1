//! Cell model shared between the session engine and the presentation surface.
//!
//! A cell is one unit of submitted code (or one system message) together
//! with its execution state and output. Cells move through
//! `init → executing → finished | error`; once terminal they never change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

/// File name used for submissions that did not come from a file on disk
/// (the input box, sys-info banners).
pub const EMPTY_FILE: &str = "<no file>";

/// Opaque, stable identity of a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct CellId(pub String);

impl CellId {
    /// Generate a fresh random cell id.
    pub fn new_v4() -> Self {
        CellId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        CellId(s.to_string())
    }
}

impl From<String> for CellId {
    fn from(s: String) -> Self {
        CellId(s)
    }
}

/// Execution state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CellState {
    Init,
    Executing,
    Finished,
    Error,
}

impl CellState {
    /// `finished` and `error` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, CellState::Finished | CellState::Error)
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellState::Init => write!(f, "init"),
            CellState::Executing => write!(f, "executing"),
            CellState::Finished => write!(f, "finished"),
            CellState::Error => write!(f, "error"),
        }
    }
}

/// What kind of cell this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CellType {
    /// Rendered but not executed (e.g. markdown preview of the submission).
    Preview,
    /// Regular executed code.
    Execute,
    /// Informational banner injected by the session.
    SysInfo,
}

/// One unit of executed code and its result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cell {
    pub id: CellId,
    /// Source file path, or [`EMPTY_FILE`].
    pub file: String,
    pub line: u32,
    pub state: CellState,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    /// Kernel output for execute cells, [`SysInfoData`] for sys-info cells.
    #[serde(default)]
    pub data: Value,
}

impl Cell {
    pub fn new(id: CellId, file: impl Into<String>, line: u32, cell_type: CellType) -> Self {
        Self {
            id,
            file: file.into(),
            line,
            state: CellState::Init,
            cell_type,
            data: Value::Null,
        }
    }

    /// A finished sys-info cell carrying the given banner lines.
    pub fn sys_info(messages: Vec<String>) -> Self {
        Self {
            id: CellId::new_v4(),
            file: EMPTY_FILE.to_string(),
            line: 0,
            state: CellState::Finished,
            cell_type: CellType::SysInfo,
            data: serde_json::to_value(SysInfoData { messages }).unwrap_or_default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn with_state(mut self, state: CellState) -> Self {
        self.state = state;
        self
    }

    /// Banner lines if this is a sys-info cell.
    pub fn sys_info_messages(&self) -> Option<Vec<String>> {
        if self.cell_type != CellType::SysInfo {
            return None;
        }
        serde_json::from_value::<SysInfoData>(self.data.clone())
            .ok()
            .map(|d| d.messages)
    }
}

/// Payload of a sys-info cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SysInfoData {
    pub messages: Vec<String>,
}

/// Why a sys-info banner is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SysInfoReason {
    Start,
    Restart,
    Interrupt,
    New,
}

impl SysInfoReason {
    /// Start banners stay local; every other reason is mirrored to collaborators.
    pub fn is_relayed(self) -> bool {
        !matches!(self, SysInfoReason::Start)
    }

    /// Restart and New reset the surface's kernel view.
    pub fn resets_kernel_view(self) -> bool {
        matches!(self, SysInfoReason::Restart | SysInfoReason::New)
    }
}

impl std::fmt::Display for SysInfoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SysInfoReason::Start => write!(f, "start"),
            SysInfoReason::Restart => write!(f, "restart"),
            SysInfoReason::Interrupt => write!(f, "interrupt"),
            SysInfoReason::New => write!(f, "new"),
        }
    }
}

/// Outcome of an interrupt attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum InterruptResult {
    Success,
    TimedOut,
    /// The interrupt crashed the kernel and it was restarted automatically.
    Restarted,
}
