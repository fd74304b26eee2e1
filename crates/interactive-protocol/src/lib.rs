//! Shared types for interactive kernel sessions.
//!
//! This crate defines the cell model and the typed messages passed between
//! the session engine and its presentation surface (a WebView or any other
//! ordered, bidirectional message channel).
//!
//! TypeScript bindings for the surface are generated with `ts-rs`.

mod base64;
pub mod cell;
pub mod message;

pub use base64::{deserialize_bytes, serialize_bytes};
pub use cell::{
    Cell, CellId, CellState, CellType, InterruptResult, SysInfoData, SysInfoReason, EMPTY_FILE,
};
pub use message::{InboundMessage, InteractiveInfo, OutboundMessage, Variable};
