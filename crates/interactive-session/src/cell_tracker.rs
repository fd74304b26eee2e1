use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use interactive_protocol::{Cell, CellId, CellState, OutboundMessage};
use log::debug;

/// How many terminated ids are remembered for dropping late snapshots.
pub const TERMINATED_CAPACITY: usize = 1024;

/// Cells of the current session that have not reached a terminal state.
///
/// Every observed snapshot maps to at most one outbound message. A cell is
/// reported as finished exactly once; snapshots arriving after that are
/// dropped.
#[derive(Debug, Default)]
pub struct CellTracker {
    /// Unfinished cells in the order they were first seen
    unfinished: Vec<Cell>,
    /// Ids that already produced a terminal message, oldest first in
    /// `terminated_order`; both hold at most `TERMINATED_CAPACITY` ids
    terminated: HashSet<CellId>,
    terminated_order: VecDeque<CellId>,
}

impl CellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot and return the message to forward, if any.
    pub fn observe(&mut self, cell: &Cell) -> Option<OutboundMessage> {
        if self.terminated.contains(&cell.id) {
            debug!("[cells] Dropping late snapshot for finished cell {}", cell.id);
            return None;
        }

        if cell.is_terminal() {
            self.unfinished.retain(|c| c.id != cell.id);
            self.mark_terminated(&cell.id);
            return Some(OutboundMessage::FinishCell { cell: cell.clone() });
        }

        match self.position(&cell.id) {
            Some(index) => {
                self.unfinished[index] = cell.clone();
                Some(OutboundMessage::UpdateCell { cell: cell.clone() })
            }
            None if cell.state == CellState::Init => {
                self.unfinished.push(cell.clone());
                Some(OutboundMessage::StartCell { cell: cell.clone() })
            }
            None => {
                // Executing without a prior init snapshot.
                self.unfinished.push(cell.clone());
                Some(OutboundMessage::UpdateCell { cell: cell.clone() })
            }
        }
    }

    /// Force every unfinished cell to `error` and return them in order.
    ///
    /// The tracker is empty afterwards.
    pub fn force_finish_all(&mut self) -> Vec<Cell> {
        let cells: Vec<Cell> = self
            .unfinished
            .drain(..)
            .map(|c| c.with_state(CellState::Error))
            .collect();
        for cell in &cells {
            self.mark_terminated(&cell.id);
        }
        cells
    }

    pub fn is_unfinished(&self, id: &CellId) -> bool {
        self.position(id).is_some()
    }

    pub fn unfinished(&self) -> &[Cell] {
        &self.unfinished
    }

    pub fn is_empty(&self) -> bool {
        self.unfinished.is_empty()
    }

    pub fn terminated_len(&self) -> usize {
        self.terminated.len()
    }

    fn mark_terminated(&mut self, id: &CellId) {
        if !self.terminated.insert(id.clone()) {
            return;
        }
        self.terminated_order.push_back(id.clone());
        if self.terminated_order.len() > TERMINATED_CAPACITY {
            if let Some(oldest) = self.terminated_order.pop_front() {
                self.terminated.remove(&oldest);
            }
        }
    }

    fn position(&self, id: &CellId) -> Option<usize> {
        self.unfinished.iter().position(|c| &c.id == id)
    }
}

pub type SharedCellTracker = Arc<StdMutex<CellTracker>>;
