//! Session banner cells.
//!
//! Banner generation is single-flight: a request made while a generation
//! is running waits for that generation instead of starting another.

use std::sync::Arc;

use interactive_protocol::{Cell, OutboundMessage, SysInfoReason};
use log::{debug, warn};

use crate::error::SessionError;
use crate::host::{DebugAttacher, SurfaceSender};
use crate::kernel::KernelSlot;
use crate::relay::CollaborationRelay;
use crate::single_flight::{ClearPolicy, SingleFlight};

type Generation = Result<Option<Cell>, SessionError>;

fn banner(reason: SysInfoReason) -> &'static str {
    match reason {
        SysInfoReason::Start => "Started the interactive kernel session",
        SysInfoReason::Restart => "Restarted the kernel",
        SysInfoReason::Interrupt => "The kernel died while interrupting and was restarted",
        SysInfoReason::New => "Connected to a new kernel",
    }
}

pub struct SysInfoCoalescer {
    kernel: KernelSlot,
    surface: SurfaceSender,
    relay: CollaborationRelay,
    debugger: Arc<dyn DebugAttacher>,
    flight: SingleFlight<Generation>,
}

impl SysInfoCoalescer {
    pub fn new(
        kernel: KernelSlot,
        surface: SurfaceSender,
        relay: CollaborationRelay,
        debugger: Arc<dyn DebugAttacher>,
    ) -> Self {
        Self {
            kernel,
            surface,
            relay,
            debugger,
            flight: SingleFlight::new(ClearPolicy::ClearOnComplete),
        }
    }

    /// Generate a banner, or wait for the one already being generated.
    ///
    /// Returns the banner cell, or `None` if no kernel is connected.
    pub async fn add_sys_info(self: &Arc<Self>, reason: SysInfoReason) -> Generation {
        let this = Arc::clone(self);
        let (flight, started) = self
            .flight
            .join_or_start(move || async move { this.generate(reason).await });
        if !started {
            debug!("[sys-info] Joining in-flight generation ({} requested)", reason);
        }
        flight.await?
    }

    async fn generate(&self, reason: SysInfoReason) -> Generation {
        let Some(kernel) = self.kernel.get() else {
            debug!("[sys-info] No kernel connected, skipping {} banner", reason);
            return Ok(None);
        };

        let mut messages = Vec::new();
        if reason == SysInfoReason::Start {
            if let Some(info) = kernel.connection_info() {
                messages.push(format!("Jupyter Server URI: {}", info.display_url()));
            }
        }
        messages.push(banner(reason).to_string());
        match kernel.session_metadata().await {
            Ok(metadata) => messages.extend(metadata.lines),
            Err(e) => warn!("[sys-info] Could not read kernel metadata: {}", e),
        }

        let cell = Cell::sys_info(messages);
        self.surface
            .post(OutboundMessage::FinishCell { cell: cell.clone() });

        if reason.is_relayed() {
            self.relay.publish_sys_info(reason, &cell);
        }
        if reason.resets_kernel_view() {
            self.surface.post(OutboundMessage::ResetKernelView);
            self.debugger.on_restart(kernel).await;
        }

        debug!("[sys-info] Added {} banner {}", reason, cell.id);
        Ok(Some(cell))
    }
}
