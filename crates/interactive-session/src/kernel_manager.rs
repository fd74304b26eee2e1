//! Kernel session manager.
//!
//! Owns the session's kernel connection: the connect sequence, restart with
//! its reconnect fallback, interrupt, dispose, and shutdown. Connect and
//! reconnect attempts are single-flight through the `load` handle, and the
//! `restarting` guard keeps restarts from overlapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use interactive_protocol::{InterruptResult, OutboundMessage, SysInfoReason};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::cell_tracker::SharedCellTracker;
use crate::error::{KernelError, SessionError};
use crate::host::{ApplicationShell, Collaborators, Prompt, PromptAnswer, SurfaceSender, ThemeState};
use crate::kernel::{EnvironmentProbe, Kernel, KernelLauncher, KernelSlot};
use crate::lock;
use crate::settings::SettingsStore;
use crate::single_flight::{self, ClearPolicy, Flight, SingleFlight};
use crate::strategy::SessionStrategy;
use crate::sys_info::SysInfoCoalescer;

/// Observable state of the kernel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Restarting,
    /// Terminal; the session accepts no further work.
    Disposed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Restarting => write!(f, "restarting"),
            SessionStatus::Disposed => write!(f, "disposed"),
        }
    }
}

/// Held for the duration of a restart; releases the guard on drop.
struct RestartGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RestartGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

type LoadResult = Result<(), SessionError>;

pub struct KernelSessionManager {
    launcher: Arc<dyn KernelLauncher>,
    environments: Arc<dyn EnvironmentProbe>,
    shell: Arc<dyn ApplicationShell>,
    surface: SurfaceSender,
    settings: Arc<SettingsStore>,
    strategy: Arc<dyn SessionStrategy>,
    kernel: KernelSlot,
    status: StdMutex<SessionStatus>,
    restarting: AtomicBool,
    disposed: AtomicBool,
    /// Current connect or reconnect attempt
    load: SingleFlight<LoadResult>,
    cells: SharedCellTracker,
    sys_info: Arc<SysInfoCoalescer>,
    theme: ThemeState,
}

impl KernelSessionManager {
    pub fn new(
        collaborators: &Collaborators,
        settings: Arc<SettingsStore>,
        strategy: Arc<dyn SessionStrategy>,
        cells: SharedCellTracker,
        sys_info: Arc<SysInfoCoalescer>,
        kernel: KernelSlot,
        theme: ThemeState,
    ) -> Self {
        Self {
            launcher: Arc::clone(&collaborators.launcher),
            environments: Arc::clone(&collaborators.environments),
            shell: Arc::clone(&collaborators.shell),
            surface: collaborators.surface.clone(),
            settings,
            strategy,
            kernel,
            status: StdMutex::new(SessionStatus::Disconnected),
            restarting: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            load: SingleFlight::new(ClearPolicy::Retain),
            cells,
            sys_info,
            theme,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    pub fn kernel(&self) -> Option<Arc<dyn Kernel>> {
        self.kernel.get()
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: SessionStatus) {
        let mut current = lock(&self.status);
        if *current != SessionStatus::Disposed {
            debug!("[kernel-session] {} -> {}", *current, status);
            *current = status;
        }
    }

    /// Start connecting if no attempt exists and return the shared attempt.
    ///
    /// Concurrent callers all receive the same handle. A completed attempt
    /// is kept, so later callers see its result without reconnecting.
    pub fn start_server(self: &Arc<Self>) -> Flight<LoadResult> {
        if self.is_disposed() {
            return single_flight::ready(Err(SessionError::Disposed));
        }
        let this = Arc::clone(self);
        let (flight, started) = self
            .load
            .join_or_start(move || async move { this.connect_sequence().await });
        if started {
            info!("[kernel-session] Starting connect sequence");
        }
        flight
    }

    /// Wait for the current connect attempt, starting one if needed.
    pub async fn wait_for_connection(self: &Arc<Self>) -> LoadResult {
        self.start_server().await?
    }

    async fn connect_sequence(&self) -> LoadResult {
        self.set_status(SessionStatus::Connecting);
        self.surface.post(OutboundMessage::StartProgress);

        let result = self.connect_checked().await;

        self.surface.post(OutboundMessage::StopProgress);
        match &result {
            Ok(()) => {
                self.set_status(SessionStatus::Connected);
                info!("[kernel-session] Connected");
            }
            Err(e) => {
                self.set_status(SessionStatus::Disconnected);
                error!("[kernel-session] Connect failed: {}", e);
            }
        }
        result
    }

    async fn connect_checked(&self) -> LoadResult {
        if !self.check_usable().await? {
            return Err(KernelError::EnvironmentUnusable.into());
        }
        match self.ensure_kernel().await {
            Err(SessionError::Kernel(KernelError::CertificateUntrusted(detail))) => {
                self.handle_untrusted_certificate(&detail).await;
                Err(KernelError::CertificateUntrusted(detail).into())
            }
            other => other,
        }
    }

    /// Whether a kernel can be started at all.
    ///
    /// Remote servers are always usable. Locally, a usable environment that
    /// differs from the selected one only produces a warning.
    pub async fn check_usable(&self) -> Result<bool, SessionError> {
        if self.strategy.session_options().server_uri.is_some() {
            return Ok(true);
        }

        let Some(usable) = self.environments.usable_environment().await? else {
            warn!("[kernel-session] No usable environment found");
            return Ok(false);
        };

        if let Some(selected) = self.environments.selected_environment().await {
            if selected.path != usable.path {
                warn!(
                    "[kernel-session] Selected environment {} is not usable, falling back to {}",
                    selected.path.display(),
                    usable.path.display()
                );
                self.shell.show_warning(&format!(
                    "{} cannot run Jupyter; using {} instead",
                    selected.display_name, usable.display_name
                ));
            }
        }
        Ok(true)
    }

    /// Connect a kernel, disposing the current one first.
    async fn ensure_kernel(&self) -> LoadResult {
        if let Some(previous) = self.kernel.take() {
            debug!("[kernel-session] Disposing previous kernel before connecting");
            previous.dispose().await;
        }

        let mut options = self.strategy.session_options();
        options.allow_unauthorized |= self.settings.get().allow_unauthorized_remote_connection;

        let kernel = self.launcher.connect(&options).await?;
        if self.is_disposed() {
            kernel.dispose().await;
            return Err(SessionError::Disposed);
        }
        if let Some(stale) = self.kernel.replace(Arc::clone(&kernel)) {
            stale.dispose().await;
        }

        self.apply_plot_style(&kernel).await;
        Ok(())
    }

    async fn handle_untrusted_certificate(&self, detail: &str) {
        let answer = self
            .shell
            .prompt(Prompt::TrustSelfSignedCertificate {
                detail: detail.to_string(),
            })
            .await;

        if answer == Some(PromptAnswer::Yes) {
            info!("[kernel-session] Allowing unauthorized remote connections");
            if let Err(e) = self
                .settings
                .update(|s| s.allow_unauthorized_remote_connection = true)
            {
                warn!("[kernel-session] Failed to persist certificate choice: {}", e);
            }
        }
        self.dispose().await;
    }

    async fn apply_plot_style(&self, kernel: &Arc<dyn Kernel>) {
        if let Err(e) = kernel.set_plot_style(self.theme.is_dark()).await {
            warn!("[kernel-session] Failed to set plot style: {}", e);
        }
    }

    /// Re-apply the plot style for the current theme.
    pub async fn refresh_plot_style(&self) {
        if let Some(kernel) = self.kernel.get() {
            self.apply_plot_style(&kernel).await;
        }
    }

    /// Restart the kernel, asking first unless the user opted out.
    ///
    /// Does nothing without a kernel or while another restart is running.
    /// Failures are reported to the user; the session stays usable.
    pub async fn restart_kernel(self: &Arc<Self>) {
        if !self.kernel.is_connected() {
            debug!("[kernel-session] Restart requested without a kernel");
            return;
        }
        let Some(_guard) = RestartGuard::claim(&self.restarting) else {
            info!("[kernel-session] Restart already in progress");
            return;
        };

        if self.settings.get().ask_before_restart {
            match self.shell.prompt(Prompt::RestartKernel).await {
                Some(PromptAnswer::Yes) => {}
                Some(PromptAnswer::DontAskAgain) => {
                    if let Err(e) = self.settings.update(|s| s.ask_before_restart = false) {
                        warn!("[kernel-session] Failed to persist restart preference: {}", e);
                    }
                }
                Some(PromptAnswer::No) | None => {
                    debug!("[kernel-session] Restart declined");
                    return;
                }
            }
        }

        self.restart_kernel_internal().await;
    }

    /// Restart without prompting. The caller holds the restart guard.
    async fn restart_kernel_internal(self: &Arc<Self>) {
        let Some(kernel) = self.kernel.get() else {
            return;
        };

        self.set_status(SessionStatus::Restarting);
        self.surface.post(OutboundMessage::StartProgress);

        match self.restart_sequence(kernel).await {
            Ok(()) => info!("[kernel-session] Kernel restarted"),
            Err(e) if e.is_kernel_busy() => {
                warn!("[kernel-session] Kernel unresponsive during restart, reconnecting");
                if let Err(e) = self.reconnect_after_busy().await {
                    error!("[kernel-session] Reconnect after restart failed: {}", e);
                    self.shell.show_error(&e.to_string());
                }
            }
            Err(e) => {
                error!("[kernel-session] Restart failed: {}", e);
                self.shell.show_error(&e.to_string());
            }
        }

        self.surface.post(OutboundMessage::StopProgress);
        self.set_status(if self.kernel.is_connected() {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        });
    }

    async fn restart_sequence(&self, kernel: Arc<dyn Kernel>) -> LoadResult {
        let forced = lock(&self.cells).force_finish_all();
        if !forced.is_empty() {
            info!("[kernel-session] Finishing {} open cells as errors", forced.len());
        }
        for cell in forced {
            self.surface.post(OutboundMessage::FinishCell { cell });
        }

        kernel
            .restart(self.settings.get().restart_timeout())
            .await?;
        self.sys_info.add_sys_info(SysInfoReason::Restart).await?;
        self.apply_plot_style(&kernel).await;
        Ok(())
    }

    /// Replace an unresponsive kernel with a fresh connection.
    ///
    /// Teardown and reconnect run in one spawned task so they finish even
    /// if this future is dropped.
    async fn reconnect_after_busy(self: &Arc<Self>) -> LoadResult {
        let this = Arc::clone(self);
        let flight = self.load.start(async move { this.ensure_kernel().await });
        flight.await??;
        self.sys_info.add_sys_info(SysInfoReason::Restart).await?;
        Ok(())
    }

    /// Interrupt the running execution.
    pub async fn interrupt_kernel(self: &Arc<Self>) {
        let Some(kernel) = self.kernel.get() else {
            debug!("[kernel-session] Interrupt requested without a kernel");
            return;
        };
        if self.is_restarting() {
            info!("[kernel-session] Ignoring interrupt during restart");
            return;
        }

        self.surface.post(OutboundMessage::StartProgress);
        let result = kernel
            .interrupt(self.settings.get().interrupt_timeout())
            .await;
        self.surface.post(OutboundMessage::StopProgress);

        match result {
            Ok(InterruptResult::Success) => debug!("[kernel-session] Interrupted"),
            Ok(InterruptResult::TimedOut) => {
                warn!("[kernel-session] Interrupt timed out");
                let answer = self.shell.prompt(Prompt::RestartAfterInterruptTimeout).await;
                if answer == Some(PromptAnswer::Yes) {
                    match RestartGuard::claim(&self.restarting) {
                        Some(_guard) => self.restart_kernel_internal().await,
                        None => info!("[kernel-session] Restart already in progress"),
                    }
                }
            }
            Ok(InterruptResult::Restarted) => {
                info!("[kernel-session] Kernel restarted while interrupting");
                if let Err(e) = self.sys_info.add_sys_info(SysInfoReason::Interrupt).await {
                    warn!("[kernel-session] Failed to add interrupt banner: {}", e);
                }
            }
            Err(e) => {
                error!("[kernel-session] Interrupt failed: {}", e);
                self.shell.show_error(&e.to_string());
            }
        }
    }

    /// Tear down the connection and clear host context. Safe to call more
    /// than once.
    ///
    /// Every dispose path ends here, including the ones the session takes
    /// on its own after a failed connect.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        *lock(&self.status) = SessionStatus::Disposed;
        self.load.clear();
        self.strategy.update_contexts(None);

        if let Some(kernel) = self.kernel.take() {
            info!("[kernel-session] Disposing kernel");
            let teardown = tokio::spawn(async move { kernel.dispose().await });
            if let Err(e) = teardown.await {
                warn!("[kernel-session] Kernel dispose task failed: {}", e);
            }
        }
    }

    /// Ask the kernel to shut down, then release it.
    pub async fn shutdown(&self) -> LoadResult {
        let Some(kernel) = self.kernel.take() else {
            return Ok(());
        };
        self.load.clear();
        info!("[kernel-session] Shutting down kernel");

        let teardown = tokio::spawn(async move {
            let result = kernel.shutdown().await;
            kernel.dispose().await;
            result
        });
        let result = teardown
            .await
            .map_err(|e| SessionError::Aborted(e.to_string()))?;

        self.set_status(SessionStatus::Disconnected);
        result.map_err(SessionError::from)
    }
}
