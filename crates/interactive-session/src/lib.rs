//! interactive-session - orchestration for interactive kernel windows.
//!
//! A [`Session`] owns the connection to an execution kernel, turns code
//! submissions into a stream of cell updates for its presentation surface,
//! and mirrors submissions and banners to other participants sharing the
//! same logical session.
//!
//! The kernel, the surface, the editor, and every other outside system are
//! reached through the traits in [`kernel`] and [`host`], so each can be
//! replaced by a fake in tests.

use std::sync::{Mutex as StdMutex, MutexGuard};

pub mod cell_tracker;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod host;
pub mod kernel;
pub mod kernel_manager;
pub mod relay;
pub mod session;
pub mod settings;
pub mod single_flight;
pub mod strategy;
pub mod sys_info;
pub mod variables;

pub use dispatcher::{DispatchHandles, MessageDispatcher, MessageListener};
pub use error::{KernelError, SessionError};
pub use host::{Collaborators, SurfaceSender, ThemeState};
pub use kernel::{ConnectOptions, ConnectionInfo, ExecuteRequest, Kernel, KernelLauncher, KernelSlot};
pub use kernel_manager::{KernelSessionManager, SessionStatus};
pub use relay::{CollaborationRelay, RelayEvent};
pub use session::Session;
pub use settings::{Settings, SettingsStore};
pub use strategy::{InteractiveStrategy, SessionStrategy};

pub use interactive_protocol as protocol;

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Critical sections in this crate never leave state half-updated, so the
/// poisoned value is still consistent.
pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
