//! Variable explorer requests.
//!
//! A variables request is followed by one value request per listed
//! variable. The time from the list request until the last value arrives is
//! reported to telemetry.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use interactive_protocol::{OutboundMessage, Variable};
use log::{debug, warn};
use serde_json::json;

use crate::error::SessionError;
use crate::host::{Collaborators, SurfaceSender, Telemetry};
use crate::kernel::KernelSlot;
use crate::lock;
use crate::settings::SettingsStore;

pub const FETCH_TIME_EVENT: &str = "variable_explorer_fetch_time";
pub const VARIABLE_COUNT_EVENT: &str = "variable_explorer_variable_count";

#[derive(Debug, Default)]
struct FetchState {
    started: Option<Instant>,
    pending: usize,
}

pub struct VariableCorrelator {
    kernel: KernelSlot,
    settings: Arc<SettingsStore>,
    surface: SurfaceSender,
    telemetry: Arc<dyn Telemetry>,
    state: StdMutex<FetchState>,
}

impl VariableCorrelator {
    pub fn new(collaborators: &Collaborators, kernel: KernelSlot, settings: Arc<SettingsStore>) -> Self {
        Self {
            kernel,
            settings,
            surface: collaborators.surface.clone(),
            telemetry: Arc::clone(&collaborators.telemetry),
            state: StdMutex::new(FetchState::default()),
        }
    }

    pub async fn request_variables(&self, execution_count: u32) -> Result<(), SessionError> {
        lock(&self.state).started = Some(Instant::now());

        let listed = match self.kernel.get() {
            Some(kernel) => match kernel.variables().await {
                Ok(listed) => listed,
                Err(e) => {
                    // Values still arriving belong to an earlier list.
                    let mut state = lock(&self.state);
                    state.pending = 0;
                    state.started = None;
                    return Err(e.into());
                }
            },
            None => Vec::new(),
        };

        let settings = self.settings.get();
        let variables: Vec<Variable> = listed
            .into_iter()
            .filter(|v| !settings.is_excluded_type(&v.type_name))
            .map(|mut v| {
                v.execution_count = Some(execution_count);
                v
            })
            .collect();

        lock(&self.state).pending = variables.len();
        debug!(
            "[variables] {} variables at execution {}",
            variables.len(),
            execution_count
        );

        self.telemetry.event(
            VARIABLE_COUNT_EVENT,
            None,
            json!({ "variableCount": variables.len() }),
        );
        self.surface.post(OutboundMessage::GetVariablesResponse {
            execution_count,
            variables,
        });
        Ok(())
    }

    pub async fn request_variable_value(&self, variable: Variable) -> Result<(), SessionError> {
        let resolved = match self.kernel.get() {
            Some(kernel) => kernel.variable_value(&variable).await?,
            None => {
                warn!("[variables] Value requested for {} without a kernel", variable.name);
                variable
            }
        };

        let elapsed = {
            let mut state = lock(&self.state);
            match state.pending {
                0 => None,
                1 => {
                    state.pending = 0;
                    state.started.take().map(|started| started.elapsed())
                }
                _ => {
                    state.pending -= 1;
                    None
                }
            }
        };
        if let Some(elapsed) = elapsed {
            self.telemetry.event(FETCH_TIME_EVENT, Some(elapsed), json!({}));
        }

        self.surface
            .post(OutboundMessage::GetVariableValueResponse { variable: resolved });
        Ok(())
    }
}
