//! Scripted fakes for every session collaborator.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use interactive_session::host::{
    ApplicationShell, AssetProvider, ContextKeys, DataViewer, DebugAttacher, EditorIntegration,
    Exporter, FileSystem, Prompt, PromptAnswer, Telemetry,
};
use interactive_session::kernel::{
    CellBatchStream, EnvironmentInfo, EnvironmentProbe, SessionMetadata,
};
use interactive_session::protocol::{
    Cell, CellState, CellType, InterruptResult, OutboundMessage, Variable,
};
use interactive_session::relay::Room;
use interactive_session::{
    CollaborationRelay, Collaborators, ConnectOptions, ConnectionInfo, ExecuteRequest, Kernel,
    KernelError, KernelLauncher, Session, Settings, SettingsStore, SurfaceSender,
    InteractiveStrategy,
};
use tokio::sync::mpsc;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ── Kernel ──────────────────────────────────────────────────────────────

/// One step of a scripted execution.
#[derive(Debug, Clone)]
pub enum Step {
    /// A batch with one cell per state. The first cell carries the request
    /// id; later cells get `<id>-<index>`.
    Batch(Vec<CellState>),
    Fail(KernelError),
    /// Never produce anything else.
    Hang,
}

pub fn default_script() -> Vec<Step> {
    vec![
        Step::Batch(vec![CellState::Init]),
        Step::Batch(vec![CellState::Executing]),
        Step::Batch(vec![CellState::Finished]),
    ]
}

pub struct FakeKernel {
    pub calls: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<ExecuteRequest>>,
    pub scripts: Mutex<VecDeque<Vec<Step>>>,
    pub restart_results: Mutex<VecDeque<Result<(), KernelError>>>,
    pub restart_delay: Mutex<Duration>,
    pub interrupt_result: Mutex<Result<InterruptResult, KernelError>>,
    pub variables: Mutex<Vec<Variable>>,
    pub variables_error: Mutex<Option<KernelError>>,
    pub metadata: Vec<String>,
    pub metadata_delay: Mutex<Duration>,
    pub connection: Option<ConnectionInfo>,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            scripts: Mutex::new(VecDeque::new()),
            restart_results: Mutex::new(VecDeque::new()),
            restart_delay: Mutex::new(Duration::ZERO),
            interrupt_result: Mutex::new(Ok(InterruptResult::Success)),
            variables: Mutex::new(Vec::new()),
            variables_error: Mutex::new(None),
            metadata: vec!["Python 3.12.1".to_string()],
            metadata_delay: Mutex::new(Duration::ZERO),
            connection: Some(ConnectionInfo {
                base_url: "http://localhost:8888/".to_string(),
                token: "secret".to_string(),
            }),
        }
    }
}

impl FakeKernel {
    pub fn script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

fn scripted_cell(request: &ExecuteRequest, index: usize, state: CellState) -> Cell {
    let id = if index == 0 {
        request.id.clone()
    } else {
        format!("{}-{}", request.id, index).into()
    };
    let mut cell = Cell::new(id, request.file.clone(), request.line, CellType::Execute);
    cell.state = state;
    cell
}

#[async_trait]
impl Kernel for FakeKernel {
    fn execute(&self, request: ExecuteRequest) -> CellBatchStream {
        self.record("execute");
        self.requests.lock().unwrap().push(request.clone());
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(default_script);

        let mut items: Vec<Result<Vec<Cell>, KernelError>> = Vec::new();
        let mut hang = false;
        for step in steps {
            match step {
                Step::Batch(states) => items.push(Ok(states
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| scripted_cell(&request, i, s))
                    .collect())),
                Step::Fail(e) => items.push(Err(e)),
                Step::Hang => {
                    hang = true;
                    break;
                }
            }
        }

        let stream = futures::stream::iter(items);
        if hang {
            stream.chain(futures::stream::pending()).boxed()
        } else {
            stream.boxed()
        }
    }

    async fn interrupt(&self, _timeout: Duration) -> Result<InterruptResult, KernelError> {
        self.record("interrupt");
        self.interrupt_result.lock().unwrap().clone()
    }

    async fn restart(&self, _timeout: Duration) -> Result<(), KernelError> {
        self.record("restart");
        let delay = *self.restart_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.restart_results.lock().unwrap().pop_front();
        result.unwrap_or(Ok(()))
    }

    async fn set_initial_directory(&self, dir: &Path) -> Result<(), KernelError> {
        self.record(format!("set_initial_directory:{}", dir.display()));
        Ok(())
    }

    async fn set_plot_style(&self, is_dark: bool) -> Result<(), KernelError> {
        self.record(format!("set_plot_style:{}", is_dark));
        Ok(())
    }

    async fn session_metadata(&self) -> Result<SessionMetadata, KernelError> {
        let delay = *self.metadata_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(SessionMetadata {
            lines: self.metadata.clone(),
        })
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.connection.clone()
    }

    async fn variables(&self) -> Result<Vec<Variable>, KernelError> {
        if let Some(error) = self.variables_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.variables.lock().unwrap().clone())
    }

    async fn variable_value(&self, variable: &Variable) -> Result<Variable, KernelError> {
        let mut resolved = variable.clone();
        resolved.value = Some(format!("<{}>", variable.name));
        Ok(resolved)
    }

    async fn dispose(&self) {
        self.record("dispose");
    }

    async fn shutdown(&self) -> Result<(), KernelError> {
        self.record("shutdown");
        Ok(())
    }
}

/// Hands out a fresh [`FakeKernel`] per connect, or a scripted failure.
#[derive(Default)]
pub struct FakeLauncher {
    pub kernels: Mutex<Vec<Arc<FakeKernel>>>,
    pub prepared: Mutex<VecDeque<Arc<FakeKernel>>>,
    pub failures: Mutex<VecDeque<KernelError>>,
    pub options: Mutex<Vec<ConnectOptions>>,
    pub delay: Mutex<Duration>,
}

impl FakeLauncher {
    pub fn connects(&self) -> usize {
        self.options.lock().unwrap().len()
    }

    /// The most recently connected kernel.
    pub fn kernel(&self) -> Arc<FakeKernel> {
        Arc::clone(self.kernels.lock().unwrap().last().expect("no kernel connected"))
    }

    pub fn kernel_at(&self, index: usize) -> Arc<FakeKernel> {
        Arc::clone(&self.kernels.lock().unwrap()[index])
    }

    /// Use `kernel` for the next connect.
    pub fn prepare(&self, kernel: FakeKernel) -> Arc<FakeKernel> {
        let kernel = Arc::new(kernel);
        self.prepared.lock().unwrap().push_back(Arc::clone(&kernel));
        kernel
    }

    pub fn fail_next(&self, error: KernelError) {
        self.failures.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl KernelLauncher for FakeLauncher {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Kernel>, KernelError> {
        self.options.lock().unwrap().push(options.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let kernel = self
            .prepared
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        self.kernels.lock().unwrap().push(Arc::clone(&kernel));
        Ok(kernel as Arc<dyn Kernel>)
    }
}

pub struct FakeEnvironments {
    pub usable: Mutex<Option<EnvironmentInfo>>,
    pub selected: Mutex<Option<EnvironmentInfo>>,
}

pub fn environment(path: &str) -> EnvironmentInfo {
    EnvironmentInfo {
        path: PathBuf::from(path),
        display_name: format!("Python ({})", path),
    }
}

impl Default for FakeEnvironments {
    fn default() -> Self {
        Self {
            usable: Mutex::new(Some(environment("/envs/py"))),
            selected: Mutex::new(Some(environment("/envs/py"))),
        }
    }
}

#[async_trait]
impl EnvironmentProbe for FakeEnvironments {
    async fn usable_environment(&self) -> Result<Option<EnvironmentInfo>, KernelError> {
        Ok(self.usable.lock().unwrap().clone())
    }

    async fn selected_environment(&self) -> Option<EnvironmentInfo> {
        self.selected.lock().unwrap().clone()
    }
}

// ── Host ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeShell {
    pub answers: Mutex<VecDeque<Option<PromptAnswer>>>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub errors: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
    pub infos: Mutex<Vec<String>>,
    pub export_path: Mutex<Option<PathBuf>>,
}

impl FakeShell {
    pub fn answer(&self, answer: Option<PromptAnswer>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplicationShell for FakeShell {
    async fn prompt(&self, prompt: Prompt) -> Option<PromptAnswer> {
        self.prompts.lock().unwrap().push(prompt);
        self.answers.lock().unwrap().pop_front().flatten()
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn show_warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn show_info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    async fn pick_export_path(&self) -> Option<PathBuf> {
        self.export_path.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct FakeEditor {
    pub revealed: Mutex<Vec<(String, u32)>>,
    pub untitled: Mutex<Vec<String>>,
    pub markers: Mutex<Vec<(String, u32)>>,
}

#[async_trait]
impl EditorIntegration for FakeEditor {
    async fn reveal(&self, file: &str, line: u32) -> anyhow::Result<()> {
        self.revealed.lock().unwrap().push((file.to_string(), line));
        Ok(())
    }

    async fn open_untitled(&self, source: &str) -> anyhow::Result<()> {
        self.untitled.lock().unwrap().push(source.to_string());
        Ok(())
    }

    async fn insert_cell_marker_after(&self, file: &str, line: u32) -> anyhow::Result<()> {
        self.markers.lock().unwrap().push((file.to_string(), line));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDebugger {
    pub events: Mutex<Vec<&'static str>>,
}

impl FakeDebugger {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl DebugAttacher for FakeDebugger {
    async fn attach(&self, _kernel: Arc<dyn Kernel>) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("attach");
        Ok(())
    }

    async fn detach(&self, _kernel: Arc<dyn Kernel>) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("detach");
        Ok(())
    }

    async fn on_restart(&self, _kernel: Arc<dyn Kernel>) {
        self.events.lock().unwrap().push("on_restart");
    }
}

#[derive(Default)]
pub struct FakeExporter {
    pub working_dirs: Mutex<Vec<Option<PathBuf>>>,
    pub fail: Mutex<bool>,
}

impl Exporter for FakeExporter {
    fn translate_cells(
        &self,
        cells: &[Cell],
        working_dir: Option<&Path>,
    ) -> anyhow::Result<serde_json::Value> {
        self.working_dirs
            .lock()
            .unwrap()
            .push(working_dir.map(Path::to_path_buf));
        if *self.fail.lock().unwrap() {
            anyhow::bail!("translation failed");
        }
        Ok(serde_json::json!({ "nbformat": 4, "cells": cells.len() }))
    }
}

#[derive(Default)]
pub struct FakeFileSystem {
    pub writes: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

#[async_trait]
impl FileSystem for FakeFileSystem {
    async fn write_file(&self, path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), contents.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDataViewer {
    pub shown: Mutex<Vec<String>>,
}

#[async_trait]
impl DataViewer for FakeDataViewer {
    async fn show(&self, variable: Variable) -> anyhow::Result<()> {
        self.shown.lock().unwrap().push(variable.name);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAssets;

#[async_trait]
impl AssetProvider for FakeAssets {
    async fn tm_language(&self, language_id: &str) -> Option<String> {
        (language_id == "python").then(|| "{\"scopeName\":\"source.python\"}".to_string())
    }

    async fn onigasm_assembly(&self) -> anyhow::Result<Bytes> {
        Ok(Bytes::from_static(b"\0asm"))
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub events: Mutex<Vec<(String, Option<Duration>, serde_json::Value)>>,
}

impl RecordingTelemetry {
    pub fn named(&self, name: &str) -> Vec<(Option<Duration>, serde_json::Value)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, d, p)| (*d, p.clone()))
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn event(&self, name: &str, duration: Option<Duration>, properties: serde_json::Value) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), duration, properties));
    }
}

#[derive(Default)]
pub struct FakeContextKeys {
    pub values: Mutex<Vec<(String, bool)>>,
}

impl FakeContextKeys {
    pub fn last(&self, key: &str) -> Option<bool> {
        self.values
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }
}

impl ContextKeys for FakeContextKeys {
    fn set(&self, key: &str, value: bool) {
        self.values.lock().unwrap().push((key.to_string(), value));
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

/// Settings for tests: no restart confirmation, everything else default.
pub fn test_settings() -> Settings {
    Settings {
        ask_before_restart: false,
        ..Settings::default()
    }
}

pub struct Harness {
    pub session: Arc<Session>,
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub launcher: Arc<FakeLauncher>,
    pub environments: Arc<FakeEnvironments>,
    pub shell: Arc<FakeShell>,
    pub editor: Arc<FakeEditor>,
    pub debugger: Arc<FakeDebugger>,
    pub exporter: Arc<FakeExporter>,
    pub file_system: Arc<FakeFileSystem>,
    pub data_viewer: Arc<FakeDataViewer>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub context_keys: Arc<FakeContextKeys>,
}

pub struct HarnessBuilder {
    settings: SettingsStore,
    session_id: String,
    room: Option<Room>,
    server_uri: Option<String>,
    debugging: bool,
}

impl HarnessBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = SettingsStore::in_memory(settings);
        self
    }

    pub fn settings_store(mut self, store: SettingsStore) -> Self {
        self.settings = store;
        self
    }

    pub fn session_id(mut self, id: &str) -> Self {
        self.session_id = id.to_string();
        self
    }

    pub fn room(mut self, room: &Room) -> Self {
        self.room = Some(room.clone());
        self
    }

    pub fn server_uri(mut self, uri: &str) -> Self {
        self.server_uri = Some(uri.to_string());
        self
    }

    pub fn debugging(mut self, enabled: bool) -> Self {
        self.debugging = enabled;
        self
    }

    pub fn build(self) -> Harness {
        init_logger();
        let (surface, outbound) = SurfaceSender::channel();
        let launcher = Arc::new(FakeLauncher::default());
        let environments = Arc::new(FakeEnvironments::default());
        let shell = Arc::new(FakeShell::default());
        let editor = Arc::new(FakeEditor::default());
        let debugger = Arc::new(FakeDebugger::default());
        let exporter = Arc::new(FakeExporter::default());
        let file_system = Arc::new(FakeFileSystem::default());
        let data_viewer = Arc::new(FakeDataViewer::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let context_keys = Arc::new(FakeContextKeys::default());

        let collaborators = Collaborators {
            launcher: launcher.clone(),
            environments: environments.clone(),
            shell: shell.clone(),
            surface,
            editor: editor.clone(),
            debugger: debugger.clone(),
            exporter: exporter.clone(),
            file_system: file_system.clone(),
            data_viewer: data_viewer.clone(),
            assets: Arc::new(FakeAssets),
            telemetry: telemetry.clone(),
        };

        let mut strategy = InteractiveStrategy::new(context_keys.clone()).with_debugging(self.debugging);
        if let Some(uri) = self.server_uri {
            strategy = strategy.with_server_uri(uri);
        }
        let relay = match &self.room {
            Some(room) => CollaborationRelay::join(self.session_id, room),
            None => CollaborationRelay::detached(self.session_id),
        };

        let session = Session::new(
            collaborators,
            Arc::new(self.settings),
            Arc::new(strategy),
            relay,
        );

        Harness {
            session,
            outbound,
            launcher,
            environments,
            shell,
            editor,
            debugger,
            exporter,
            file_system,
            data_viewer,
            telemetry,
            context_keys,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            settings: SettingsStore::in_memory(test_settings()),
            session_id: "local".to_string(),
            room: None,
            server_uri: None,
            debugging: false,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Everything posted to the surface since the last drain.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Connect and discard the messages the connect produced.
    pub async fn connected(mut self) -> Self {
        self.session.start().await.unwrap().unwrap();
        self.drain();
        self
    }
}

/// Sys-info cells among `messages`.
pub fn sys_info_cells(messages: &[OutboundMessage]) -> Vec<Cell> {
    messages
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::FinishCell { cell } if cell.cell_type == CellType::SysInfo => {
                Some(cell.clone())
            }
            _ => None,
        })
        .collect()
}

/// Short names of the messages, for order assertions.
pub fn kinds(messages: &[OutboundMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| {
            serde_json::to_value(m).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}
