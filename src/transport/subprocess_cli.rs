//! Transport that runs the Claude Code CLI as a child process and speaks
//! line-delimited JSON over its standard streams.

use std::ffi::OsStr;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::config::{
    AgentDefinition, ClaudeAgentOptions, McpServerConfig, McpServers, OptionsError, SettingSource,
    SystemPrompt,
};
use crate::env::{self, ENTRYPOINT_VAR, SDK_VERSION_VAR};
use crate::error::{
    CliConnectionError, CliNotFoundError, JsonDecodeError, MessageParseError, ProcessError,
    SdkError,
};
use crate::internal::message_parser;
use crate::transport::framer::{JsonFramer, DEFAULT_MAX_BUFFER_SIZE};
use crate::transport::{FrameStream, InboundFrame, Transport};

/// Entrypoint reported to the CLI unless overridden.
pub const SDK_ENTRYPOINT: &str = "sdk-rs";
pub const MINIMUM_CLAUDE_CODE_VERSION: &str = "2.0.0";

const STDOUT_INITIAL_CAPACITY: usize = 64 * 1024;
const MAX_LINE_LENGTH: usize = 10 * 1024 * 1024;
const MESSAGE_CHANNEL_CAPACITY: usize = 100;
const ERROR_CHANNEL_CAPACITY: usize = 10;
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);
const DEBUG_TO_STDERR_FLAG: &str = "debug-to-stderr";
#[cfg(windows)]
const CMD_LENGTH_LIMIT: usize = 8_000;
#[cfg(not(windows))]
const CMD_LENGTH_LIMIT: usize = 100_000;

const INSTALL_GUIDANCE: &str = "Claude Code not found. Install with:
  npm install -g @anthropic-ai/claude-code

If already installed locally, try:
  export PATH=\"$HOME/node_modules/.bin:$PATH\"

Or set ClaudeAgentOptions::cli_path";

type FrameSender = mpsc::Sender<Result<InboundFrame, SdkError>>;
type FrameReceiver = mpsc::Receiver<Result<InboundFrame, SdkError>>;

/// How the prompt reaches the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    /// One-shot: the prompt is passed after `--print --` and stdin is closed.
    Text(String),
    /// Messages are written to stdin as `stream-json`.
    Streaming,
}

/// Transport implementation backed by the Claude CLI subprocess.
#[derive(Debug, Clone)]
pub struct SubprocessCliTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    prompt: PromptMode,
    options: ClaudeAgentOptions,
    max_buffer_size: usize,
    cancel: CancellationToken,
    state: RwLock<TransportState>,
    stdin: Mutex<Option<ChildStdin>>,
    lifecycle: Mutex<()>,
    messages_tx: std::sync::Mutex<Option<FrameSender>>,
    messages_rx: std::sync::Mutex<Option<FrameReceiver>>,
    errors_tx: std::sync::Mutex<Option<mpsc::Sender<SdkError>>>,
    errors_rx: std::sync::Mutex<Option<mpsc::Receiver<SdkError>>>,
}

#[derive(Debug, Default)]
struct TransportState {
    connected: bool,
    closed: bool,
    ready: bool,
    entrypoint: String,
    cli_path: Option<PathBuf>,
    exit_error: Option<SdkError>,
    exit_status: Option<ExitStatus>,
    child: Option<Arc<Mutex<Child>>>,
    reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
    temp_files: Vec<TempPath>,
}

impl SubprocessCliTransport {
    /// Create a transport; nothing is spawned until [`Transport::connect`].
    pub fn new(prompt: PromptMode, options: ClaudeAgentOptions) -> Self {
        let max_buffer_size = options.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE);
        let (messages_tx, messages_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                prompt,
                options,
                max_buffer_size,
                cancel: CancellationToken::new(),
                state: RwLock::new(TransportState {
                    entrypoint: SDK_ENTRYPOINT.to_string(),
                    ..TransportState::default()
                }),
                stdin: Mutex::new(None),
                lifecycle: Mutex::new(()),
                messages_tx: std::sync::Mutex::new(Some(messages_tx)),
                messages_rx: std::sync::Mutex::new(Some(messages_rx)),
                errors_tx: std::sync::Mutex::new(Some(errors_tx)),
                errors_rx: std::sync::Mutex::new(Some(errors_rx)),
            }),
        }
    }

    /// Override the `CLAUDE_CODE_ENTRYPOINT` value used by the next connect.
    pub fn with_entrypoint(self, entrypoint: impl Into<String>) -> Self {
        self.inner.write_state().entrypoint = entrypoint.into();
        self
    }

    pub fn entrypoint(&self) -> String {
        self.inner.read_state().entrypoint.clone()
    }

    /// Hand out the receiving side of the error channel. Returns `None` after
    /// the first call.
    pub fn take_error_receiver(&self) -> Option<mpsc::Receiver<SdkError>> {
        lock(&self.inner.errors_rx).take()
    }

    /// Exit status of the CLI once the reader observed it.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.read_state().exit_status
    }

    /// Path of the CLI binary chosen at connect.
    pub fn cli_path(&self) -> Option<PathBuf> {
        self.inner.read_state().cli_path.clone()
    }

    /// Arguments passed to the CLI, without the program name.
    pub fn build_argv(&self) -> Result<Vec<String>, SdkError> {
        build_args(&self.inner.prompt, &self.inner.options)
    }
}

#[async_trait]
impl Transport for SubprocessCliTransport {
    async fn connect(&self) -> Result<(), SdkError> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        if inner.cancel.is_cancelled() {
            return Err(CliConnectionError::new("transport is closed").into());
        }
        if inner.read_state().connected {
            return Ok(());
        }

        inner.options.validate().map_err(validation_error)?;
        let cli_path = match inner.options.cli_path.clone() {
            Some(path) => path,
            None => find_cli().ok_or_else(|| CliNotFoundError::new(INSTALL_GUIDANCE, None))?,
        };

        if !env::skip_version_check() {
            check_version(&cli_path).await;
        }

        let CommandLine { args, temp_files } =
            command_line(&inner.prompt, &inner.options, &cli_path)?;
        let pipe_stderr = should_pipe_stderr(&inner.options);
        let entrypoint = inner.read_state().entrypoint.clone();

        let mut command = Command::new(&cli_path);
        command
            .args(&args)
            .envs(&inner.options.env)
            .env(ENTRYPOINT_VAR, &entrypoint)
            .env(SDK_VERSION_VAR, env!("CARGO_PKG_VERSION"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = inner.options.cwd.as_ref() {
            command.current_dir(cwd).env("PWD", cwd);
        }
        if pipe_stderr {
            command.stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SdkError::from(
                    CliNotFoundError::new("Claude Code not found at", Some(cli_path.clone()))
                        .with_cause(err),
                )
            } else {
                SdkError::from(
                    CliConnectionError::new("Failed to start Claude Code").with_cause(err),
                )
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CliConnectionError::new("Missing stdout handle from CLI process"))?;
        let stdin = match inner.prompt {
            PromptMode::Text(_) => {
                log::debug!("[transport::connect] text prompt, closing stdin");
                drop(child.stdin.take());
                None
            }
            PromptMode::Streaming => child.stdin.take(),
        };
        let stderr = if pipe_stderr { child.stderr.take() } else { None };

        let messages_tx = lock(&inner.messages_tx)
            .take()
            .ok_or_else(|| CliConnectionError::new("transport message channel already used"))?;

        log::debug!(
            "[transport::connect] started {} (pid {:?}) with {} args",
            cli_path.display(),
            child.id(),
            args.len()
        );

        *inner.stdin.lock().await = stdin;

        let child = Arc::new(Mutex::new(child));
        let reader = tokio::spawn(read_stdout(
            Arc::clone(inner),
            stdout,
            Arc::clone(&child),
            messages_tx,
        ));
        let stderr_reader =
            stderr.map(|stream| tokio::spawn(read_stderr(Arc::clone(inner), stream)));

        let mut state = inner.write_state();
        state.connected = true;
        state.ready = true;
        state.cli_path = Some(cli_path);
        state.child = Some(child);
        state.reader = Some(reader);
        state.stderr_reader = stderr_reader;
        state.temp_files = temp_files;
        Ok(())
    }

    async fn write(&self, line: &str) -> Result<(), SdkError> {
        let inner = &self.inner;
        let line = line.trim();
        if line.is_empty() {
            return Err(JsonDecodeError::new("refusing to write an empty line").into());
        }
        if line.contains('\n') {
            return Err(JsonDecodeError::new("outbound message must fit on one line")
                .with_line(line)
                .into());
        }

        inner.check_writable()?;

        let mut stdin = tokio::select! {
            _ = inner.cancel.cancelled() => return Err(closed_during_write()),
            guard = inner.stdin.lock() => guard,
        };
        inner.check_writable()?;

        let Some(pipe) = stdin.as_mut() else {
            log::error!("[transport::write] stdin is already closed");
            return Err(CliConnectionError::new("CLI stdin is closed").into());
        };

        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        let result = tokio::select! {
            _ = inner.cancel.cancelled() => return Err(closed_during_write()),
            result = async {
                pipe.write_all(&payload).await?;
                pipe.flush().await
            } => result,
        };

        if let Err(err) = result {
            let error = SdkError::from(
                CliConnectionError::new("Failed to write to CLI stdin").with_cause(err),
            );
            let mut state = inner.write_state();
            state.ready = false;
            state.exit_error.get_or_insert_with(|| error.clone());
            return Err(error);
        }

        log::debug!("[transport::write] wrote {} bytes", payload.len());
        Ok(())
    }

    fn read_messages(&self) -> FrameStream {
        match lock(&self.inner.messages_rx).take() {
            Some(rx) => ReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    async fn end_input(&self) -> Result<(), SdkError> {
        let mut stdin = self.inner.stdin.lock().await;
        if let Some(mut pipe) = stdin.take() {
            log::debug!("[transport::end_input] closing stdin");
            pipe.shutdown().await.map_err(|err| {
                CliConnectionError::new("Failed to close CLI stdin").with_cause(err)
            })?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SdkError> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        let (child, reader, stderr_reader, temp_files) = {
            let mut state = inner.write_state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.ready = false;
            inner.cancel.cancel();
            (
                state.child.take(),
                state.reader.take(),
                state.stderr_reader.take(),
                std::mem::take(&mut state.temp_files),
            )
        };
        log::debug!("[transport::close] shutting down");

        if let Some(mut pipe) = inner.stdin.lock().await.take() {
            let _ = pipe.shutdown().await;
        }

        if let Some(task) = stderr_reader {
            join_with_timeout(task, STDERR_DRAIN_TIMEOUT, "stderr").await;
        }

        if let Some(child) = child {
            terminate_child(&mut *child.lock().await).await;
        }

        if let Some(task) = reader {
            join_with_timeout(task, TERMINATE_TIMEOUT, "stdout").await;
        }

        drop(temp_files);
        lock(&inner.errors_tx).take();
        lock(&inner.messages_tx).take();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.read_state().ready
    }

    fn on_error(&self, error: SdkError) {
        self.inner.on_error(error);
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, TransportState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, TransportState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), SdkError> {
        let state = self.read_state();
        if let Some(exit) = state.exit_error.as_ref() {
            return Err(CliConnectionError::new("cannot write to process that exited with error")
                .with_cause(exit.clone())
                .into());
        }
        if !state.ready {
            return Err(CliConnectionError::new("transport is not ready for writing").into());
        }
        Ok(())
    }

    fn on_error(&self, error: SdkError) {
        if let Some(tx) = lock(&self.errors_tx).as_ref() {
            let _ = tx.try_send(error);
        }
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed_during_write() -> SdkError {
    CliConnectionError::new("transport closed during write").into()
}

fn validation_error(err: OptionsError) -> SdkError {
    match err {
        OptionsError::MissingCliPath(path) => {
            CliNotFoundError::new("Claude Code not found at", Some(path)).into()
        }
        other => CliConnectionError::new("invalid transport options")
            .with_cause(other)
            .into(),
    }
}

async fn send_frame(
    inner: &Inner,
    tx: &FrameSender,
    item: Result<InboundFrame, SdkError>,
) -> bool {
    tokio::select! {
        _ = inner.cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

async fn read_stdout(
    inner: Arc<Inner>,
    stdout: ChildStdout,
    child: Arc<Mutex<Child>>,
    tx: FrameSender,
) {
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
    let mut lines = FramedRead::with_capacity(stdout, codec, STDOUT_INITIAL_CAPACITY);
    let mut framer = JsonFramer::new(inner.max_buffer_size);

    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            next = lines.next() => next,
        };

        match next {
            None => break,
            Some(Ok(line)) => {
                for decoded in framer.push_line(&line[..]) {
                    let item = decoded.and_then(|value| message_parser::parse_frame(&value));
                    if !send_frame(&inner, &tx, item).await {
                        return;
                    }
                }
            }
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                framer.reset();
                let error = JsonDecodeError::new(format!(
                    "stdout line exceeded maximum length of {MAX_LINE_LENGTH} bytes"
                ));
                if !send_frame(&inner, &tx, Err(error.into())).await {
                    return;
                }
            }
            Some(Err(AnyDelimiterCodecError::Io(err))) => {
                let error = SdkError::from(
                    CliConnectionError::new("Failed to read CLI stdout").with_cause(err),
                );
                inner.on_error(error.clone());
                let _ = send_frame(&inner, &tx, Err(error)).await;
                break;
            }
        }
    }
    // Stdout is released before the wait; a child still writing would block on a full pipe.
    drop(lines);

    let status = {
        let mut child = child.lock().await;
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            status = child.wait() => status,
        }
    };

    let failure = {
        let mut state = inner.write_state();
        state.ready = false;
        let failure = match status {
            Ok(status) => {
                log::debug!("[transport::reader] CLI exited with {status}");
                state.exit_status = Some(status);
                if status.success() {
                    None
                } else {
                    let message = match status.code() {
                        Some(code) => format!("Claude Code process exited with code {code}"),
                        None => "Claude Code process terminated by a signal".to_string(),
                    };
                    Some(SdkError::from(ProcessError::new(message, status.code(), None)))
                }
            }
            Err(err) => Some(SdkError::from(
                CliConnectionError::new("Failed to wait for Claude Code process").with_cause(err),
            )),
        };
        if let Some(error) = failure.as_ref() {
            state.exit_error = Some(error.clone());
        }
        failure
    };

    if let Some(error) = failure {
        inner.on_error(error.clone());
        let _ = send_frame(&inner, &tx, Err(error)).await;
    }
}

async fn read_stderr(inner: Arc<Inner>, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).split(b'\n');
    loop {
        // Lines already in the pipe are delivered before cancellation is honoured.
        let next = tokio::select! {
            biased;
            next = lines.next_segment() => next,
            _ = inner.cancel.cancelled() => break,
        };

        match next {
            Ok(Some(raw)) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match inner.options.stderr.as_ref() {
                    Some(callback) => callback(line),
                    None => log::debug!("[transport::stderr] {line}"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("[transport::stderr] read failed: {err}");
                if let Some(callback) = inner.options.stderr.as_ref() {
                    callback(&format!("stderr read failed: {err}"));
                }
                break;
            }
        }
    }
}

async fn join_with_timeout(task: JoinHandle<()>, limit: Duration, name: &str) {
    let abort = task.abort_handle();
    if timeout(limit, task).await.is_err() {
        log::warn!("[transport::close] {name} reader did not finish in {limit:?}, aborting");
        abort.abort();
    }
}

async fn terminate_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => log::warn!("[transport::close] failed to poll CLI status: {err}"),
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        if kill(pid, Signal::SIGTERM).is_ok() {
            if let Ok(Ok(status)) = timeout(TERMINATE_TIMEOUT, child.wait()).await {
                log::debug!("[transport::close] CLI exited with {status} after SIGTERM");
                return;
            }
        }
    }

    log::warn!("[transport::close] forcing CLI shutdown");
    if let Err(err) = child.kill().await {
        log::warn!("[transport::close] failed to kill CLI: {err}");
    }
}

fn should_pipe_stderr(options: &ClaudeAgentOptions) -> bool {
    options.stderr.is_some() || options.extra_args.contains_key(DEBUG_TO_STDERR_FLAG)
}

struct CommandLine {
    args: Vec<String>,
    temp_files: Vec<TempPath>,
}

/// Assemble the CLI arguments for `options` in a fixed order.
pub fn build_args(
    prompt: &PromptMode,
    options: &ClaudeAgentOptions,
) -> Result<Vec<String>, SdkError> {
    let mut args: Vec<String> = vec![
        "--output-format".into(),
        "stream-json".into(),
        "--verbose".into(),
    ];
    let mut flag = |name: &str, value: Option<String>| {
        args.push(name.to_string());
        if let Some(value) = value {
            args.push(value);
        }
    };

    if !options.allowed_tools.is_empty() {
        flag("--allowedTools", Some(options.allowed_tools.join(",")));
    }
    if !options.disallowed_tools.is_empty() {
        flag("--disallowedTools", Some(options.disallowed_tools.join(",")));
    }

    match &options.system_prompt {
        None => {}
        Some(SystemPrompt::Text(text)) => flag("--system-prompt", Some(text.clone())),
        Some(SystemPrompt::Preset(preset)) => {
            if let Some(append) = &preset.append {
                flag("--append-system-prompt", Some(append.clone()));
            }
        }
    }

    if let Some(mode) = options.permission_mode {
        flag("--permission-mode", Some(mode.as_str().to_string()));
    }
    if options.continue_conversation {
        flag("--continue", None);
    }
    if let Some(resume) = &options.resume {
        flag("--resume", Some(resume.clone()));
    }
    if let Some(max_turns) = options.max_turns {
        flag("--max-turns", Some(max_turns.to_string()));
    }
    if let Some(model) = &options.model {
        flag("--model", Some(model.clone()));
    }
    if let Some(tool_name) = &options.permission_prompt_tool_name {
        flag("--permission-prompt-tool", Some(tool_name.clone()));
    }
    if let Some(settings) = &options.settings {
        flag("--settings", Some(settings.clone()));
    }
    for directory in &options.add_dirs {
        flag("--add-dir", Some(directory.display().to_string()));
    }
    for (key, value) in &options.extra_args {
        flag(&format!("--{key}"), value.clone());
    }

    if let Some(agents) = options.agents.as_ref().filter(|agents| !agents.is_empty()) {
        flag("--agents", Some(agents_json(agents)?));
    }
    if !options.mcp_servers.is_empty() {
        flag("--mcp-config", Some(mcp_config_argument(&options.mcp_servers)?));
    }
    if let Some(sources) = options.setting_sources.as_ref().filter(|s| !s.is_empty()) {
        let joined = sources
            .iter()
            .map(SettingSource::as_str)
            .collect::<Vec<_>>()
            .join(",");
        flag("--setting-sources", Some(joined));
    }

    if options.include_partial_messages {
        flag("--include-partial-messages", None);
    }
    if options.fork_session {
        flag("--fork-session", None);
    }
    if let Some(user) = &options.user {
        flag("--user", Some(user.clone()));
    }

    match prompt {
        PromptMode::Streaming => {
            args.push("--input-format".into());
            args.push("stream-json".into());
        }
        PromptMode::Text(text) => {
            args.push("--print".into());
            args.push("--".into());
            args.push(text.clone());
        }
    }

    Ok(args)
}

/// [`build_args`], moving `--agents` into a temp file when the command line
/// would exceed the platform limit.
fn command_line(
    prompt: &PromptMode,
    options: &ClaudeAgentOptions,
    cli_path: &Path,
) -> Result<CommandLine, SdkError> {
    let mut args = build_args(prompt, options)?;
    let mut temp_files = Vec::new();

    if command_length(cli_path.as_os_str(), &args) > CMD_LENGTH_LIMIT {
        if let Some(position) = args.iter().position(|arg| arg == "--agents") {
            if let Some(agents) = args.get_mut(position + 1) {
                let path = write_temp_arg(agents)?;
                log::debug!(
                    "[transport::connect] command line too long, agents moved to {}",
                    path.display()
                );
                *agents = format!("@{}", path.display());
                temp_files.push(path);
            }
        }
    }

    Ok(CommandLine { args, temp_files })
}

fn write_temp_arg(contents: &str) -> Result<TempPath, SdkError> {
    let to_error = |err: std::io::Error| {
        SdkError::from(
            CliConnectionError::new("Failed to write temp argument file").with_cause(err),
        )
    };
    let mut file = NamedTempFile::new().map_err(to_error)?;
    file.write_all(contents.as_bytes()).map_err(to_error)?;
    Ok(file.into_temp_path())
}

fn command_length(program: &OsStr, args: &[String]) -> usize {
    program.len() + args.iter().map(|arg| arg.len() + 1).sum::<usize>()
}

fn mcp_config_argument(servers: &McpServers) -> Result<String, SdkError> {
    match servers {
        McpServers::Inline(inline) => Ok(inline.clone()),
        McpServers::Path(path) => Ok(path.display().to_string()),
        McpServers::Map(map) => {
            let mut entries = Map::new();
            for (name, config) in map {
                let mut value = to_json(config)?;
                if let (McpServerConfig::Sdk(_), Value::Object(object)) = (config, &mut value) {
                    object.remove("instance");
                }
                entries.insert(name.clone(), value);
            }
            to_json_string(&json!({ "mcpServers": entries }))
        }
    }
}

fn agents_json(
    agents: &std::collections::BTreeMap<String, AgentDefinition>,
) -> Result<String, SdkError> {
    to_json_string(&to_json(agents)?)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, SdkError> {
    serde_json::to_value(value).map_err(|err| {
        MessageParseError::new("Failed to encode CLI argument", None)
            .with_cause(err)
            .into()
    })
}

fn to_json_string(value: &Value) -> Result<String, SdkError> {
    serde_json::to_string(value).map_err(|err| {
        MessageParseError::new("Failed to encode CLI argument", None)
            .with_cause(err)
            .into()
    })
}

/// Locate the `claude` binary on `PATH` or in the usual install locations.
pub fn find_cli() -> Option<PathBuf> {
    if let Ok(path) = which::which("claude") {
        return Some(path);
    }

    let home = dirs::home_dir();
    let mut locations: Vec<PathBuf> = Vec::new();
    if let Some(home) = home.as_ref() {
        locations.push(home.join(".npm-global/bin/claude"));
    }
    locations.push(PathBuf::from("/usr/local/bin/claude"));
    if let Some(home) = home.as_ref() {
        locations.push(home.join(".local/bin/claude"));
        locations.push(home.join("node_modules/.bin/claude"));
        locations.push(home.join(".yarn/bin/claude"));
        locations.push(home.join(".claude/local/claude"));
    }

    locations.into_iter().find(|path| path.is_file())
}

async fn check_version(cli_path: &Path) {
    let mut probe = Command::new(cli_path);
    probe.arg("-v").kill_on_drop(true);
    let output = match timeout(VERSION_CHECK_TIMEOUT, probe.output()).await {
        Ok(Ok(output)) => output,
        _ => return,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let Some(version) = extract_version(&stdout) else {
        return;
    };
    if compare_versions(version, MINIMUM_CLAUDE_CODE_VERSION).is_lt() {
        log::warn!(
            "[transport::connect] Claude Code version {version} is unsupported. \
             Minimum required version is {MINIMUM_CLAUDE_CODE_VERSION}."
        );
    }
}

/// First whitespace-separated token that looks like a dotted version.
pub fn extract_version(output: &str) -> Option<&str> {
    output.split_whitespace().find(|token| token.contains('.'))
}

/// Compare dotted versions component-wise; missing or non-numeric parts are 0.
pub fn compare_versions(left: &str, right: &str) -> std::cmp::Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version
            .split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (left, right) = (parse(left), parse(right));
    let len = left.len().max(right.len());
    (0..len)
        .map(|i| {
            let a = left.get(i).copied().unwrap_or(0);
            let b = right.get(i).copied().unwrap_or(0);
            a.cmp(&b)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}
