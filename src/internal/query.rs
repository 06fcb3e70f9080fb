//! Control router: splits control frames off the transport stream, correlates
//! responses with outbound requests and answers the CLI's inbound requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ClaudeAgentOptions;
use crate::control::{
    ControlOutcome, ControlRequest, ControlRequestBody, ControlResponse, HookCallbackRequest,
    InitializeRequest, McpMessageRequest, PermissionRequest, SetPermissionModeRequest,
    CONTROL_TYPE_REQUEST, SUBTYPE_CAN_USE_TOOL,
};
use crate::error::{
    CliConnectionError, ControlProtocolError, MessageParseError, PermissionDeniedError, SdkError,
};
use crate::hooks::{HookCallback, HookContext, HookEvent, HookInput, HookMatcher};
use crate::mcp::SdkMcpServer;
use crate::message::Message;
use crate::permission::{CanUseToolHandle, PermissionMode, PermissionUpdate, ToolPermissionContext};
use crate::transport::{InboundFrame, Transport};

pub const DEFAULT_CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MESSAGE_CHANNEL_CAPACITY: usize = 100;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

type ControlResult = Result<Map<String, Value>, SdkError>;
type HookCallbackHandle = Arc<dyn HookCallback>;
type McpServerHandle = Arc<dyn SdkMcpServer>;

struct PendingRequest {
    subtype: &'static str,
    responder: oneshot::Sender<ControlResult>,
}

/// Query orchestrates the communication with the Claude CLI transport.
pub struct Query<T: Transport + ?Sized> {
    inner: Arc<QueryInner<T>>,
}

impl<T: Transport + ?Sized> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct QueryInner<T: Transport + ?Sized> {
    transport: Arc<T>,
    is_streaming_mode: bool,
    can_use_tool: Option<CanUseToolHandle>,
    hooks: Mutex<Option<BTreeMap<HookEvent, Vec<HookMatcher>>>>,
    sdk_mcp_servers: HashMap<String, McpServerHandle>,
    pending_control: Mutex<HashMap<String, PendingRequest>>,
    hook_callbacks: Mutex<HashMap<String, HookCallbackHandle>>,
    message_tx: Mutex<Option<mpsc::Sender<Result<Message, SdkError>>>>,
    message_rx: Mutex<mpsc::Receiver<Result<Message, SdkError>>>,
    read_handle: Mutex<Option<JoinHandle<()>>>,
    next_callback_id: AtomicU64,
    request_counter: AtomicU64,
    request_nonce: String,
    control_timeout: Duration,
    initialization_result: Mutex<Option<Map<String, Value>>>,
    first_result: watch::Sender<bool>,
    has_hook_callbacks: AtomicBool,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl<T> Query<T>
where
    T: Transport + ?Sized + 'static,
{
    /// Create a new router around the provided transport and callbacks.
    pub fn new(
        transport: Arc<T>,
        is_streaming_mode: bool,
        can_use_tool: Option<CanUseToolHandle>,
        hooks: Option<BTreeMap<HookEvent, Vec<HookMatcher>>>,
        sdk_mcp_servers: HashMap<String, McpServerHandle>,
        control_timeout: Duration,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(QueryInner {
                transport,
                is_streaming_mode,
                can_use_tool,
                hooks: Mutex::new(hooks),
                sdk_mcp_servers,
                pending_control: Mutex::new(HashMap::new()),
                hook_callbacks: Mutex::new(HashMap::new()),
                message_tx: Mutex::new(Some(message_tx)),
                message_rx: Mutex::new(message_rx),
                read_handle: Mutex::new(None),
                next_callback_id: AtomicU64::new(0),
                request_counter: AtomicU64::new(0),
                request_nonce: instance_nonce(),
                control_timeout,
                initialization_result: Mutex::new(None),
                first_result: watch::channel(false).0,
                has_hook_callbacks: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Build a router taking callbacks, hooks, servers and the timeout from `options`.
    pub fn from_options(
        transport: Arc<T>,
        is_streaming_mode: bool,
        options: &ClaudeAgentOptions,
    ) -> Self {
        Self::new(
            transport,
            is_streaming_mode,
            options.can_use_tool.clone(),
            options.hooks.clone(),
            options.sdk_servers.clone(),
            options
                .control_request_timeout
                .unwrap_or(DEFAULT_CONTROL_REQUEST_TIMEOUT),
        )
    }

    pub fn is_streaming_mode(&self) -> bool {
        self.inner.is_streaming_mode
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Start the background reader if it has not already been started.
    pub async fn start(&self) -> Result<(), SdkError> {
        if self.is_closed() {
            return Err(CliConnectionError::new("query closed").into());
        }

        let mut handle_guard = self.inner.read_handle.lock().await;
        if handle_guard.is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            Query { inner }.read_loop().await;
        });
        *handle_guard = Some(handle);
        Ok(())
    }

    /// Initialize the control protocol and register hooks when in streaming mode.
    pub async fn initialize(&self) -> Result<Option<Map<String, Value>>, SdkError> {
        if !self.inner.is_streaming_mode {
            return Ok(None);
        }

        self.start().await?;
        let hooks = self.prepare_hooks_configuration().await;

        let response = self
            .send_control_request(ControlRequestBody::Initialize(InitializeRequest { hooks }))
            .await?;
        *self.inner.initialization_result.lock().await = Some(response.clone());
        Ok(Some(response))
    }

    /// Stream input messages to the transport, closing stdin once anything was written.
    pub async fn stream_input<S>(&self, mut input: S) -> Result<(), SdkError>
    where
        S: Stream<Item = Value> + Unpin + Send,
    {
        let mut wrote_any = false;
        while let Some(message) = input.next().await {
            if self.is_closed() {
                log::debug!("[query::stream_input] query closed, dropping remaining prompt input");
                break;
            }
            self.inner.transport.write_value(&message).await?;
            wrote_any = true;
        }
        if wrote_any {
            if self.answers_control_requests() {
                self.wait_for_first_result().await;
            }
            self.inner.transport.end_input().await?;
        }
        Ok(())
    }

    /// Whether the CLI may send requests that need stdin to stay open.
    fn answers_control_requests(&self) -> bool {
        self.inner.can_use_tool.is_some()
            || !self.inner.sdk_mcp_servers.is_empty()
            || self.inner.has_hook_callbacks.load(Ordering::SeqCst)
    }

    async fn wait_for_first_result(&self) {
        let mut seen = self.inner.first_result.subscribe();
        tokio::select! {
            _ = self.inner.cancel.cancelled() => {}
            waited = timeout(self.inner.control_timeout, async move {
                seen.wait_for(|seen| *seen).await.map(|_| ())
            }) => {
                if waited.is_err() {
                    log::debug!("[query::stream_input] no result before closing stdin");
                }
            }
        }
    }

    /// Write one user-level message to the CLI.
    pub async fn write_value(&self, message: &Value) -> Result<(), SdkError> {
        if self.is_closed() {
            return Err(CliConnectionError::new("query closed").into());
        }
        self.inner.transport.write_value(message).await
    }

    /// Retrieve the next SDK message; `None` once the stream has ended.
    pub async fn next_message(&self) -> Result<Option<Message>, SdkError> {
        let mut receiver = self.inner.message_rx.lock().await;
        match receiver.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    pub async fn interrupt(&self) -> Result<(), SdkError> {
        self.send_control_request(ControlRequestBody::Interrupt)
            .await
            .map(|_| ())
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<(), SdkError> {
        self.send_control_request(ControlRequestBody::SetPermissionMode(
            SetPermissionModeRequest { mode },
        ))
        .await
        .map(|_| ())
    }

    /// Close the router and the underlying transport, failing pending requests.
    pub async fn close(&self) -> Result<(), SdkError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.cancel.cancel();
        let handle = self.inner.read_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.fail_pending("query closed").await;
        self.inner.message_tx.lock().await.take();

        self.inner.transport.close().await
    }

    /// Payload of the `initialize` response, once initialization has completed.
    pub async fn initialization_result(&self) -> Option<Map<String, Value>> {
        self.inner.initialization_result.lock().await.clone()
    }

    /// Send a control request and wait for the response carrying its id.
    ///
    /// An error response to `can_use_tool` resolves as
    /// [`SdkError::PermissionDenied`], any other as [`SdkError::ControlProtocol`].
    pub async fn send_control_request(
        &self,
        body: ControlRequestBody,
    ) -> Result<Map<String, Value>, SdkError> {
        if self.is_closed() {
            return Err(CliConnectionError::new("query closed").into());
        }
        if !self.inner.is_streaming_mode {
            return Err(ControlProtocolError::new("control requests require streaming mode").into());
        }

        self.start().await?;

        let counter = self.inner.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let request_id = format!("req_{counter}_{}", self.inner.request_nonce);
        let request = ControlRequest::new(request_id, body);
        let subtype = request.subtype();
        log::debug!(
            "[query::send_control_request] sending {subtype} as {}",
            request.request_id
        );
        let envelope = request.to_value()?;

        let (sender, receiver) = oneshot::channel();
        self.inner.pending_control.lock().await.insert(
            request.request_id.clone(),
            PendingRequest {
                subtype,
                responder: sender,
            },
        );

        if let Err(err) = self.inner.transport.write_value(&envelope).await {
            self.inner.pending_control.lock().await.remove(&request.request_id);
            return Err(err);
        }

        match timeout(self.inner.control_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CliConnectionError::new("control response channel closed").into()),
            Err(elapsed) => {
                self.inner.pending_control.lock().await.remove(&request.request_id);
                Err(ControlProtocolError::new(format!(
                    "{subtype} control request {} timed out",
                    request.request_id
                ))
                .with_cause(elapsed)
                .into())
            }
        }
    }

    async fn read_loop(self) {
        let mut frames = self.inner.transport.read_messages();
        loop {
            let next = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => self.route_frame(frame).await,
                Some(Err(err)) => self.route_error(err).await,
                None => break,
            }
        }

        self.fail_pending("transport closed before the control response arrived")
            .await;
        self.inner.message_tx.lock().await.take();
    }

    async fn route_frame(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Message(message) => {
                if matches!(message, Message::Result(_)) {
                    self.inner.first_result.send_replace(true);
                }
                self.enqueue_message(Ok(message)).await
            }
            InboundFrame::ControlResponse(response) => {
                log::debug!(
                    "[query::route] control response for {}",
                    response.request_id
                );
                self.resolve_response(response).await
            }
            InboundFrame::ControlRequest(request) => {
                log::debug!(
                    "[query::route] inbound {} request {}",
                    request.subtype(),
                    request.request_id
                );
                self.spawn_control_request(request)
            }
            InboundFrame::ControlCancel { request_id } => {
                log::debug!("[query::route] ignoring control cancel request for {request_id}");
            }
        }
    }

    /// Decode failures are surfaced; a request that still carries an id is answered.
    async fn route_error(&self, err: SdkError) {
        if let SdkError::MessageParse(parse_err) = &err {
            if let Some(request_id) = parse_err.data().and_then(undecodable_request_id) {
                let response = ControlResponse::error(request_id, parse_err.message());
                self.send_response(response).await;
            }
        }
        self.enqueue_message(Err(err)).await;
    }

    async fn resolve_response(&self, response: ControlResponse) {
        let pending = self
            .inner
            .pending_control
            .lock()
            .await
            .remove(&response.request_id);

        let Some(pending) = pending else {
            log::warn!(
                "[query::route] stale control response for {}",
                response.request_id
            );
            let err = ControlProtocolError::new(format!(
                "no pending control request with id {}",
                response.request_id
            ));
            self.enqueue_message(Err(err.into())).await;
            return;
        };

        let result = match response.outcome {
            ControlOutcome::Success(payload) => Ok(payload),
            ControlOutcome::Error(message) if pending.subtype == SUBTYPE_CAN_USE_TOOL => {
                Err(PermissionDeniedError::new(message).into())
            }
            ControlOutcome::Error(message) => Err(ControlProtocolError::new(message).into()),
        };
        let _ = pending.responder.send(result);
    }

    fn spawn_control_request(&self, request: ControlRequest) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            Query { inner }.process_control_request(request).await;
        });
    }

    async fn process_control_request(&self, request: ControlRequest) {
        let request_id = request.request_id;
        let response = match self.dispatch_control_request(request.body).await {
            Ok(payload) => ControlResponse::success(request_id, payload),
            Err(err) => ControlResponse::error(request_id, err.to_string()),
        };
        self.send_response(response).await;
    }

    async fn dispatch_control_request(&self, body: ControlRequestBody) -> ControlResult {
        match body {
            ControlRequestBody::CanUseTool(request) => {
                self.handle_permission_request(request).await
            }
            ControlRequestBody::HookCallback(request) => self.handle_hook_callback(request).await,
            ControlRequestBody::McpMessage(request) => self.handle_mcp_message(request).await,
            other => Err(ControlProtocolError::new(format!(
                "unsupported control request subtype: {}",
                other.subtype()
            ))
            .into()),
        }
    }

    async fn handle_permission_request(&self, request: PermissionRequest) -> ControlResult {
        let callback = self
            .inner
            .can_use_tool
            .as_ref()
            .ok_or_else(|| ControlProtocolError::new("canUseTool callback is not provided"))?;

        let suggestions = request
            .permission_suggestions
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<PermissionUpdate>(entry).ok())
            .collect();

        let context = ToolPermissionContext {
            signal: None,
            suggestions,
            blocked_path: request.blocked_path,
        };

        let result = callback
            .call(&request.tool_name, request.input.clone(), context)
            .await;
        Ok(result.to_control_payload(&request.input))
    }

    async fn handle_hook_callback(&self, request: HookCallbackRequest) -> ControlResult {
        let callback = self
            .inner
            .hook_callbacks
            .lock()
            .await
            .get(&request.callback_id)
            .cloned()
            .ok_or_else(|| {
                ControlProtocolError::new(format!(
                    "No hook callback found for ID: {}",
                    request.callback_id
                ))
            })?;

        let input: HookInput = serde_json::from_value(request.input.clone()).map_err(|err| {
            MessageParseError::new("Invalid hook callback input", Some(request.input))
                .with_cause(err)
        })?;

        let output = callback
            .call(input, request.tool_use_id, HookContext::default())
            .await;

        match serde_json::to_value(output) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => {
                Err(MessageParseError::new("Hook output must be a JSON object", Some(other)).into())
            }
            Err(err) => Err(MessageParseError::new("Failed to encode hook output", None)
                .with_cause(err)
                .into()),
        }
    }

    async fn handle_mcp_message(&self, request: McpMessageRequest) -> ControlResult {
        let server = self
            .inner
            .sdk_mcp_servers
            .get(&request.server_name)
            .cloned()
            .ok_or_else(|| {
                ControlProtocolError::new(format!("Server '{}' not found", request.server_name))
            })?;

        let reply = server.handle_message(request.message).await?;
        let mut payload = Map::new();
        payload.insert("mcp_response".into(), reply);
        Ok(payload)
    }

    async fn send_response(&self, response: ControlResponse) {
        if let Err(err) = self.inner.transport.write_value(&response.to_value()).await {
            log::warn!(
                "[query::send_response] failed to answer control request {}: {err}",
                response.request_id
            );
        }
    }

    async fn enqueue_message(&self, payload: Result<Message, SdkError>) {
        let sender = self.inner.message_tx.lock().await.as_ref().cloned();
        let Some(sender) = sender else {
            return;
        };

        tokio::select! {
            _ = self.inner.cancel.cancelled() => {}
            sent = sender.send(payload) => {
                if sent.is_err() {
                    log::debug!("[query::enqueue] message receiver dropped, discarding message");
                }
            }
        }
    }

    async fn fail_pending(&self, reason: &str) {
        let mut pending = self.inner.pending_control.lock().await;
        for (_, request) in pending.drain() {
            let _ = request
                .responder
                .send(Err(CliConnectionError::new(reason).into()));
        }
    }

    async fn prepare_hooks_configuration(&self) -> Option<Value> {
        let hook_map = self.inner.hooks.lock().await.take()?;

        let mut callbacks = self.inner.hook_callbacks.lock().await;
        let mut config = Map::new();

        for (event, matchers) in hook_map {
            let mut matcher_entries = Vec::new();
            for matcher in matchers {
                if matcher.hooks.is_empty() {
                    continue;
                }

                let mut callback_ids = Vec::with_capacity(matcher.hooks.len());
                for hook in matcher.hooks {
                    let id = format!(
                        "hook_{}",
                        self.inner.next_callback_id.fetch_add(1, Ordering::SeqCst)
                    );
                    callbacks.insert(id.clone(), hook);
                    self.inner.has_hook_callbacks.store(true, Ordering::SeqCst);
                    callback_ids.push(Value::String(id));
                }

                let mut entry = Map::new();
                entry.insert(
                    "matcher".into(),
                    matcher.matcher.map(Value::String).unwrap_or(Value::Null),
                );
                entry.insert("hookCallbackIds".into(), Value::Array(callback_ids));
                matcher_entries.push(Value::Object(entry));
            }

            if !matcher_entries.is_empty() {
                config.insert(event.as_str().to_string(), Value::Array(matcher_entries));
            }
        }

        if config.is_empty() {
            None
        } else {
            Some(Value::Object(config))
        }
    }
}

/// `request_id` of an inbound control request that failed to decode.
fn undecodable_request_id(envelope: &Value) -> Option<String> {
    if envelope.get("type").and_then(Value::as_str) != Some(CONTROL_TYPE_REQUEST) {
        return None;
    }
    envelope
        .get("request_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn instance_nonce() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();
    let pid = std::process::id() as u128;
    let instance = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{instance:x}", timestamp ^ pid)
}
