use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::Notify;

use claude_agent_sdk::control::ControlResponse;
use claude_agent_sdk::error::SdkError;
use claude_agent_sdk::internal::message_parser::parse_frame;
use claude_agent_sdk::transport::{FrameStream, InboundFrame, Transport};

type QueuedFrame = Option<Result<InboundFrame, SdkError>>;

#[derive(Default)]
struct FrameQueue {
    // `None` marks end of stream.
    frames: Mutex<VecDeque<QueuedFrame>>,
    notify: Notify,
}

impl FrameQueue {
    fn push_back(&self, frame: QueuedFrame) {
        self.frames.lock().expect("frame queue poisoned").push_back(frame);
        self.notify.notify_one();
    }

    fn push_front(&self, frame: QueuedFrame) {
        self.frames.lock().expect("frame queue poisoned").push_front(frame);
        self.notify.notify_one();
    }

    async fn pop(&self) -> QueuedFrame {
        loop {
            let notified = self.notify.notified();
            let next = self.frames.lock().expect("frame queue poisoned").pop_front();
            if let Some(next) = next {
                return next;
            }
            notified.await;
        }
    }
}

/// Scriptable in-memory transport: queued inbound frames, recorded writes and
/// optional automatic answers to outbound control requests.
pub struct MockTransport {
    queue: Arc<FrameQueue>,
    writes: Mutex<Vec<Value>>,
    auto_respond: Option<Map<String, Value>>,
    taken: AtomicBool,
    ready: AtomicBool,
    connect_calls: AtomicUsize,
    end_input_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Transport that answers every outbound control request with `payload`.
    pub fn auto_responding(payload: Value) -> Arc<Self> {
        Arc::new(Self::build(Some(
            payload.as_object().cloned().unwrap_or_default(),
        )))
    }

    fn build(auto_respond: Option<Map<String, Value>>) -> Self {
        Self {
            queue: Arc::new(FrameQueue::default()),
            writes: Mutex::new(Vec::new()),
            auto_respond,
            taken: AtomicBool::new(false),
            ready: AtomicBool::new(true),
            connect_calls: AtomicUsize::new(0),
            end_input_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Queue raw JSON objects, decoded the way the CLI transport decodes them.
    pub fn push_json<I>(&self, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        for value in values {
            self.queue.push_back(Some(parse_frame(&value)));
        }
    }

    pub fn push_error(&self, error: SdkError) {
        self.queue.push_back(Some(Err(error)));
    }

    /// End the inbound stream after everything queued so far.
    pub fn finish(&self) {
        self.queue.push_back(None);
    }

    pub fn writes(&self) -> Vec<Value> {
        self.writes.lock().expect("writes poisoned").clone()
    }

    /// Wait until a written object satisfies `predicate`.
    pub async fn wait_for_write<F>(&self, predicate: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(found) = self.writes().into_iter().find(|value| predicate(value)) {
                return found;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for write; got {:?}",
                self.writes()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn end_input_calls(&self) -> usize {
        self.end_input_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

/// Predicate matching an outbound control request of the given subtype.
#[allow(dead_code)]
pub fn is_control_request(subtype: &'static str) -> impl Fn(&Value) -> bool {
    move |value| {
        value["type"] == "control_request" && value["request"]["subtype"] == subtype
    }
}

/// Predicate matching the control response answering `request_id`.
#[allow(dead_code)]
pub fn is_response_to(request_id: &'static str) -> impl Fn(&Value) -> bool {
    move |value| {
        value["type"] == "control_response" && value["response"]["request_id"] == request_id
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), SdkError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, line: &str) -> Result<(), SdkError> {
        let value: Value = serde_json::from_str(line).expect("writes must be JSON lines");
        self.writes.lock().expect("writes poisoned").push(value.clone());

        if let Some(payload) = self.auto_respond.clone() {
            if value["type"] == "control_request" {
                let request_id = value["request_id"].as_str().unwrap_or_default();
                let response = ControlResponse::success(request_id, payload);
                self.queue
                    .push_front(Some(Ok(InboundFrame::ControlResponse(response))));
            }
        }
        Ok(())
    }

    fn read_messages(&self) -> FrameStream {
        if self.taken.swap(true, Ordering::SeqCst) {
            return stream::empty().boxed();
        }
        let queue = Arc::clone(&self.queue);
        stream::unfold(queue, |queue| async move {
            let frame = queue.pop().await?;
            Some((frame, queue))
        })
        .boxed()
    }

    async fn end_input(&self) -> Result<(), SdkError> {
        self.end_input_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SdkError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
