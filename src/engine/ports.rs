// Ports and wire groups - the channel plumbing between gadgets

//! # Ports
//!
//! A **wire group** owns exactly one bounded tokio channel plus a fan-in counter:
//! the number of output ports still attached to it. Every attached output must
//! call `close()` once; the channel is closed when the last one does, and only
//! then does the consumer see end-of-stream.
//!
//! Gadgets never touch channels directly. They get:
//! - [`InputPort`]: receive side. Bound to a wire group, or to *null*, which
//!   yields end-of-stream on the first receive.
//! - [`OutputPort`]: send side. Bound to a wire group, or to the circuit's
//!   discard sink, which reports every message it swallows.
//!
//! Both are cheap `Arc` handles. The circuit keeps a clone of every port it hands
//! out so that an online `connect` can re-target a port that is currently bound
//! to a fallback (null or sink), even while its gadget is running.
//!
//! ## Rust Learning Notes:
//!
//! ### Two Kinds of Mutex
//! Short, synchronous critical sections use `std::sync::Mutex` and are never held
//! across an `.await`. The receiver lives in a `tokio::sync::Mutex` because a
//! receive *does* wait while holding it; several consumers of one group simply
//! take turns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::discard::DiscardSink;
use super::lock;
use crate::{FlowError, Message, Result};

struct GroupState {
    fan_in: usize,
    sender: Option<mpsc::Sender<Message>>,
}

/// One concrete channel shared by every pin that resolved into it
pub struct WireGroup {
    name: String,
    capacity: AtomicUsize,
    state: Mutex<GroupState>,
    /// Feed data queued ahead of the channel, received first
    preloaded: Mutex<VecDeque<Message>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Message>>,
}

impl WireGroup {
    /// Allocate the channel; capacity 0 gets the smallest buffer tokio allows
    pub fn new<S: Into<String>>(name: S, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(Self {
            name: name.into(),
            capacity: AtomicUsize::new(capacity),
            state: Mutex::new(GroupState {
                fan_in: 0,
                sender: Some(tx),
            }),
            preloaded: Mutex::new(VecDeque::new()),
            receiver: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer size: the channel bound, or the preloaded feed count if larger
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Number of producers still attached
    pub fn fan_in(&self) -> usize {
        lock(&self.state).fan_in
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).sender.is_none()
    }

    pub(crate) fn attach(&self) {
        let mut state = lock(&self.state);
        state.fan_in += 1;
        tracing::trace!(group = %self.name, fan_in = state.fan_in, "producer attached");
    }

    /// Drop one producer; the last one out closes the channel
    pub(crate) fn detach(&self) {
        let mut state = lock(&self.state);
        state.fan_in = state.fan_in.saturating_sub(1);
        tracing::trace!(group = %self.name, fan_in = state.fan_in, "producer detached");
        if state.fan_in == 0 && state.sender.take().is_some() {
            tracing::debug!(group = %self.name, "wire closed");
        }
    }

    /// Close a group that ended up with no producers at all (feed-only inputs)
    pub(crate) fn close_if_idle(&self) -> bool {
        let mut state = lock(&self.state);
        if state.fan_in == 0 && state.sender.take().is_some() {
            tracing::debug!(group = %self.name, "wire closed, no producers");
            return true;
        }
        false
    }

    /// Enqueue pre-loaded data without blocking
    pub(crate) fn try_feed(&self, message: Message) -> Result<()> {
        let sender = lock(&self.state)
            .sender
            .clone()
            .ok_or_else(|| FlowError::Disconnected(self.name.clone()))?;
        sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => FlowError::FeedOverflow {
                pin: self.name.clone(),
            },
            TrySendError::Closed(_) => FlowError::Disconnected(self.name.clone()),
        })
    }

    /// Queue feed data ahead of anything producers send; never blocks
    pub(crate) fn preload(&self, messages: Vec<Message>) {
        let mut queue = lock(&self.preloaded);
        queue.extend(messages);
        self.capacity.fetch_max(queue.len(), Ordering::Relaxed);
    }

    /// Take every message not received yet; `None` while a consumer is mid-receive
    pub(crate) fn take_buffered(&self) -> Option<Vec<Message>> {
        let mut receiver = self.receiver.try_lock().ok()?;
        let mut taken: Vec<Message> = lock(&self.preloaded).drain(..).collect();
        while let Ok(message) = receiver.try_recv() {
            taken.push(message);
        }
        Some(taken)
    }

    async fn send(&self, message: Message) -> Result<()> {
        let sender = lock(&self.state)
            .sender
            .clone()
            .ok_or_else(|| FlowError::Disconnected(self.name.clone()))?;
        sender
            .send(message)
            .await
            .map_err(|_| FlowError::Disconnected(self.name.clone()))
    }

    async fn recv(&self) -> Option<Message> {
        let mut receiver = self.receiver.lock().await;
        let preloaded = lock(&self.preloaded).pop_front();
        if preloaded.is_some() {
            return preloaded;
        }
        receiver.recv().await
    }
}

impl std::fmt::Debug for WireGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGroup")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("fan_in", &self.fan_in())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Clone)]
enum InputTarget {
    Null,
    Wire(Arc<WireGroup>),
}

struct InputSlot {
    pin: String,
    target: Mutex<InputTarget>,
}

/// Receive end handed to a gadget
#[derive(Clone)]
pub struct InputPort {
    slot: Arc<InputSlot>,
}

impl InputPort {
    /// A port that is at end-of-stream from the start
    pub fn null<S: Into<String>>(pin: S) -> Self {
        Self {
            slot: Arc::new(InputSlot {
                pin: pin.into(),
                target: Mutex::new(InputTarget::Null),
            }),
        }
    }

    pub(crate) fn wired<S: Into<String>>(pin: S, group: Arc<WireGroup>) -> Self {
        Self {
            slot: Arc::new(InputSlot {
                pin: pin.into(),
                target: Mutex::new(InputTarget::Wire(group)),
            }),
        }
    }

    pub fn pin(&self) -> &str {
        &self.slot.pin
    }

    /// Next message, or `None` once every producer has closed
    pub async fn recv(&self) -> Option<Message> {
        let target = lock(&self.slot.target).clone();
        match target {
            InputTarget::Null => None,
            InputTarget::Wire(group) => group.recv().await,
        }
    }

    /// The port as a stream of messages
    pub fn stream(&self) -> impl Stream<Item = Message> + Send + 'static {
        futures::stream::unfold(self.clone(), |port| async move {
            let next = port.recv().await;
            next.map(|m| (m, port))
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(*lock(&self.slot.target), InputTarget::Null)
    }

    pub(crate) fn group(&self) -> Option<Arc<WireGroup>> {
        match &*lock(&self.slot.target) {
            InputTarget::Null => None,
            InputTarget::Wire(group) => Some(group.clone()),
        }
    }

    /// Point the port at a wire group
    ///
    /// Allowed when the port is null or its current group is already closed;
    /// re-binding to the same group is a no-op. Returns whether anything changed.
    pub(crate) fn bind(&self, group: Arc<WireGroup>) -> Result<bool> {
        let mut target = lock(&self.slot.target);
        if let InputTarget::Wire(current) = &*target {
            if Arc::ptr_eq(current, &group) {
                return Ok(false);
            }
            if !current.is_closed() {
                return Err(FlowError::LiveRewire {
                    from: group.name().to_string(),
                    to: self.slot.pin.clone(),
                });
            }
        }
        *target = InputTarget::Wire(group);
        Ok(true)
    }
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPort")
            .field("pin", &self.slot.pin)
            .field("null", &self.is_null())
            .finish()
    }
}

enum OutputTarget {
    Sink(DiscardSink),
    Wire(Arc<WireGroup>),
}

struct OutputState {
    target: OutputTarget,
    closed: bool,
}

struct OutputSlot {
    pin: String,
    state: Mutex<OutputState>,
}

enum SendRoute {
    Sink(DiscardSink),
    Wire(Arc<WireGroup>),
}

/// Reference-counted send end handed to a gadget
#[derive(Clone)]
pub struct OutputPort {
    slot: Arc<OutputSlot>,
}

impl OutputPort {
    pub(crate) fn sink<S: Into<String>>(pin: S, sink: DiscardSink) -> Self {
        Self::with_target(pin, OutputTarget::Sink(sink))
    }

    /// Attach to a group; counts as one producer of it
    pub(crate) fn wired<S: Into<String>>(pin: S, group: Arc<WireGroup>) -> Self {
        group.attach();
        Self::with_target(pin, OutputTarget::Wire(group))
    }

    fn with_target<S: Into<String>>(pin: S, target: OutputTarget) -> Self {
        Self {
            slot: Arc::new(OutputSlot {
                pin: pin.into(),
                state: Mutex::new(OutputState {
                    target,
                    closed: false,
                }),
            }),
        }
    }

    pub fn pin(&self) -> &str {
        &self.slot.pin
    }

    /// Enqueue a message, waiting while the wire is full
    ///
    /// Messages sent to an unconnected output go to the discard sink and are
    /// reported there. Sending after `close()` is a defect and fails.
    pub async fn send<M: Into<Message>>(&self, message: M) -> Result<()> {
        let route = {
            let state = lock(&self.slot.state);
            if state.closed {
                return Err(FlowError::SendAfterClose(self.slot.pin.clone()));
            }
            match &state.target {
                OutputTarget::Sink(sink) => SendRoute::Sink(sink.clone()),
                OutputTarget::Wire(group) => SendRoute::Wire(group.clone()),
            }
        };

        match route {
            SendRoute::Sink(sink) => {
                sink.discard(&self.slot.pin, message.into());
                Ok(())
            }
            SendRoute::Wire(group) => group.send(message.into()).await,
        }
    }

    /// Detach this producer; idempotent per port
    pub fn close(&self) {
        let mut state = lock(&self.slot.state);
        if state.closed {
            return;
        }
        state.closed = true;
        if let OutputTarget::Wire(group) = &state.target {
            group.detach();
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slot.state).closed
    }

    pub fn is_sink(&self) -> bool {
        matches!(lock(&self.slot.state).target, OutputTarget::Sink(_))
    }

    pub(crate) fn group(&self) -> Option<Arc<WireGroup>> {
        let state = lock(&self.slot.state);
        match &state.target {
            OutputTarget::Wire(group) if !state.closed => Some(group.clone()),
            _ => None,
        }
    }

    /// Point the port at a wire group
    ///
    /// Allowed while the port feeds the discard sink or after it was closed;
    /// the port is (re)opened and counted as a producer of `group`. Re-binding
    /// to the same open group is a no-op. Returns whether anything changed.
    pub(crate) fn bind(&self, group: Arc<WireGroup>) -> Result<bool> {
        let mut state = lock(&self.slot.state);
        if let OutputTarget::Wire(current) = &state.target {
            if !state.closed {
                if Arc::ptr_eq(current, &group) {
                    return Ok(false);
                }
                return Err(FlowError::LiveRewire {
                    from: self.slot.pin.clone(),
                    to: group.name().to_string(),
                });
            }
        }
        group.attach();
        state.target = OutputTarget::Wire(group);
        state.closed = false;
        Ok(true)
    }
}

impl std::fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPort")
            .field("pin", &self.slot.pin)
            .field("sink", &self.is_sink())
            .field("closed", &self.is_closed())
            .finish()
    }
}
