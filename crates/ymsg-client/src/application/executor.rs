//! Request executor: turns logical requests into packets on the wire.
//!
//! Every outbound packet of a session goes through one FIFO queue drained
//! by a single writer task, so packets are transmitted in exactly the order
//! they were submitted.  The writer stamps the current session id onto each
//! packet just before encoding.
//!
//! Three ways to send:
//!
//! - [`RequestExecutor::execute`] – fire and forget.  Failures are reported
//!   to the request's own [`Request::failure`] hook, never to the caller.
//! - [`RequestExecutor::submit`] – awaitable; resolves once the bytes are
//!   written (used by the login state machine).
//! - [`RequestExecutor::schedule`] – a recurring task with its own period.
//!   Returning [`RequestError::StopRescheduling`] from
//!   [`Request::build`] ends the task.
//!
//! The executor never retries.  A request that cares about delivery decides
//! in `failure` whether to submit itself again.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn, Instrument};
use uuid::Uuid;

use ymsg_core::{encode_packet, Packet, ProtocolError};

use crate::application::channel::BoxedWriter;

/// Shortest period [`RequestExecutor::schedule`] accepts; shorter ones are
/// raised to it.
pub const MIN_SCHEDULE_PERIOD: Duration = Duration::from_secs(1);

/// Why a transmission failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// No transport is attached (not logged in, or already torn down).
    #[error("not connected")]
    NotConnected,

    /// The packet could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] ProtocolError),

    /// Writing to the transport failed.
    #[error("transport write failed: {0}")]
    Write(String),

    /// The request could not build its packet.
    #[error("failed to build request: {0}")]
    Build(String),
}

/// Outcome of [`Request::build`] other than a packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Ends a scheduled task's recurring life.  Not a failure.
    #[error("scheduled request finished")]
    StopRescheduling,

    /// This attempt failed; reported to [`Request::failure`].
    #[error(transparent)]
    Failed(#[from] ExecuteError),
}

/// A logical outbound operation.
pub trait Request: Send + Sync {
    /// Builds the packet to transmit for this attempt.
    fn build(&self) -> Result<Packet, RequestError>;

    /// Called on the executor's path when an attempt fails.
    fn failure(&self, error: ExecuteError) {
        warn!(request = self.name(), "request failed: {error}");
    }

    /// Short label used in logs.
    fn name(&self) -> &'static str {
        "request"
    }
}

/// A request that always sends the same packet.
#[derive(Debug, Clone)]
pub struct PacketRequest {
    name: &'static str,
    packet: Packet,
}

impl PacketRequest {
    pub fn new(name: &'static str, packet: Packet) -> Self {
        Self { name, packet }
    }
}

impl Request for PacketRequest {
    fn build(&self) -> Result<Packet, RequestError> {
        Ok(self.packet.clone())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// ── Outbound queue ────────────────────────────────────────────────────────────

enum Reply {
    Ack(oneshot::Sender<Result<(), ExecuteError>>),
    Hook(Arc<dyn Request>),
}

struct Outbound {
    packet: Packet,
    reply: Reply,
}

impl Outbound {
    fn resolve(self, result: Result<(), ExecuteError>) {
        match self.reply {
            Reply::Ack(tx) => {
                // The submitter may have stopped waiting.
                let _ = tx.send(result);
            }
            Reply::Hook(request) => {
                if let Err(e) = result {
                    request.failure(e);
                }
            }
        }
    }
}

/// State shared between the executor handle and its scheduled tasks.
#[derive(Default)]
struct Shared {
    sender: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    session_id: Arc<AtomicU32>,
}

impl Shared {
    fn enqueue(&self, outbound: Outbound) {
        // Resolve outside the lock: a failure hook may enqueue again.
        let rejected = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(tx) => match tx.send(outbound) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(lost)) => lost,
                },
                None => outbound,
            }
        };
        rejected.resolve(Err(ExecuteError::NotConnected));
    }

    fn run(&self, request: &Arc<dyn Request>) -> Result<(), RequestError> {
        match request.build() {
            Ok(packet) => {
                self.enqueue(Outbound {
                    packet,
                    reply: Reply::Hook(Arc::clone(request)),
                });
                Ok(())
            }
            Err(RequestError::Failed(e)) => {
                request.failure(e);
                Ok(())
            }
            Err(stop) => Err(stop),
        }
    }
}

// ── Scheduled tasks ───────────────────────────────────────────────────────────

/// A recurring request owned by the executor.
#[derive(Debug)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: &'static str,
    pub period: Duration,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

/// Per-session outbound path: FIFO writer plus scheduler.
#[derive(Default)]
pub struct RequestExecutor {
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl RequestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands the executor a transport write half and starts the writer task.
    /// Any previously attached writer is detached first.
    pub fn attach(&self, writer: BoxedWriter) {
        self.detach();

        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Arc::clone(&self.shared.session_id);
        let handle = tokio::spawn(write_loop(writer, rx, session_id));

        *self.shared.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("writer attached");
    }

    /// Stops accepting packets.  Packets already queued are still written,
    /// then the writer task drops the write half.  Idempotent.
    pub fn detach(&self) {
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("writer detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Session id stamped on outbound packets.
    pub fn session_id(&self) -> u32 {
        self.shared.session_id.load(Ordering::Relaxed)
    }

    pub fn set_session_id(&self, id: u32) {
        self.shared.session_id.store(id, Ordering::Relaxed);
    }

    /// Builds and enqueues `request` once.  Never fails to the caller.
    pub fn execute<R: Request + 'static>(&self, request: R) {
        self.execute_shared(Arc::new(request));
    }

    /// [`execute`](Self::execute) for a request that is already shared.
    pub fn execute_shared(&self, request: Arc<dyn Request>) {
        if let Err(RequestError::StopRescheduling) = self.shared.run(&request) {
            trace!(request = request.name(), "one-shot request declined to run");
        }
    }

    /// Enqueues `packet` and waits until it has been written.
    ///
    /// # Errors
    ///
    /// [`ExecuteError::NotConnected`] when no writer is attached (or it goes
    /// away before writing), or the encode/write error.
    pub async fn submit(&self, packet: Packet) -> Result<(), ExecuteError> {
        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(Outbound {
            packet,
            reply: Reply::Ack(tx),
        });
        rx.await.unwrap_or(Err(ExecuteError::NotConnected))
    }

    /// Runs `request` every `period`, the first time one period from now.
    /// Periods below [`MIN_SCHEDULE_PERIOD`] are raised to it.
    ///
    /// Returns the task id, usable with [`cancel`](Self::cancel).
    pub fn schedule(&self, request: Arc<dyn Request>, period: Duration) -> Uuid {
        let id = Uuid::new_v4();
        let name = request.name();
        if period < MIN_SCHEDULE_PERIOD {
            warn!(
                request = name,
                ?period,
                "schedule period too short, using {MIN_SCHEDULE_PERIOD:?}"
            );
        }
        let period = period.max(MIN_SCHEDULE_PERIOD);
        let shared = Arc::clone(&self.shared);

        let span = tracing::debug_span!("scheduled", %id, request = name);
        let handle = tokio::spawn(
            async move {
                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    trace!("tick");
                    if let Err(RequestError::StopRescheduling) = shared.run(&request) {
                        debug!("scheduled request finished");
                        break;
                    }
                }
            }
            .instrument(span),
        );

        debug!(%id, request = name, ?period, "request scheduled");
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScheduledTask {
                id,
                name,
                period,
                handle,
            });
        id
    }

    /// Cancels one scheduled task.  Returns `false` if the id is unknown.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.iter().position(|t| t.id == id) {
            Some(idx) => {
                tasks.remove(idx).handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every scheduled task.  Idempotent; an aborted task never
    /// re-arms.
    pub fn cancel_all(&self) {
        let tasks: Vec<ScheduledTask> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.handle.abort();
        }
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "scheduled tasks cancelled");
        }
    }

    /// Periods of the scheduled tasks that are still alive.
    pub fn scheduled_periods(&self) -> Vec<Duration> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| !t.is_finished())
            .map(|t| t.period)
            .collect()
    }
}

impl Drop for RequestExecutor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn write_loop(
    mut writer: BoxedWriter,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    session_id: Arc<AtomicU32>,
) {
    while let Some(mut outbound) = rx.recv().await {
        outbound.packet.session_id = session_id.load(Ordering::Relaxed);
        let result = match encode_packet(&outbound.packet) {
            Ok(bytes) => write_frame(&mut writer, &bytes).await,
            Err(e) => Err(ExecuteError::Encode(e)),
        };
        match &result {
            Ok(()) => trace!(service = %outbound.packet.service, "frame sent"),
            Err(e) => warn!(service = %outbound.packet.service, "failed to send frame: {e}"),
        }
        outbound.resolve(result);
    }
    debug!("writer stopped");
}

async fn write_frame(writer: &mut BoxedWriter, bytes: &[u8]) -> Result<(), ExecuteError> {
    writer
        .write_all(bytes)
        .await
        .map_err(|e| ExecuteError::Write(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| ExecuteError::Write(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
