//! Long-lived channel to the pathfinding worker
//!
//! The simulation side talks to a background worker through paired byte
//! channels. Every request and response crosses the boundary bincode
//! serialized, so the two sides never share memory; a correlation id
//! pairs each response with the request that caused it. The router task
//! owns the table of outstanding requests and settles every entry
//! exactly once: with the worker's answer, with a timeout, or with a
//! channel-closed error at teardown.

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::astar::{self, TileGrid};
use shared::{Cell, DEFAULT_PATH_TIMEOUT_MS};

/// Failures surfaced by the pathfinding subsystem. Kept distinct from an
/// ordinary no-route answer, which is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("worker channel is not initialized")]
    NotInitialized,
    #[error("worker channel closed")]
    ChannelClosed,
    #[error("path request timed out")]
    Timeout,
    #[error("worker reported an error: {0}")]
    Worker(String),
    #[error("no completed path to reconstruct in state {0}")]
    NotCompleted(&'static str),
}

/// A settled request: either an ordered cell path or a definitive
/// no-route answer.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOutcome {
    Found(Vec<Cell>),
    NotFound,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum WorkerRequest {
    Init {
        grid: TileGrid,
    },
    FindPath {
        request_id: u64,
        current_tick: u64,
        tick_budget: u32,
        start: Cell,
        end: Cell,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum WorkerResponse {
    Initialized,
    PathFound { request_id: u64, path: Vec<Cell> },
    PathNotFound { request_id: u64 },
    Error { request_id: u64, reason: String },
}

/// Tuning for the worker channel.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a submitted request may stay unanswered before the
    /// router settles it with a timeout error.
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            request_timeout: Duration::from_millis(DEFAULT_PATH_TIMEOUT_MS),
        }
    }
}

enum RouterCommand {
    Init {
        grid: TileGrid,
        reply: oneshot::Sender<Result<(), PathError>>,
    },
    Submit {
        id: u64,
        current_tick: u64,
        tick_budget: u32,
        start: Cell,
        end: Cell,
        reply: oneshot::Sender<Result<PathOutcome, PathError>>,
    },
    Shutdown,
}

struct PendingEntry {
    reply: oneshot::Sender<Result<PathOutcome, PathError>>,
    deadline: Instant,
}

/// Handle for one outstanding path request.
#[derive(Debug)]
pub struct PendingPath {
    id: u64,
    rx: Option<oneshot::Receiver<Result<PathOutcome, PathError>>>,
}

impl PendingPath {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking poll. Returns Some exactly once, after which the
    /// handle is spent.
    pub fn try_take(&mut self) -> Option<Result<PathOutcome, PathError>> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(outcome) => {
                self.rx = None;
                Some(outcome)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                Some(Err(PathError::ChannelClosed))
            }
        }
    }

    /// Suspends the caller until the request settles.
    pub async fn wait(mut self) -> Result<PathOutcome, PathError> {
        match self.rx.take() {
            Some(rx) => rx.await.unwrap_or(Err(PathError::ChannelClosed)),
            None => Err(PathError::ChannelClosed),
        }
    }
}

/// Cheaply cloneable handle to the worker channel. Clones share one
/// router and one worker, so concurrent queries multiplex over the same
/// channel and are paired back by correlation id.
#[derive(Debug, Clone)]
pub struct PathWorker {
    shared: Arc<WorkerShared>,
}

#[derive(Debug)]
struct WorkerShared {
    cmd_tx: mpsc::UnboundedSender<RouterCommand>,
    initialized: AtomicBool,
    next_id: AtomicU64,
}

impl PathWorker {
    /// Spawns the background worker and its router with default tuning.
    pub fn spawn() -> Self {
        Self::spawn_with_config(WorkerConfig::default())
    }

    pub fn spawn_with_config(config: WorkerConfig) -> Self {
        let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel();
        let (from_worker_tx, from_worker_rx) = mpsc::unbounded_channel();
        tokio::spawn(worker_loop(to_worker_rx, from_worker_tx));
        Self::with_channel(to_worker_tx, from_worker_rx, config)
    }

    /// Wires a handle to an already running worker, or to a test double
    /// standing in for one.
    pub fn with_channel(
        to_worker: mpsc::UnboundedSender<Vec<u8>>,
        from_worker: mpsc::UnboundedReceiver<Vec<u8>>,
        config: WorkerConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(route_responses(cmd_rx, to_worker, from_worker, config));

        PathWorker {
            shared: Arc::new(WorkerShared {
                cmd_tx,
                initialized: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Relaxed)
    }

    /// Ships the grid to the worker and waits for its acknowledgement.
    /// Nothing can be submitted until this completes.
    pub async fn initialize(&self, grid: TileGrid) -> Result<(), PathError> {
        let (reply, rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(RouterCommand::Init { grid, reply })
            .map_err(|_| PathError::ChannelClosed)?;

        rx.await.unwrap_or(Err(PathError::ChannelClosed))?;
        self.shared.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Submits a path request. Fails fast when the handshake has not
    /// completed; a request is never silently queued.
    pub fn submit(
        &self,
        current_tick: u64,
        tick_budget: u32,
        start: Cell,
        end: Cell,
    ) -> Result<PendingPath, PathError> {
        if !self.is_initialized() {
            return Err(PathError::NotInitialized);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(RouterCommand::Submit {
                id,
                current_tick,
                tick_budget,
                start,
                end,
                reply,
            })
            .map_err(|_| PathError::ChannelClosed)?;

        Ok(PendingPath { id, rx: Some(rx) })
    }

    /// Stops the router. Outstanding requests settle immediately with a
    /// channel-closed error and the worker exits once its inbound
    /// channel drains. Dropping the last handle has the same effect.
    pub fn shutdown(&self) {
        let _ = self.shared.cmd_tx.send(RouterCommand::Shutdown);
    }
}

enum RouterEvent {
    Command(Option<RouterCommand>),
    Frame(Option<Vec<u8>>),
    DeadlinePassed,
}

async fn deadline_tick(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Owns the correlation table and multiplexes the channel: commands in,
/// worker frames out, deadlines in between.
async fn route_responses(
    mut cmd_rx: mpsc::UnboundedReceiver<RouterCommand>,
    to_worker: mpsc::UnboundedSender<Vec<u8>>,
    mut from_worker: mpsc::UnboundedReceiver<Vec<u8>>,
    config: WorkerConfig,
) {
    let mut pending: HashMap<u64, PendingEntry> = HashMap::new();
    let mut init_waiter: Option<oneshot::Sender<Result<(), PathError>>> = None;

    loop {
        let next_deadline = pending.values().map(|entry| entry.deadline).min();

        let event = tokio::select! {
            cmd = cmd_rx.recv() => RouterEvent::Command(cmd),
            frame = from_worker.recv() => RouterEvent::Frame(frame),
            _ = deadline_tick(next_deadline) => RouterEvent::DeadlinePassed,
        };

        match event {
            RouterEvent::Command(None) | RouterEvent::Command(Some(RouterCommand::Shutdown)) => {
                debug!(
                    "Worker channel shutting down with {} requests outstanding",
                    pending.len()
                );
                break;
            }
            RouterEvent::Command(Some(RouterCommand::Init { grid, reply })) => {
                match bincode::serialize(&WorkerRequest::Init { grid }) {
                    Ok(frame) => {
                        if to_worker.send(frame).is_err() {
                            let _ = reply.send(Err(PathError::ChannelClosed));
                        } else {
                            // A second init in flight replaces the first
                            // waiter, failing that earlier call.
                            init_waiter = Some(reply);
                        }
                    }
                    Err(e) => {
                        error!("Failed to encode init request: {}", e);
                        let _ = reply.send(Err(PathError::Worker(e.to_string())));
                    }
                }
            }
            RouterEvent::Command(Some(RouterCommand::Submit {
                id,
                current_tick,
                tick_budget,
                start,
                end,
                reply,
            })) => {
                let request = WorkerRequest::FindPath {
                    request_id: id,
                    current_tick,
                    tick_budget,
                    start,
                    end,
                };
                match bincode::serialize(&request) {
                    Ok(frame) => {
                        if to_worker.send(frame).is_err() {
                            let _ = reply.send(Err(PathError::ChannelClosed));
                        } else {
                            pending.insert(
                                id,
                                PendingEntry {
                                    reply,
                                    deadline: Instant::now() + config.request_timeout,
                                },
                            );
                        }
                    }
                    Err(e) => {
                        error!("Failed to encode path request {}: {}", id, e);
                        let _ = reply.send(Err(PathError::Worker(e.to_string())));
                    }
                }
            }
            RouterEvent::Frame(None) => {
                debug!(
                    "Worker went away with {} requests outstanding",
                    pending.len()
                );
                break;
            }
            RouterEvent::Frame(Some(frame)) => {
                handle_worker_frame(&frame, &mut pending, &mut init_waiter);
            }
            RouterEvent::DeadlinePassed => {
                expire_overdue(&mut pending);
            }
        }
    }
    // Dropping the table drops every reply sender, which settles the
    // outstanding handles with a channel-closed error.
}

fn handle_worker_frame(
    frame: &[u8],
    pending: &mut HashMap<u64, PendingEntry>,
    init_waiter: &mut Option<oneshot::Sender<Result<(), PathError>>>,
) {
    let response = match bincode::deserialize::<WorkerResponse>(frame) {
        Ok(response) => response,
        Err(e) => {
            warn!("Discarding undecodable worker frame: {}", e);
            return;
        }
    };

    match response {
        WorkerResponse::Initialized => {
            if let Some(waiter) = init_waiter.take() {
                let _ = waiter.send(Ok(()));
            } else {
                debug!("Unsolicited init acknowledgement ignored");
            }
        }
        WorkerResponse::PathFound { request_id, path } => {
            settle(pending, request_id, Ok(PathOutcome::Found(path)));
        }
        WorkerResponse::PathNotFound { request_id } => {
            settle(pending, request_id, Ok(PathOutcome::NotFound));
        }
        WorkerResponse::Error { request_id, reason } => {
            settle(pending, request_id, Err(PathError::Worker(reason)));
        }
    }
}

fn settle(
    pending: &mut HashMap<u64, PendingEntry>,
    id: u64,
    outcome: Result<PathOutcome, PathError>,
) {
    match pending.remove(&id) {
        Some(entry) => {
            let _ = entry.reply.send(outcome);
        }
        None => {
            // Already timed out, or never ours. Late answers are dropped.
            debug!("Discarding response for settled request {}", id);
        }
    }
}

fn expire_overdue(pending: &mut HashMap<u64, PendingEntry>) {
    let now = Instant::now();
    let overdue: Vec<u64> = pending
        .iter()
        .filter(|(_, entry)| entry.deadline <= now)
        .map(|(id, _)| *id)
        .collect();

    for id in overdue {
        warn!("Path request {} timed out", id);
        if let Some(entry) = pending.remove(&id) {
            let _ = entry.reply.send(Err(PathError::Timeout));
        }
    }
}

/// The background half of the channel: deserializes each request, runs
/// the search against the grid from the init handshake, and serializes
/// one response per request.
pub(crate) async fn worker_loop(
    mut requests: mpsc::UnboundedReceiver<Vec<u8>>,
    responses: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut grid: Option<TileGrid> = None;

    while let Some(frame) = requests.recv().await {
        let request = match bincode::deserialize::<WorkerRequest>(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Worker discarding undecodable frame: {}", e);
                continue;
            }
        };

        let response = match request {
            WorkerRequest::Init { grid: g } => {
                debug!("Worker initialized with a {}x{} grid", g.width(), g.height());
                grid = Some(g);
                WorkerResponse::Initialized
            }
            WorkerRequest::FindPath {
                request_id,
                current_tick,
                tick_budget,
                start,
                end,
            } => {
                debug!(
                    "Path request {} issued at tick {} with a {} tick budget",
                    request_id, current_tick, tick_budget
                );
                answer_find_path(grid.as_ref(), request_id, start, end)
            }
        };

        let frame = match bincode::serialize(&response) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Worker failed to encode a response: {}", e);
                continue;
            }
        };
        if responses.send(frame).is_err() {
            break;
        }
    }
}

fn answer_find_path(
    grid: Option<&TileGrid>,
    request_id: u64,
    start: Cell,
    end: Cell,
) -> WorkerResponse {
    let Some(grid) = grid else {
        return WorkerResponse::Error {
            request_id,
            reason: "no map loaded".to_string(),
        };
    };

    if !grid.contains(start) || !grid.contains(end) {
        return WorkerResponse::Error {
            request_id,
            reason: format!("endpoint outside the {}x{} grid", grid.width(), grid.height()),
        };
    }

    match astar::find_path(grid, start, end) {
        Some(path) => WorkerResponse::PathFound { request_id, path },
        None => WorkerResponse::PathNotFound { request_id },
    }
}
