//! Tick-paced path queries
//!
//! A query wraps one request to the worker channel and meters it out in
//! simulation ticks. Construction queues nothing; the first poll
//! submits the request, and each later poll burns one tick of the
//! budget. The answer is buffered when it arrives early and surfaced
//! only once the budget is spent, so a caller consuming one poll per
//! tick sees results land on a predictable tick regardless of how fast
//! the worker ran. A slow worker extends the window instead of failing.

use log::{debug, warn};
use shared::Cell;

use crate::worker::{PathError, PathOutcome, PathWorker, PendingPath};

/// What a single poll observed. Terminal answers repeat on every later
/// poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PathPoll {
    Pending,
    Completed,
    NotFound,
    Failed(PathError),
}

enum QueryState {
    NotStarted,
    Pending {
        handle: PendingPath,
        remaining: u32,
        outcome: Option<Result<PathOutcome, PathError>>,
        overdue_logged: bool,
    },
    Completed {
        path: Vec<Cell>,
    },
    NotFound,
    Failed {
        error: PathError,
    },
}

impl QueryState {
    fn name(&self) -> &'static str {
        match self {
            QueryState::NotStarted => "not started",
            QueryState::Pending { .. } => "pending",
            QueryState::Completed { .. } => "completed",
            QueryState::NotFound => "not found",
            QueryState::Failed { .. } => "failed",
        }
    }
}

/// One path request, polled once per simulation tick.
pub struct PathQuery {
    worker: PathWorker,
    start: Cell,
    end: Cell,
    budget: u32,
    state: QueryState,
}

impl PathQuery {
    /// Builds a query without contacting the worker. The request is
    /// submitted by the first call to [`poll`](Self::poll).
    pub fn new(worker: PathWorker, start: Cell, end: Cell, tick_budget: u32) -> Self {
        PathQuery {
            worker,
            start,
            end,
            budget: tick_budget,
            state: QueryState::NotStarted,
        }
    }

    pub fn start(&self) -> Cell {
        self.start
    }

    pub fn end(&self) -> Cell {
        self.end
    }

    /// True once the query has reached an answer that will not change.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.state,
            QueryState::Completed { .. } | QueryState::NotFound | QueryState::Failed { .. }
        )
    }

    /// Advances the query by one tick. The submitting poll always
    /// reports pending; afterwards each poll consumes one tick of the
    /// budget, and the buffered answer is surfaced when it runs out. A
    /// worker answer that misses the budget is surfaced on the first
    /// poll after it arrives.
    pub fn poll(&mut self, current_tick: u64) -> PathPoll {
        match &mut self.state {
            QueryState::NotStarted => {
                match self
                    .worker
                    .submit(current_tick, self.budget, self.start, self.end)
                {
                    Ok(handle) => {
                        debug!(
                            "Path query {} submitted at tick {}",
                            handle.id(),
                            current_tick
                        );
                        self.state = QueryState::Pending {
                            handle,
                            remaining: self.budget.saturating_sub(1),
                            outcome: None,
                            overdue_logged: false,
                        };
                        PathPoll::Pending
                    }
                    Err(error) => {
                        warn!("Path query submission failed: {}", error);
                        self.state = QueryState::Failed {
                            error: error.clone(),
                        };
                        PathPoll::Failed(error)
                    }
                }
            }
            QueryState::Pending {
                handle,
                remaining,
                outcome,
                overdue_logged,
            } => {
                if outcome.is_none() {
                    *outcome = handle.try_take();
                }

                *remaining = remaining.saturating_sub(1);
                if *remaining > 0 {
                    return PathPoll::Pending;
                }

                match outcome.take() {
                    Some(Ok(PathOutcome::Found(path))) => {
                        self.state = QueryState::Completed { path };
                        PathPoll::Completed
                    }
                    Some(Ok(PathOutcome::NotFound)) => {
                        self.state = QueryState::NotFound;
                        PathPoll::NotFound
                    }
                    Some(Err(error)) => {
                        warn!("Path query failed: {}", error);
                        self.state = QueryState::Failed {
                            error: error.clone(),
                        };
                        PathPoll::Failed(error)
                    }
                    None => {
                        if !*overdue_logged {
                            warn!(
                                "Path answer missed its {} tick budget, extending",
                                self.budget
                            );
                            *overdue_logged = true;
                        }
                        PathPoll::Pending
                    }
                }
            }
            QueryState::Completed { .. } => PathPoll::Completed,
            QueryState::NotFound => PathPoll::NotFound,
            QueryState::Failed { error } => PathPoll::Failed(error.clone()),
        }
    }

    /// Hands out the finished path. Anything other than a completed
    /// query is an invalid-state error, including a no-route answer.
    pub fn reconstruct_path(&self) -> Result<Vec<Cell>, PathError> {
        match &self.state {
            QueryState::Completed { path } => Ok(path.clone()),
            other => Err(PathError::NotCompleted(other.name())),
        }
    }
}
