//! Run lifecycle controller.
//!
//! Owns the calendar/board caches and the run state, sequences remote steps one at a time and
//! emits events for presentation layers. The state mutex is never held across an await, so
//! re-entrant calls from event callbacks observe `Busy` instead of interleaving with a run.

use super::post_process::{process_step_completion, StepReport};
use crate::api::{ApiError, SeasonClient};
use crate::calendar::{self, Progress};
use crate::completion::CompletionDetector;
use crate::model::{
    CompetitorId, CompetitorRecord, InfoEvent, RunEvent, RunState, Step, StepResult,
};
use crate::snapshot::SnapshotPair;
use crate::standings;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("another run is already in progress")]
    Busy,
    #[error("step {0} is not in the calendar")]
    InvalidStep(u32),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub completed: Vec<u32>,
    pub total: usize,
    pub cancelled: bool,
    /// Report of the final executed step; deltas therefore cover that step only.
    pub last: Option<StepReport>,
}

struct Inner {
    run: RunState,
    calendar: Vec<Step>,
    board: Vec<CompetitorRecord>,
    last_results: Vec<StepResult>,
    snapshots: SnapshotPair,
    completion: CompletionDetector,
    last_error: Option<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            run: RunState::Idle,
            calendar: Vec::new(),
            board: Vec::new(),
            last_results: Vec::new(),
            snapshots: SnapshotPair::default(),
            completion: CompletionDetector::default(),
            last_error: None,
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Puts the controller back to `Idle` when the operation ends, including when its future is
/// dropped mid-flight.
struct RunGuard<'a> {
    inner: &'a Mutex<Inner>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(self.inner).run = RunState::Idle;
    }
}

pub struct RunController {
    client: SeasonClient,
    inner: Mutex<Inner>,
    event_tx: UnboundedSender<RunEvent>,
}

impl RunController {
    pub fn new(client: SeasonClient, event_tx: UnboundedSender<RunEvent>) -> Self {
        Self {
            client,
            inner: Mutex::new(Inner::default()),
            event_tx,
        }
    }

    /// Start with the completion latch already tripped, as recorded by an earlier invocation.
    /// Only a season reset re-arms it.
    pub fn with_completion_latched(self, latched: bool) -> Self {
        if latched {
            self.state().completion = CompletionDetector::latched();
        }
        self
    }

    pub fn client(&self) -> &SeasonClient {
        &self.client
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    fn emit(&self, ev: RunEvent) {
        let _ = self.event_tx.send(ev);
    }

    pub(crate) fn notify(&self, info: InfoEvent) {
        self.emit(RunEvent::Info(info));
    }

    /// Atomically check for `Idle` and enter the state chosen by `plan`.
    ///
    /// `plan` sees the caches and either rejects, declines (`Ok(None)`: nothing to do, no
    /// transition) or names the next state. Rejections leave everything untouched.
    fn begin<T>(
        &self,
        plan: impl FnOnce(&Inner) -> Result<Option<(RunState, T)>, RunError>,
    ) -> Result<Option<(RunGuard<'_>, T)>, RunError> {
        let mut inner = self.state();
        if !inner.run.is_idle() {
            debug!(state = ?inner.run, "rejecting operation while busy");
            return Err(RunError::Busy);
        }
        let Some((next, value)) = plan(&inner)? else {
            return Ok(None);
        };
        if next.is_running() {
            inner.last_error = None;
        }
        inner.run = next;
        Ok(Some((RunGuard { inner: &self.inner }, value)))
    }

    fn record_failure(&self, err: &RunError) {
        warn!("run failed: {err}");
        self.state().last_error = Some(err.to_string());
        self.emit(RunEvent::RunFailed {
            message: err.to_string(),
        });
    }

    /// Fire the season-complete notification if the latch trips now.
    fn evaluate_completion(&self) {
        let champion = {
            let mut inner = self.state();
            let active = inner.run.is_running();
            let Inner {
                completion,
                calendar,
                board,
                ..
            } = &mut *inner;
            if !completion.evaluate(calendar, active) {
                return;
            }
            standings::champion(board).cloned()
        };
        info!(
            champion = champion.as_ref().map(|c| c.display_name()).unwrap_or_default(),
            "season complete"
        );
        self.emit(RunEvent::SeasonComplete {
            champion: champion.map(Box::new),
        });
    }

    /// Snapshot, execute one step remotely, then replace both caches from fresh reads.
    /// Nothing cached is touched unless every remote call succeeds, and nothing can fail after
    /// the commit.
    async fn execute_step(&self, step_id: u32, force: bool) -> Result<StepReport, RunError> {
        let (planned, focal, replaced) = {
            let mut inner = self.state();
            let planned = calendar::find(&inner.calendar, step_id)
                .cloned()
                .ok_or(RunError::InvalidStep(step_id))?;
            let focal = inner.snapshots.focal.clone();
            let replaced = focal.as_ref().map(|f| inner.snapshots.begin_run(f));
            (planned, focal, replaced)
        };
        self.emit(RunEvent::StepStarted { step_id, force });
        info!(step_id, force, "executing step");

        let fetched = async {
            let results = self.client.simulate_step(step_id, force).await?;
            let fresh_calendar = self.client.calendar().await?;
            let fresh_board = self.client.board().await?;
            Ok::<_, RunError>((results, fresh_calendar, fresh_board))
        }
        .await;
        let (results, mut fresh_calendar, fresh_board) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                if let Some(previous) = replaced {
                    self.state().snapshots.abort_run(previous);
                }
                return Err(e);
            }
        };

        // The step may be gone from a calendar reset elsewhere; report it as it was planned.
        let step = match fresh_calendar.iter_mut().find(|s| s.id == step_id) {
            Some(s) => {
                s.simulated = true;
                s.clone()
            }
            None => {
                warn!(step_id, "executed step is missing from the refreshed calendar");
                Step {
                    simulated: true,
                    ..planned
                }
            }
        };

        let report = {
            let mut inner = self.state();
            inner.calendar = fresh_calendar;
            inner.board = fresh_board;
            let Inner {
                snapshots, board, ..
            } = &mut *inner;
            if focal.is_some() {
                snapshots.end_run(board);
            }
            inner.last_results = results.clone();
            process_step_completion(step, force, results, focal.as_ref(), &inner.snapshots)
        };

        self.emit(RunEvent::StepCompleted {
            step: Box::new(report.step.clone()),
            results: report.results.len(),
        });
        Ok(report)
    }

    async fn single(&self, guard: RunGuard<'_>, step_id: u32, force: bool) -> Result<StepReport, RunError> {
        let outcome = self.execute_step(step_id, force).await;
        drop(guard);
        match outcome {
            Ok(report) => {
                self.evaluate_completion();
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Execute one step of the current calendar.
    pub async fn run_single(&self, step_id: u32, force: bool) -> Result<StepReport, RunError> {
        let Some((guard, ())) = self.begin(|inner| {
            if calendar::find(&inner.calendar, step_id).is_none() {
                return Err(RunError::InvalidStep(step_id));
            }
            Ok(Some((RunState::RunningSingle { step_id }, ())))
        })?
        else {
            return Err(RunError::InvalidStep(step_id));
        };
        self.single(guard, step_id, force).await
    }

    /// Execute the lowest-id unsimulated step. `Ok(None)` when every step is simulated.
    pub async fn run_next(&self, force: bool) -> Result<Option<StepReport>, RunError> {
        let Some((guard, step_id)) = self.begin(|inner| {
            Ok(calendar::next_unsimulated(&inner.calendar)
                .map(|s| (RunState::RunningSingle { step_id: s.id }, s.id)))
        })?
        else {
            debug!("no unsimulated step left");
            return Ok(None);
        };
        self.single(guard, step_id, force).await.map(Some)
    }

    /// Execute every step that is unsimulated right now, strictly in id order.
    ///
    /// The work list is fixed at call time. Cancellation is honoured between steps only and
    /// keeps whatever already completed.
    pub async fn run_all(&self, force: bool) -> Result<BatchReport, RunError> {
        let Some((guard, remaining)) = self.begin(|inner| {
            let ids = calendar::remaining_ids(&inner.calendar);
            if ids.is_empty() {
                return Ok(None);
            }
            let state = RunState::RunningBatch {
                done: 0,
                total: ids.len(),
                cancel_requested: false,
            };
            Ok(Some((state, ids)))
        })?
        else {
            return Ok(BatchReport {
                completed: Vec::new(),
                total: 0,
                cancelled: false,
                last: None,
            });
        };

        let total = remaining.len();
        info!(total, force, "batch started");
        self.emit(RunEvent::BatchStarted { total });

        let mut completed = Vec::with_capacity(total);
        let mut last = None;
        let mut cancelled = false;
        for step_id in remaining {
            if self.cancel_requested() {
                cancelled = true;
                break;
            }
            match self.execute_step(step_id, force).await {
                Ok(report) => {
                    completed.push(step_id);
                    last = Some(report);
                    if let RunState::RunningBatch { done, .. } = &mut self.state().run {
                        *done = completed.len();
                    }
                    self.emit(RunEvent::BatchProgress {
                        done: completed.len(),
                        total,
                    });
                }
                Err(e) => {
                    drop(guard);
                    self.record_failure(&e);
                    return Err(e);
                }
            }
        }
        drop(guard);

        info!(done = completed.len(), total, cancelled, "batch finished");
        self.emit(RunEvent::BatchFinished {
            done: completed.len(),
            total,
            cancelled,
        });
        self.evaluate_completion();
        Ok(BatchReport {
            completed,
            total,
            cancelled,
            last,
        })
    }

    fn cancel_requested(&self) -> bool {
        matches!(
            self.state().run,
            RunState::RunningBatch {
                cancel_requested: true,
                ..
            }
        )
    }

    /// Ask a running batch to stop before its next step. Returns `false` when no batch runs.
    pub fn cancel(&self) -> bool {
        let (done, total) = {
            let mut inner = self.state();
            match &mut inner.run {
                RunState::RunningBatch {
                    done,
                    total,
                    cancel_requested,
                } => {
                    *cancel_requested = true;
                    (*done, *total)
                }
                _ => return false,
            }
        };
        info!(done, total, "batch cancellation requested");
        self.notify(InfoEvent::CancelRequested { done, total });
        true
    }

    /// Replace both caches from fresh reads of the service.
    pub async fn sync(&self) -> Result<(), RunError> {
        let Some((guard, ())) = self.begin(|_| Ok(Some((RunState::Syncing, ()))))? else {
            return Ok(());
        };
        let outcome = self.fetch_and_commit().await;
        drop(guard);
        self.settle(outcome)
    }

    /// Reset the season remotely, forget everything cached locally and re-read.
    pub async fn reset_season(&self) -> Result<(), RunError> {
        let Some((guard, ())) = self.begin(|_| Ok(Some((RunState::Syncing, ()))))? else {
            return Ok(());
        };
        let outcome = async {
            self.client.reset_season().await?;
            {
                let mut inner = self.state();
                inner.calendar.clear();
                inner.board.clear();
                inner.last_results.clear();
                inner.last_error = None;
                inner.snapshots.clear();
                inner.completion.reset();
            }
            info!("season reset");
            self.notify(InfoEvent::SeasonReset);
            self.fetch_and_commit().await
        }
        .await;
        drop(guard);
        self.settle(outcome)
    }

    async fn fetch_and_commit(&self) -> Result<(), RunError> {
        let fresh_calendar = self.client.calendar().await?;
        let fresh_board = self.client.board().await?;
        let mut inner = self.state();
        inner.calendar = fresh_calendar;
        inner.board = fresh_board;
        let Inner {
            snapshots, board, ..
        } = &mut *inner;
        snapshots.observe(board);
        debug!(
            steps = inner.calendar.len(),
            competitors = inner.board.len(),
            "caches replaced"
        );
        Ok(())
    }

    fn settle(&self, outcome: Result<(), RunError>) -> Result<(), RunError> {
        match outcome {
            Ok(()) => {
                self.evaluate_completion();
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Track a different focal competitor. Not allowed while an operation is in flight.
    pub fn select_focal(&self, focal: Option<CompetitorId>) -> Result<(), RunError> {
        let mut inner = self.state();
        if !inner.run.is_idle() {
            return Err(RunError::Busy);
        }
        let Inner {
            snapshots, board, ..
        } = &mut *inner;
        snapshots.focus(focal);
        snapshots.observe(board);
        Ok(())
    }

    pub fn run_state(&self) -> RunState {
        self.state().run
    }

    pub fn calendar(&self) -> Vec<Step> {
        self.state().calendar.clone()
    }

    pub fn board(&self) -> Vec<CompetitorRecord> {
        self.state().board.clone()
    }

    /// The board in ranking order.
    pub fn standings(&self) -> Vec<CompetitorRecord> {
        let inner = self.state();
        standings::rank(&inner.board).into_iter().cloned().collect()
    }

    pub fn progress(&self) -> Progress {
        calendar::progress(&self.state().calendar)
    }

    #[cfg(test)]
    pub fn snapshots(&self) -> SnapshotPair {
        self.state().snapshots.clone()
    }

    pub fn focal_record(&self) -> Option<CompetitorRecord> {
        let inner = self.state();
        let focal = inner.snapshots.focal.as_ref()?;
        inner.board.iter().find(|r| &r.identity() == focal).cloned()
    }

    #[cfg(test)]
    pub fn last_results(&self) -> Vec<StepResult> {
        self.state().last_results.clone()
    }

    #[cfg(test)]
    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn is_season_complete(&self) -> bool {
        self.state().completion.is_latched()
    }
}
