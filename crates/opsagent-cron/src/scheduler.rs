//! Task scheduler: arms one timer per enabled task, admits at most one run
//! per task at a time, and persists the scheduler-owned task fields.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use opsagent_storage::{ScheduleState, StorageError, TaskStore};
use opsagent_types::{Execution, FailureKind, Task};

use crate::expr::{CronError, CronExpr};
use crate::runner::TaskRunner;
use crate::zone::Zone;

/// Missed fires counted per task at startup before giving up on an exact
/// figure.
const MISFIRE_SCAN_LIMIT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron expression {expression:?}: {source}")]
    InvalidCronExpression {
        expression: String,
        #[source]
        source: CronError,
    },

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {0} is already running")]
    AlreadyRunning(String),

    #[error("scheduler is stopped")]
    Stopped,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Runtime state of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
}

/// Snapshot of one registered task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmedTask {
    pub task_id: String,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub armed: bool,
    pub state: RunState,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

/// What [`Scheduler::start`] found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub loaded: usize,
    pub armed: usize,
    /// Tasks registered unarmed because their stored expression is invalid.
    pub invalid: usize,
    /// Executions marked `Interrupted`.
    pub reconciled: usize,
    /// Fires missed while the process was down. Not replayed.
    pub misfires: usize,
}

struct Timer {
    generation: u64,
    cancel: CancellationToken,
}

struct TaskSlot {
    task: Task,
    /// `None` when the stored expression does not parse.
    schedule: Option<CronExpr>,
    state: RunState,
    timer: Option<Timer>,
    /// Removed while a run was in flight; dropped when that run completes.
    retired: bool,
}

impl TaskSlot {
    fn new(task: Task, schedule: Option<CronExpr>) -> Self {
        Self {
            task,
            schedule,
            state: RunState::Idle,
            timer: None,
            retired: false,
        }
    }

    fn schedule_state(&self) -> ScheduleState {
        ScheduleState {
            last_executed_at: self.task.last_executed_at,
            next_execution_at: self.task.next_execution_at,
        }
    }

    fn snapshot(&self) -> ArmedTask {
        ArmedTask {
            task_id: self.task.id.clone(),
            name: self.task.name.clone(),
            cron_expression: self.task.cron_expression.clone(),
            enabled: self.task.enabled,
            armed: self.timer.is_some(),
            state: self.state,
            next_execution_at: self.task.next_execution_at,
            last_executed_at: self.task.last_executed_at,
        }
    }
}

fn disarm(slot: &mut TaskSlot) {
    if let Some(timer) = slot.timer.take() {
        timer.cancel.cancel();
        debug!(task_id = %slot.task.id, "Task disarmed");
    }
    slot.task.next_execution_at = None;
}

fn parse_schedule(expression: &str) -> Result<CronExpr, SchedulerError> {
    CronExpr::parse(expression).map_err(|source| SchedulerError::InvalidCronExpression {
        expression: expression.to_string(),
        source,
    })
}

fn parse_schedule_in(expression: &str, zone: Zone) -> Result<CronExpr, SchedulerError> {
    parse_schedule(expression).map(|schedule| schedule.with_zone(zone))
}

fn count_misfires(schedule: &CronExpr, previous_next: DateTime<Utc>, now: DateTime<Utc>) -> usize {
    // `previous_next` is itself a fire instant, so start just before it.
    schedule
        .fires_between(previous_next - chrono::Duration::seconds(1), now)
        .take(MISFIRE_SCAN_LIMIT)
        .count()
}

/// Owns every registered task's timer and runtime state.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: Arc<dyn TaskStore>,
    runner: TaskRunner,
    zone: Zone,
    slots: Mutex<HashMap<String, TaskSlot>>,
    /// Orders schedule-state writes so the newest snapshot lands last.
    persist_lock: Mutex<()>,
    generations: AtomicU64,
    shutdown: CancellationToken,
    runs: TaskTracker,
}

impl Scheduler {
    /// Scheduler evaluating cron expressions in UTC.
    pub fn new(tasks: Arc<dyn TaskStore>, runner: TaskRunner) -> Self {
        Self::in_zone(tasks, runner, Zone::Utc)
    }

    /// Scheduler evaluating cron expressions on `zone`'s wall clock.
    pub fn in_zone(tasks: Arc<dyn TaskStore>, runner: TaskRunner, zone: Zone) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks,
                runner,
                zone,
                slots: Mutex::new(HashMap::new()),
                persist_lock: Mutex::new(()),
                generations: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                runs: TaskTracker::new(),
            }),
        }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.inner.runner
    }

    pub fn zone(&self) -> Zone {
        self.inner.zone
    }

    /// Current instant according to the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Parse and validate a cron expression the way `add_task` does.
    pub fn validate_cron(expression: &str) -> Result<CronExpr, SchedulerError> {
        parse_schedule(expression)
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        Ok(())
    }

    /// Reconcile interrupted executions, then register every stored task and
    /// arm the enabled ones.
    pub async fn start(&self) -> Result<StartupReport, SchedulerError> {
        self.ensure_running()?;
        let mut report = StartupReport {
            reconciled: self.inner.reconcile_interrupted().await?,
            ..StartupReport::default()
        };

        let tasks = self.inner.tasks.list_tasks().await?;
        let now = self.inner.now();
        let mut changed = Vec::new();
        {
            let mut slots = self.inner.slots.lock().await;
            for task in tasks {
                report.loaded += 1;
                let schedule = match parse_schedule_in(&task.cron_expression, self.inner.zone) {
                    Ok(schedule) => Some(schedule),
                    Err(e) => {
                        error!(
                            task_id = %task.id,
                            expression = %task.cron_expression,
                            "Stored task has an invalid cron expression, not arming: {e}"
                        );
                        report.invalid += 1;
                        None
                    }
                };

                if let (Some(schedule), Some(previous), true) =
                    (&schedule, task.next_execution_at, task.enabled)
                {
                    let missed = count_misfires(schedule, previous, now);
                    if missed > 0 {
                        report.misfires += missed;
                        warn!(
                            task_id = %task.id,
                            missed,
                            since = %previous,
                            "Fires missed while offline were skipped"
                        );
                    }
                }

                let stored_next = task.next_execution_at;
                let id = task.id.clone();
                let mut slot = TaskSlot::new(task, schedule);
                if self.inner.arm(&mut slot, now).is_some() {
                    report.armed += 1;
                }
                if slot.task.next_execution_at != stored_next {
                    changed.push(id.clone());
                }
                slots.insert(id, slot);
            }
        }

        for id in changed {
            self.inner.persist_logged(&id).await;
        }

        info!(
            loaded = report.loaded,
            armed = report.armed,
            invalid = report.invalid,
            reconciled = report.reconciled,
            misfires = report.misfires,
            "Scheduler started"
        );
        Ok(report)
    }

    /// Register a task, replacing any registration with the same id, and arm
    /// it when enabled.
    pub async fn add_task(&self, task: Task) -> Result<Task, SchedulerError> {
        self.ensure_running()?;
        let schedule = parse_schedule_in(&task.cron_expression, self.inner.zone)?;
        let now = self.inner.now();
        let id = task.id.clone();

        let registered = {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots
                .entry(id.clone())
                .or_insert_with(|| TaskSlot::new(task.clone(), None));
            let last_executed_at = slot.task.last_executed_at.or(task.last_executed_at);
            slot.task = task;
            slot.task.last_executed_at = last_executed_at;
            slot.schedule = Some(schedule);
            slot.retired = false;
            self.inner.arm(slot, now);
            slot.task.clone()
        };

        self.inner.persist_schedule(&id).await?;
        info!(
            task_id = %id,
            enabled = registered.enabled,
            next = ?registered.next_execution_at,
            "Task registered"
        );
        Ok(registered)
    }

    /// Unregister a task. A run in flight finishes and records its
    /// execution, but the task itself is no longer written.
    pub async fn remove_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
        self.ensure_running()?;
        let mut slots = self.inner.slots.lock().await;
        let remove_now = match slots.get_mut(task_id) {
            Some(slot) if !slot.retired => {
                disarm(slot);
                if slot.state == RunState::Running {
                    slot.retired = true;
                    false
                } else {
                    true
                }
            }
            _ => return Ok(false),
        };
        if remove_now {
            slots.remove(task_id);
        }
        info!(task_id, "Task unregistered");
        Ok(true)
    }

    /// Replace a registered task's definition. The timer is rebuilt only when
    /// the expression or the enabled flag changed.
    pub async fn update_task(&self, task: Task) -> Result<Task, SchedulerError> {
        self.ensure_running()?;
        let schedule = parse_schedule_in(&task.cron_expression, self.inner.zone)?;
        let now = self.inner.now();
        let id = task.id.clone();

        let (updated, rearmed) = {
            let mut slots = self.inner.slots.lock().await;
            let slot = match slots.get_mut(&id) {
                Some(slot) if !slot.retired => slot,
                _ => return Err(SchedulerError::NotFound(id)),
            };
            let rearm = slot.schedule.as_ref() != Some(&schedule)
                || slot.task.enabled != task.enabled
                || (task.enabled && slot.timer.is_none());

            let state = slot.schedule_state();
            slot.task = task;
            slot.task.last_executed_at = state.last_executed_at;
            slot.task.next_execution_at = state.next_execution_at;
            slot.schedule = Some(schedule);
            if rearm {
                self.inner.arm(slot, now);
            }
            (slot.task.clone(), rearm)
        };

        if rearmed {
            self.inner.persist_schedule(&id).await?;
            info!(task_id = %id, next = ?updated.next_execution_at, "Task re-armed");
        }
        Ok(updated)
    }

    /// Enable a task and arm it from the current time.
    pub async fn enable(&self, task_id: &str) -> Result<Task, SchedulerError> {
        self.set_enabled(task_id, true).await
    }

    /// Disable a task. Runs in flight are not affected.
    pub async fn disable(&self, task_id: &str) -> Result<Task, SchedulerError> {
        self.set_enabled(task_id, false).await
    }

    async fn set_enabled(&self, task_id: &str, enabled: bool) -> Result<Task, SchedulerError> {
        self.ensure_running()?;
        let now = self.inner.now();
        let task = {
            let mut slots = self.inner.slots.lock().await;
            let slot = match slots.get_mut(task_id) {
                Some(slot) if !slot.retired => slot,
                _ => return Err(SchedulerError::NotFound(task_id.to_string())),
            };
            if enabled && slot.schedule.is_none() {
                slot.schedule = Some(parse_schedule_in(
                    &slot.task.cron_expression,
                    self.inner.zone,
                )?);
            }
            slot.task.enabled = enabled;
            if enabled {
                self.inner.arm(slot, now);
            } else {
                disarm(slot);
            }
            slot.task.clone()
        };

        self.inner.persist_schedule(task_id).await?;
        info!(task_id, enabled, next = ?task.next_execution_at, "Task toggled");
        Ok(task)
    }

    /// Start a run now if the task is idle. Returns the `pending` record; the
    /// run itself continues in the background.
    pub async fn trigger(&self, task_id: &str) -> Result<Execution, SchedulerError> {
        self.ensure_running()?;
        let task = {
            let mut slots = self.inner.slots.lock().await;
            let slot = match slots.get_mut(task_id) {
                Some(slot) if !slot.retired => slot,
                _ => return Err(SchedulerError::NotFound(task_id.to_string())),
            };
            if slot.state == RunState::Running {
                return Err(SchedulerError::AlreadyRunning(task_id.to_string()));
            }
            slot.state = RunState::Running;
            slot.task.clone()
        };

        match self.inner.runner.prepare(&task, true).await {
            Ok(execution) => {
                info!(task_id, execution_id = %execution.id, "Manual trigger admitted");
                let inner = self.inner.clone();
                let pending = execution.clone();
                self.inner
                    .runs
                    .spawn(async move { inner.run_admitted(task, execution).await });
                Ok(pending)
            }
            Err(e) => {
                self.inner.release(task_id).await;
                Err(e.into())
            }
        }
    }

    /// Disarm every timer. Runs in flight keep going; see [`Scheduler::drain`].
    pub async fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        self.inner.shutdown.cancel();
        let mut slots = self.inner.slots.lock().await;
        for slot in slots.values_mut() {
            disarm(slot);
        }
        self.inner.runs.close();
        info!("Scheduler stopped");
    }

    /// Wait for every run in flight to finish.
    pub async fn drain(&self) {
        self.inner.runs.close();
        self.inner.runs.wait().await;
    }

    /// Every registered task with its runtime state, ordered by id.
    pub async fn armed_tasks(&self) -> Vec<ArmedTask> {
        let slots = self.inner.slots.lock().await;
        let mut snapshot: Vec<ArmedTask> = slots
            .values()
            .filter(|slot| !slot.retired)
            .map(TaskSlot::snapshot)
            .collect();
        snapshot.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        snapshot
    }

    pub async fn next_run_time(&self, task_id: &str) -> Option<DateTime<Utc>> {
        let slots = self.inner.slots.lock().await;
        slots
            .get(task_id)
            .filter(|slot| !slot.retired)
            .and_then(|slot| slot.task.next_execution_at)
    }

    pub async fn run_state(&self, task_id: &str) -> Option<RunState> {
        let slots = self.inner.slots.lock().await;
        slots.get(task_id).map(|slot| slot.state)
    }
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        self.runner.clock.now()
    }

    /// Mark every execution left `pending`/`running` by a previous process
    /// as failed.
    async fn reconcile_interrupted(&self) -> Result<usize, StorageError> {
        let unfinished = self.runner.executions.list_unfinished().await?;
        let now = self.now();
        for mut execution in unfinished.iter().cloned() {
            execution.fail(
                FailureKind::Interrupted,
                "interrupted: the process stopped while this run was in flight",
                now,
            );
            self.runner.executions.put_execution(&execution).await?;
            warn!(
                task_id = %execution.task_id,
                execution_id = %execution.id,
                "Interrupted execution marked as failed"
            );
        }
        Ok(unfinished.len())
    }

    /// (Re)arm a slot from `now`. Returns the first fire instant, or `None`
    /// when the slot stays unarmed.
    fn arm(self: &Arc<Self>, slot: &mut TaskSlot, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        disarm(slot);
        if !slot.task.enabled || slot.retired || self.shutdown.is_cancelled() {
            return None;
        }
        let schedule = slot.schedule.clone()?;
        let next = schedule.next_after(now)?;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.shutdown.child_token();
        slot.timer = Some(Timer {
            generation,
            cancel: cancel.clone(),
        });
        slot.task.next_execution_at = Some(next);

        let task_id = slot.task.id.clone();
        debug!(task_id = %task_id, next = %next, generation, "Task armed");
        tokio::spawn(
            self.clone()
                .timer_loop(task_id, schedule, next, generation, cancel),
        );
        Some(next)
    }

    async fn timer_loop(
        self: Arc<Self>,
        task_id: String,
        schedule: CronExpr,
        mut next: DateTime<Utc>,
        generation: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let wait = (next - self.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let following = schedule.next_after(next.max(self.now()));
            if !self.fire(&task_id, generation, following).await {
                return;
            }
            match following {
                Some(following) => next = following,
                None => return,
            }
        }
    }

    /// Handle one timer expiry. Returns false when the timer is stale.
    async fn fire(
        self: &Arc<Self>,
        task_id: &str,
        generation: u64,
        following: Option<DateTime<Utc>>,
    ) -> bool {
        let admitted = {
            let mut slots = self.slots.lock().await;
            let Some(slot) = slots.get_mut(task_id) else {
                return false;
            };
            if slot.timer.as_ref().map(|t| t.generation) != Some(generation) {
                return false;
            }
            slot.task.next_execution_at = following;
            if following.is_none() {
                slot.timer = None;
            }
            if slot.state == RunState::Running {
                None
            } else {
                slot.state = RunState::Running;
                Some(slot.task.clone())
            }
        };

        match admitted {
            Some(task) => {
                info!(task_id, "Cron fire admitted");
                let inner = self.clone();
                self.runs.spawn(async move { inner.run_scheduled(task).await });
            }
            None => warn!(task_id, "Previous run still in flight, skipping cron fire"),
        }
        self.persist_logged(task_id).await;
        true
    }

    async fn run_scheduled(self: Arc<Self>, task: Task) {
        match self.runner.prepare(&task, false).await {
            Ok(execution) => self.run_admitted(task, execution).await,
            Err(e) => {
                error!(task_id = %task.id, "Failed to record execution, skipping run: {e}");
                self.release(&task.id).await;
            }
        }
    }

    async fn run_admitted(self: Arc<Self>, task: Task, execution: Execution) {
        let fallback = execution.clone();
        let inner = self.clone();
        let run_task = task.clone();
        // A panicking agent must not leave the task stuck in `Running`.
        let finished =
            match tokio::spawn(async move { inner.runner.execute(&run_task, execution).await })
                .await
            {
                Ok(finished) => finished,
                Err(e) => {
                    error!(task_id = %task.id, execution_id = %fallback.id, "Run aborted: {e}");
                    let mut failed = fallback;
                    failed.fail(FailureKind::AgentError, format!("run aborted: {e}"), self.now());
                    self.runner.persist(&failed).await;
                    failed
                }
            };
        self.complete(&task.id, &finished).await;
    }

    async fn complete(&self, task_id: &str, execution: &Execution) {
        let now = self.now();
        {
            let mut slots = self.slots.lock().await;
            let retired = match slots.get_mut(task_id) {
                Some(slot) => {
                    slot.state = RunState::Idle;
                    if !slot.retired {
                        slot.task.last_executed_at = Some(execution.end_time.unwrap_or(now));
                        let stale = slot.task.next_execution_at.is_none_or(|next| next <= now);
                        if slot.timer.is_some() && stale {
                            slot.task.next_execution_at =
                                slot.schedule.as_ref().and_then(|s| s.next_after(now));
                        }
                    }
                    slot.retired
                }
                None => return,
            };
            if retired {
                slots.remove(task_id);
                debug!(task_id, "Removed task's final run completed");
                return;
            }
        }
        self.persist_logged(task_id).await;
    }

    async fn release(&self, task_id: &str) {
        let mut slots = self.slots.lock().await;
        let retired = match slots.get_mut(task_id) {
            Some(slot) => {
                slot.state = RunState::Idle;
                slot.retired
            }
            None => return,
        };
        if retired {
            slots.remove(task_id);
        }
    }

    /// Write the slot's `last_executed_at` / `next_execution_at`. A task that
    /// is gone from storage is left gone.
    async fn persist_schedule(&self, task_id: &str) -> Result<bool, StorageError> {
        let _order = self.persist_lock.lock().await;
        let state = {
            let slots = self.slots.lock().await;
            match slots.get(task_id) {
                Some(slot) if !slot.retired => slot.schedule_state(),
                _ => return Ok(false),
            }
        };
        let written = self.tasks.update_schedule_state(task_id, &state).await?;
        if !written {
            debug!(task_id, "Task no longer stored, schedule state not written");
        }
        Ok(written)
    }

    async fn persist_logged(&self, task_id: &str) {
        if let Err(e) = self.persist_schedule(task_id).await {
            error!(task_id, "Failed to write schedule state: {e}");
        }
    }
}
