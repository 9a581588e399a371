//! opsagent-cron: cron evaluation and the scheduled-task engine.
//!
//! [`CronExpr`] computes fire instants in a [`Zone`], [`TaskRunner`] performs one run of a
//! task against an [`AgentRuntime`], and [`Scheduler`] owns the timers and
//! guarantees that a task never runs concurrently with itself.

pub mod agent;
pub mod clock;
pub mod expr;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod zone;

pub use agent::{AgentError, AgentRuntime};
pub use clock::{Clock, SystemClock, TokioClock};
pub use expr::{CronError, CronExpr, Field, FieldMatcher, Fires, next_fire_time};
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use runner::{DEFAULT_EXECUTION_TIMEOUT, TaskRunner};
pub use scheduler::{ArmedTask, RunState, Scheduler, SchedulerError, StartupReport};
pub use zone::{UnknownZone, Zone};

#[cfg(test)]
mod testing;
