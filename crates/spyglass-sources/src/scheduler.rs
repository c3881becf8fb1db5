//! Interval-driven background tasks with explicit cancellation.
//!
//! # Design
//! - Each task owns a child of the scheduler's root token.
//! - `cancel_all` is the whole destroy contract: after it returns no task
//!   starts another run, though a run already in progress finishes.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ScheduledTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of a group of recurring tasks.
pub struct Scheduler {
    owner: String,
    root: CancellationToken,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("owner", &self.owner)
            .field("cancelled", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Scheduler whose tasks are logged under `owner`.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            root: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` every `period`, starting one period from now.
    ///
    /// Must be called from within a Tokio runtime. Runs never overlap: a tick
    /// that fires while `job` is still running is delayed.
    pub fn every<F, Fut>(&self, name: &'static str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        if token.is_cancelled() {
            return;
        }
        let task_token = token.clone();
        let owner = self.owner.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;

                    () = task_token.cancelled() => {
                        debug!(owner = %owner, task = name, "scheduled task stopped");
                        break;
                    }

                    _ = interval.tick() => {
                        job().await;
                    }
                }
            }
        });

        self.lock_tasks().push(ScheduledTask {
            name,
            token,
            handle,
        });
    }

    /// Cancel every task owned by this scheduler.
    pub fn cancel_all(&self) {
        self.root.cancel();
        for task in self.lock_tasks().drain(..) {
            task.token.cancel();
            debug!(owner = %self.owner, task = task.name, "scheduled task cancelled");
        }
    }

    /// Whether [`Scheduler::cancel_all`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Names of the tasks still armed.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<&'static str> {
        self.lock_tasks()
            .iter()
            .filter(|task| !task.handle.is_finished())
            .map(|task| task.name)
            .collect()
    }

    /// Token cancelled together with the scheduler.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
