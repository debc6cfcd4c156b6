pub mod aggregator;

use crate::client::Downloader;
use crate::error::{TaskError, TaskResult};
use crate::event::ProgressEvent;
use crate::registry::task::{TaskId, TaskState};
use crate::registry::TaskRegistry;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Default time between two progress queries
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Ownership of one task's polling loop. Dropping it aborts the loop.
#[derive(Debug)]
pub struct PollHandle {
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Let go of the loop without aborting it; used by a loop retiring itself
    fn release(mut self) {
        self.task.take();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct ProgressPoller {
    downloader: Arc<dyn Downloader>,
    registry: Arc<TaskRegistry>,
    events: broadcast::Sender<ProgressEvent>,
    cadence: Duration,
}

impl ProgressPoller {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        registry: Arc<TaskRegistry>,
        events: broadcast::Sender<ProgressEvent>,
        cadence: Duration,
    ) -> Self {
        Self {
            downloader,
            registry,
            events,
            cadence,
        }
    }

    /// Start polling `id`. Fails with `AlreadyPolling` if a loop is live.
    pub async fn start(&self, id: &TaskId) -> TaskResult<()> {
        let downloader = self.downloader.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let cadence = self.cadence;
        let task_id = id.clone();

        self.registry
            .attach_poller(id, move || {
                tokio::spawn(Self::poll_loop(task_id, downloader, registry, events, cadence))
            })
            .await?;

        debug!("poller started for task {}", id);
        Ok(())
    }

    /// Stop polling `id`; a no-op when nothing is polling
    pub async fn stop(&self, id: &TaskId) {
        if let Some(handle) = self.registry.detach_poller(id).await {
            handle.stop();
            debug!("poller stopped for task {}", id);
        }
    }

    pub async fn is_polling(&self, id: &TaskId) -> bool {
        self.registry.is_polling(id).await
    }

    /// Release a finished task on the downloader, then drop it from the
    /// registry. On error the task is left in place.
    pub async fn retire(&self, id: &TaskId, state: TaskState) -> TaskResult<()> {
        Self::release_and_remove(id, state, self.downloader.as_ref(), &self.registry, &self.events).await
    }

    async fn release_and_remove(
        id: &TaskId,
        state: TaskState,
        downloader: &dyn Downloader,
        registry: &TaskRegistry,
        events: &broadcast::Sender<ProgressEvent>,
    ) -> TaskResult<()> {
        downloader.release_download(id).await?;

        if let Some(handle) = registry.detach_poller(id).await {
            handle.release();
        }
        if registry.remove(id).await.is_some() {
            info!("task {} finished as {}", id, state);
            let _ = events.send(ProgressEvent::Removed {
                id: id.clone(),
                state: Some(state),
            });
        }
        Ok(())
    }

    async fn poll_loop(
        id: TaskId,
        downloader: Arc<dyn Downloader>,
        registry: Arc<TaskRegistry>,
        events: broadcast::Sender<ProgressEvent>,
        cadence: Duration,
    ) {
        let mut ticker = interval_at(Instant::now() + cadence, cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut warned = false;

        loop {
            ticker.tick().await;

            let progress = match downloader.query_progress(&id).await {
                Ok(progress) => {
                    warned = false;
                    progress
                }
                Err(e) if e.is_transient() || warned => {
                    debug!("progress query for task {} failed, retrying: {}", id, e);
                    continue;
                }
                Err(e) => {
                    warn!("progress query for task {} rejected, retrying quietly: {}", id, e);
                    warned = true;
                    continue;
                }
            };

            let task = match registry
                .update(&id, |task| {
                    task.apply_progress(&progress);
                    task.clone()
                })
                .await
            {
                Ok(task) => task,
                Err(TaskError::NotFound(_)) => {
                    debug!("task {} removed while its progress query was in flight", id);
                    return;
                }
                Err(e) => {
                    warn!("could not record progress for task {}: {}", id, e);
                    continue;
                }
            };

            let state = task.state;
            let _ = events.send(ProgressEvent::Progress(task));

            if !state.is_terminal() {
                continue;
            }

            match Self::release_and_remove(&id, state, downloader.as_ref(), &registry, &events).await {
                Ok(()) => return,
                Err(e) => warn!("release of finished task {} failed, retrying: {}", id, e),
            }
        }
    }
}
