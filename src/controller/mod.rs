use crate::client::Downloader;
use crate::config::ControllerConfig;
use crate::error::{TaskError, TaskResult};
use crate::event::ProgressEvent;
use crate::limiter::Throttle;
use crate::poller::aggregator::{AggregatedProgress, ProgressAggregator};
use crate::poller::ProgressPoller;
use crate::registry::task::{Region, SelectionField, Task, TaskId, TaskSpec, TaskState, TileKind};
use crate::registry::TaskRegistry;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

type ToggleFuture = Pin<Box<dyn Future<Output = TaskResult<Task>> + Send>>;
type ToggleThrottle = Throttle<(TaskController, TaskId), ToggleFuture>;

/// Result of one (kind, level) combination of a batch start
#[derive(Debug)]
pub struct BatchOutcome {
    pub kind: TileKind,
    pub level: u8,
    pub result: TaskResult<TaskId>,
}

/// Public entry point: starts, pauses, resumes and deletes download tasks.
///
/// Cheap to clone; clones share the same registry and pollers.
#[derive(Clone)]
pub struct TaskController {
    inner: Arc<Inner>,
}

struct Inner {
    config: ControllerConfig,
    downloader: Arc<dyn Downloader>,
    registry: Arc<TaskRegistry>,
    poller: ProgressPoller,
    events: broadcast::Sender<ProgressEvent>,
    selection: RwLock<Option<Region>>,
    toggles: Mutex<HashMap<TaskId, Arc<ToggleThrottle>>>,
    /// Drops the toggle throttle of every task that leaves the registry
    sweeper: OnceLock<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get() {
            sweeper.abort();
        }
        // poll loops hold the registry alive, so abort them explicitly
        self.registry.try_clear();
    }
}

impl TaskController {
    pub fn new(config: ControllerConfig, downloader: Arc<dyn Downloader>) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let poller = ProgressPoller::new(
            downloader.clone(),
            registry.clone(),
            events.clone(),
            config.poll_interval(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                downloader,
                registry,
                poller,
                events,
                selection: RwLock::new(None),
                toggles: Mutex::new(HashMap::new()),
                sweeper: OnceLock::new(),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    pub async fn select_region(&self, region: Region) {
        *self.inner.selection.write().await = Some(region);
    }

    pub async fn clear_region(&self) {
        *self.inner.selection.write().await = None;
    }

    pub async fn region(&self) -> Option<Region> {
        *self.inner.selection.read().await
    }

    pub async fn get(&self, id: &TaskId) -> TaskResult<Task> {
        self.inner.registry.get(id).await
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.registry.list().await
    }

    pub async fn summary(&self) -> AggregatedProgress {
        ProgressAggregator::aggregate(&self.inner.registry.list().await)
    }

    pub async fn is_polling(&self, id: &TaskId) -> bool {
        self.inner.poller.is_polling(id).await
    }

    /// Create a task for the selected region and start downloading it
    pub async fn start(&self, spec: TaskSpec) -> TaskResult<TaskId> {
        let region = self.region().await.ok_or(TaskError::NoRegionSelected)?;
        let registry = &self.inner.registry;

        let id = registry.create(&spec, region).await?;
        let task = registry
            .update(&id, |task| task.begin().map(|_| task.clone()))
            .await??;

        if let Err(e) = self
            .inner
            .downloader
            .start_download(&task, self.inner.config.projection)
            .await
        {
            warn!("downloader refused task {}: {}", id, e);
            registry.remove(&id).await;
            return Err(e);
        }

        self.spawn_sweeper();
        self.inner.poller.start(&id).await?;
        self.inner
            .toggles
            .lock()
            .await
            .insert(id.clone(), Arc::new(Self::toggle_throttle(self.inner.config.toggle_interval())));

        info!("started task {} ({} level {})", id, task.kind, task.level);
        let _ = self.inner.events.send(ProgressEvent::Started(task));
        Ok(id)
    }

    /// Start one task per (kind, level) pair, kinds outermost.
    ///
    /// Precondition failures abort the whole batch; after that every
    /// combination succeeds or fails on its own.
    pub async fn start_batch(&self, kinds: &[TileKind], levels: &[u8]) -> TaskResult<Vec<BatchOutcome>> {
        if self.region().await.is_none() {
            return Err(TaskError::NoRegionSelected);
        }
        if kinds.is_empty() {
            return Err(TaskError::NoSelectionMade(SelectionField::Kind));
        }
        if levels.is_empty() {
            return Err(TaskError::NoSelectionMade(SelectionField::Level));
        }

        let mut outcomes = Vec::with_capacity(kinds.len() * levels.len());
        for &kind in kinds {
            for &level in levels {
                let result = self.start(TaskSpec::new(kind, level)).await;
                if let Err(e) = &result {
                    warn!("could not start {} level {}: {}", kind, level, e);
                }
                outcomes.push(BatchOutcome { kind, level, result });
            }
        }
        Ok(outcomes)
    }

    /// Pause a running task
    pub async fn cancel(&self, id: &TaskId) -> TaskResult<Task> {
        let registry = &self.inner.registry;
        Self::expect_state(&registry.get(id).await?, TaskState::Running, "cancel")?;

        // no poll result may land while the downloader is pausing
        self.inner.poller.stop(id).await;

        if let Err(e) = self.inner.downloader.cancel_download(id).await {
            self.recover(id).await;
            return Err(e);
        }

        let paused = registry
            .update(id, |task| match task.pause() {
                Ok(()) => Ok(task.clone()),
                Err(e) => Err((e, task.clone())),
            })
            .await?;
        let task = match paused {
            Ok(task) => task,
            Err((e, task)) => {
                // the poll loop recorded a terminal state just before it was stopped
                self.recover(&task.id).await;
                return Err(e);
            }
        };

        info!("paused task {}", id);
        let _ = self.inner.events.send(ProgressEvent::Paused(task.clone()));
        Ok(task)
    }

    /// Resume a paused task. The downloader's partial state is assumed intact.
    pub async fn resume(&self, id: &TaskId) -> TaskResult<Task> {
        let registry = &self.inner.registry;
        Self::expect_state(&registry.get(id).await?, TaskState::Paused, "resume")?;

        self.inner.downloader.resume_download(id).await?;
        let task = registry
            .update(id, |task| task.resume().map(|_| task.clone()))
            .await??;
        self.inner.poller.start(id).await?;

        info!("resumed task {}", id);
        let _ = self.inner.events.send(ProgressEvent::Resumed(task.clone()));
        Ok(task)
    }

    /// Cancel or resume depending on the current state, at most once per
    /// toggle interval per task. Throttled calls return `Ok(None)`.
    pub async fn toggle(&self, id: &TaskId) -> TaskResult<Option<Task>> {
        if !self.inner.registry.contains(id).await {
            self.inner.toggles.lock().await.remove(id);
            return Err(TaskError::NotFound(id.clone()));
        }

        let throttle = {
            let mut toggles = self.inner.toggles.lock().await;
            toggles
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Self::toggle_throttle(self.inner.config.toggle_interval())))
                .clone()
        };

        match throttle.call((self.clone(), id.clone())) {
            Some(toggle) => toggle.await.map(Some),
            None => {
                debug!("toggle of task {} throttled", id);
                Ok(None)
            }
        }
    }

    /// Release the downloader's state and forget the task. Unknown ids succeed.
    pub async fn delete(&self, id: &TaskId) -> TaskResult<()> {
        let registry = &self.inner.registry;
        if !registry.contains(id).await {
            self.inner.toggles.lock().await.remove(id);
            return Ok(());
        }

        self.inner.downloader.release_download(id).await?;
        let removed = registry.remove(id).await;
        self.inner.poller.stop(id).await;
        self.inner.toggles.lock().await.remove(id);

        if let Some(task) = removed {
            info!("deleted task {}", id);
            let _ = self.inner.events.send(ProgressEvent::Removed {
                id: id.clone(),
                state: Some(task.state),
            });
        }
        Ok(())
    }

    /// Pause every running task, returning the ones that were paused
    pub async fn cancel_all(&self) -> Vec<TaskId> {
        let mut paused = Vec::new();
        for task in self.inner.registry.list().await {
            if task.state != TaskState::Running {
                continue;
            }
            match self.cancel(&task.id).await {
                Ok(_) => paused.push(task.id),
                Err(e) => warn!("could not pause task {}: {}", task.id, e),
            }
        }
        paused
    }

    /// Stop every poller, leaving tasks in the registry
    pub async fn shutdown(&self) {
        for task in self.inner.registry.list().await {
            self.inner.poller.stop(&task.id).await;
        }
    }

    /// Bring a task whose poller was stopped back under management: a
    /// terminal task is released and removed, a running one polled again.
    async fn recover(&self, id: &TaskId) {
        let task = match self.inner.registry.get(id).await {
            Ok(task) => task,
            Err(_) => return,
        };

        if task.state.is_terminal() {
            match self.inner.poller.retire(id, task.state).await {
                Ok(()) => return,
                Err(e) => warn!("release of finished task {} failed, polling again: {}", id, e),
            }
        } else if task.state != TaskState::Running {
            return;
        }

        if let Err(e) = self.inner.poller.start(id).await {
            warn!("could not restart poller for task {}: {}", id, e);
        }
    }

    fn spawn_sweeper(&self) {
        self.inner.sweeper.get_or_init(|| {
            let inner = Arc::downgrade(&self.inner);
            let events = self.inner.events.subscribe();
            tokio::spawn(Self::sweep(inner, events))
        });
    }

    async fn sweep(inner: Weak<Inner>, mut events: broadcast::Receiver<ProgressEvent>) {
        loop {
            let removed = match events.recv().await {
                Ok(ProgressEvent::Removed { id, .. }) => Some(id),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("toggle sweeper skipped {} events, pruning", skipped);
                    None
                }
                Err(RecvError::Closed) => return,
            };
            let Some(inner) = inner.upgrade() else {
                return;
            };

            match removed {
                Some(id) => {
                    inner.toggles.lock().await.remove(&id);
                }
                None => {
                    let live: HashSet<TaskId> =
                        inner.registry.list().await.into_iter().map(|task| task.id).collect();
                    inner.toggles.lock().await.retain(|id, _| live.contains(id));
                }
            }
        }
    }

    async fn dispatch_toggle(&self, id: &TaskId) -> TaskResult<Task> {
        let task = self.inner.registry.get(id).await?;
        match task.state {
            TaskState::Running => self.cancel(id).await,
            TaskState::Paused => self.resume(id).await,
            state => Err(TaskError::InvalidState {
                id: id.clone(),
                state,
                operation: "toggle",
            }),
        }
    }

    fn toggle_throttle(interval: Duration) -> ToggleThrottle {
        Throttle::new(
            |(controller, id): (TaskController, TaskId)| -> ToggleFuture {
                Box::pin(async move { controller.dispatch_toggle(&id).await })
            },
            interval,
        )
    }

    fn expect_state(task: &Task, expected: TaskState, operation: &'static str) -> TaskResult<()> {
        if task.state != expected {
            return Err(TaskError::InvalidState {
                id: task.id.clone(),
                state: task.state,
                operation,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::task::{LngLat, Projection, RemoteProgress};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports every task finished on its first query, or never
    struct StubDownloader {
        completes: bool,
        cancel_delay: Duration,
        refuse_cancel: bool,
        releases: AtomicUsize,
    }

    impl StubDownloader {
        fn new(completes: bool) -> Self {
            Self {
                completes,
                cancel_delay: Duration::ZERO,
                refuse_cancel: false,
                releases: AtomicUsize::new(0),
            }
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Downloader for StubDownloader {
        async fn start_download(&self, _task: &Task, _projection: Projection) -> TaskResult<()> {
            Ok(())
        }

        async fn query_progress(&self, _id: &TaskId) -> TaskResult<RemoteProgress> {
            let (current, state) = if self.completes {
                (1, TaskState::Completed)
            } else {
                (0, TaskState::Running)
            };
            Ok(RemoteProgress {
                current,
                total: 1,
                state,
                failed_tiles: vec![],
            })
        }

        async fn cancel_download(&self, _id: &TaskId) -> TaskResult<()> {
            if !self.cancel_delay.is_zero() {
                tokio::time::sleep(self.cancel_delay).await;
            }
            if self.refuse_cancel {
                return Err(TaskError::Unreachable("connection reset".to_string()));
            }
            Ok(())
        }

        async fn resume_download(&self, _id: &TaskId) -> TaskResult<()> {
            Ok(())
        }

        async fn release_download(&self, _id: &TaskId) -> TaskResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn controller(stub: Arc<StubDownloader>) -> TaskController {
        let controller = TaskController::new(ControllerConfig::default(), stub);
        controller
            .select_region(Region::from_bounds(LngLat::new(116.0, 39.0), LngLat::new(117.0, 40.0)))
            .await;
        controller
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_tasks_drop_their_toggle() {
        let stub = Arc::new(StubDownloader::new(true));
        let controller = controller(stub.clone()).await;

        for level in 0..50 {
            controller.start(TaskSpec::new(TileKind::Imagery, level)).await.unwrap();
        }
        assert_eq!(controller.inner.toggles.lock().await.len(), 50);

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(controller.tasks().await.is_empty());
        assert_eq!(stub.releases(), 50);
        assert!(controller.inner.toggles.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cleans_up_task_that_finished_meanwhile() {
        let mut stub = StubDownloader::new(false);
        stub.cancel_delay = Duration::from_secs(1);
        let stub = Arc::new(stub);
        let controller = controller(stub.clone()).await;
        let id = controller.start(TaskSpec::new(TileKind::Vector, 5)).await.unwrap();

        let pending = tokio::spawn({
            let controller = controller.clone();
            let id = id.clone();
            async move { controller.cancel(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!controller.is_polling(&id).await);

        // completion recorded by a poll that raced the stop
        controller
            .inner
            .registry
            .update(&id, |task| {
                task.apply_progress(&RemoteProgress {
                    current: 1,
                    total: 1,
                    state: TaskState::Completed,
                    failed_tiles: vec![],
                })
            })
            .await
            .unwrap();
        let mut events = controller.subscribe();

        let result = pending.await.unwrap();
        assert!(matches!(
            result,
            Err(TaskError::InvalidState { state: TaskState::Completed, .. })
        ));
        assert!(matches!(controller.get(&id).await, Err(TaskError::NotFound(_))));
        assert_eq!(stub.releases(), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            ProgressEvent::Removed {
                id,
                state: Some(TaskState::Completed)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cancel_keeps_polling() {
        let mut stub = StubDownloader::new(false);
        stub.refuse_cancel = true;
        let controller = controller(Arc::new(stub)).await;
        let id = controller.start(TaskSpec::new(TileKind::Vector, 5)).await.unwrap();

        assert!(matches!(
            controller.cancel(&id).await,
            Err(TaskError::Unreachable(_))
        ));
        assert_eq!(controller.get(&id).await.unwrap().state, TaskState::Running);
        assert!(controller.is_polling(&id).await);
    }
}
