use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    catalog::{CatalogEvent, EventSource},
    error::Result,
    registry::{ManagedObjects, ManagedRegistry},
    tracker::{ManagedLifecycle, Tracker, TrackerBuilder},
};

type PendingPump = Box<dyn FnOnce() -> JoinHandle<()> + Send>;

/// Owns a group of trackers and drives their lifecycle together.
///
/// `start()` populates every tracker, spawns the event pumps, then attaches
/// listeners; `stop()` tears everything down and joins the pumps.
pub struct Container {
    registry: Arc<ManagedObjects>,
    trackers: Vec<Box<dyn ManagedLifecycle>>,
    pending: Vec<PendingPump>,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ManagedObjects::new()),
            trackers: Vec::new(),
            pending: Vec::new(),
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Registry every tracker built here reports to.
    pub fn registry(&self) -> Arc<ManagedObjects> {
        self.registry.clone()
    }

    /// Build and adopt a tracker. Its events come only from direct calls.
    pub fn track<S>(&mut self, builder: TrackerBuilder<S>) -> Result<Tracker<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let builder = if builder.has_registry() {
            builder
        } else {
            let registry: Arc<dyn ManagedRegistry> = self.registry.clone();
            builder.registry(registry)
        };
        let tracker = builder.build()?;
        self.trackers.push(Box::new(tracker.clone()));
        if self.started {
            tracker.activate()?;
        }
        Ok(tracker)
    }

    /// Build and adopt a tracker fed by `source`. The pump starts with the container.
    pub fn track_with_events<S, E>(&mut self, builder: TrackerBuilder<S>, source: E) -> Result<Tracker<S>>
    where
        S: ?Sized + Send + Sync + 'static,
        E: EventSource + 'static,
    {
        let tracker = self.track(builder)?;
        self.adopt_pump(&tracker, source);
        Ok(tracker)
    }

    /// Build and adopt a tracker fed through a bounded channel sized by its
    /// config's `event_capacity`. Events sent before `start()` wait in the channel.
    pub fn track_with_sender<S>(
        &mut self,
        builder: TrackerBuilder<S>,
    ) -> Result<(Tracker<S>, mpsc::Sender<CatalogEvent>)>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let tracker = self.track(builder)?;
        let (tx, rx) = mpsc::channel(tracker.event_capacity());
        self.adopt_pump(&tracker, rx);
        Ok((tracker, tx))
    }

    fn adopt_pump<S, E>(&mut self, tracker: &Tracker<S>, source: E)
    where
        S: ?Sized + Send + Sync + 'static,
        E: EventSource + 'static,
    {
        let pump_tracker = tracker.clone();
        let spawn: PendingPump = Box::new(move || pump_tracker.spawn_pump(source));
        if self.started {
            self.tasks.push(spawn());
        } else {
            self.pending.push(spawn);
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        for t in &self.trackers {
            t.start()?;
        }
        // 先完成初次填充再接收实时事件；重复的到达事件会被去重
        for spawn in self.pending.drain(..) {
            self.tasks.push(spawn());
        }
        tokio::task::yield_now().await;
        for t in &self.trackers {
            if let Err(e) = t.activate() {
                tracing::error!(tracker = %t.name(), error = %e, "failed to activate tracker");
            }
        }
        self.started = true;
        Ok(())
    }

    pub async fn stop(&mut self) {
        for t in &self.trackers {
            t.stop();
        }
        for h in self.tasks.drain(..) {
            // pump 在 tracker 停止后立即退出；panic 也只记录
            if let Err(e) = h.await {
                tracing::warn!(error = %e, "event pump ended abnormally");
            }
        }
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
