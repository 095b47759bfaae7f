//! Connectivity monitor for one device.
//!
//! A [`Monitor`] subscribes to an [`EventFeed`] and keeps its device's last
//! known [`ConnectivityState`] plus a short log of recent [`Transition`]s. Test
//! code triggers a side effect on the device and then suspends in
//! [`Monitor::wait_for_disconnect`] / [`Monitor::wait_for_connect`] until the
//! resulting transition shows up.
//!
//! Waits are edge triggered: a transition that an earlier wait already
//! returned, or that has aged out of the look-back window, never satisfies a
//! new one. A transition that arrived between sending the command and calling
//! `wait_*` is still found in the recent log, because applying an event and
//! registering a waiter take the same lock.
//!
//! ```rust,ignore
//! let monitor = Monitor::new(Arc::new(feed), DeviceId::new("dev-1")?);
//! monitor.start().await?;
//!
//! sci.send(DeviceCommand::Reboot, monitor.device()).await?;
//! monitor.wait_for_disconnect(Duration::from_secs(30)).await?;
//! monitor.wait_for_connect(Duration::from_secs(30)).await?;
//!
//! monitor.stop().await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::device::DeviceId;
use crate::error::{FeedError, MonitorError};
use crate::feed::EventFeed;
use crate::messages::{ConnectionKind, ConnectivityEvent};

mod ingest;
mod state;
mod waiters;

pub use state::{Checkpoint, Connectivity, ConnectivityState, Transition};

use state::Tracker;
use waiters::{WaitOutcome, WaiterId, WaiterRegistry};

/// Which transitions may satisfy a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Since {
    /// Anything not yet handed to an earlier wait and still inside the
    /// look-back window.
    #[default]
    LastCheck,
    /// Anything applied after the checkpoint that is still in the recent log.
    Checkpoint(Checkpoint),
    /// Only transitions applied after the wait registers.
    Now,
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub since: Since,
    pub cancel: Option<CancellationToken>,
}

impl WaitOptions {
    pub fn new(timeout: Duration) -> Self {
        WaitOptions {
            timeout,
            since: Since::default(),
            cancel: None,
        }
    }

    pub fn since(mut self, since: Since) -> Self {
        self.since = since;
        self
    }

    /// Abort the wait with [`MonitorError::Cancelled`] once `token` fires.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

enum Lifecycle {
    Idle,
    Running {
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped,
}

enum FeedHealth {
    Healthy,
    Unavailable(String),
}

struct Inner {
    tracker: Tracker,
    waiters: WaiterRegistry,
    feed: FeedHealth,
    stopped: bool,
}

/// State shared between the monitor handle and its ingestion task.
struct Shared {
    device: DeviceId,
    feed: Arc<dyn EventFeed>,
    config: MonitorConfig,
    inner: Mutex<Inner>,
}

enum Registration {
    Ready(Transition),
    Pending(WaiterId, oneshot::Receiver<WaitOutcome>),
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ingest(&self, event: ConnectivityEvent) {
        if event.device != self.device {
            debug!(device = %self.device, other = %event.device, "Ignoring event for another device");
            return;
        }

        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(transition) = inner.tracker.apply(&event, now, &self.config) else {
            return;
        };
        let woken = inner.waiters.wake(&transition, now);
        if woken > 0 {
            inner.tracker.mark_returned(transition.seq);
        }

        debug!(
            device = %self.device,
            kind = %transition.kind,
            seq = transition.seq,
            observed_at_ms = transition.observed_at_ms,
            reason = ?transition.reason,
            woken,
            "Applied connectivity transition"
        );
    }

    fn register(
        &self,
        kind: ConnectionKind,
        since: Since,
        deadline: Instant,
    ) -> Result<Registration, MonitorError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.stopped {
            return Err(MonitorError::MonitorStopped {
                device: self.device.clone(),
            });
        }
        if let FeedHealth::Unavailable(reason) = &inner.feed {
            return Err(MonitorError::FeedUnavailable {
                device: self.device.clone(),
                reason: reason.clone(),
            });
        }

        let now = Instant::now();
        if let Some(transition) = inner.tracker.find(kind, since, now, &self.config) {
            inner.tracker.mark_returned(transition.seq);
            return Ok(Registration::Ready(transition));
        }

        let after = match since {
            Since::Checkpoint(cp) => cp.max(inner.tracker.checkpoint()).0,
            _ => inner.tracker.checkpoint().0,
        };
        let (id, rx) = inner.waiters.register(kind, after, deadline);
        Ok(Registration::Pending(id, rx))
    }

    fn deregister(&self, id: WaiterId) {
        self.lock().waiters.remove(id);
    }

    fn declare_unavailable(&self, reason: String) {
        let mut inner = self.lock();
        let err = MonitorError::FeedUnavailable {
            device: self.device.clone(),
            reason: reason.clone(),
        };
        let released = inner.waiters.fail_all(&err);
        inner.feed = FeedHealth::Unavailable(reason);
        error!(device = %self.device, released, "Connectivity feed declared unavailable");
    }

    fn feed_restored(&self) {
        self.lock().feed = FeedHealth::Healthy;
    }

    fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.stopped = true;
        inner.waiters.fail_all(&MonitorError::MonitorStopped {
            device: self.device.clone(),
        })
    }
}

/// Removes a pending waiter when its wait call returns or is dropped.
struct WaiterGuard<'a> {
    shared: &'a Shared,
    id: WaiterId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.shared.deregister(self.id);
    }
}

pub struct Monitor {
    shared: Arc<Shared>,
    lifecycle: AsyncMutex<Lifecycle>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("device", &self.shared.device)
            .field("state", &self.state())
            .field("pending_waiters", &self.pending_waiters())
            .finish()
    }
}

impl Monitor {
    pub fn new(feed: Arc<dyn EventFeed>, device: DeviceId) -> Self {
        Self::with_config(feed, device, MonitorConfig::default())
    }

    pub fn with_config(feed: Arc<dyn EventFeed>, device: DeviceId, config: MonitorConfig) -> Self {
        Monitor {
            shared: Arc::new(Shared {
                device,
                feed,
                config,
                inner: Mutex::new(Inner {
                    tracker: Tracker::new(),
                    waiters: WaiterRegistry::default(),
                    feed: FeedHealth::Healthy,
                    stopped: false,
                }),
            }),
            lifecycle: AsyncMutex::new(Lifecycle::Idle),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.shared.device
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Subscribe to the feed and start applying events. A no-op when already
    /// running.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Running { .. } => return Ok(()),
            Lifecycle::Stopped => {
                return Err(MonitorError::MonitorStopped {
                    device: self.shared.device.clone(),
                })
            }
            Lifecycle::Idle => {}
        }

        let events = match self.shared.feed.subscribe(&self.shared.device).await {
            Ok(events) => events,
            Err(FeedError::Unauthorized(device)) => {
                return Err(MonitorError::InvalidDevice(format!(
                    "not authorized to observe device {device}"
                )))
            }
            Err(err) => {
                return Err(MonitorError::FeedUnavailable {
                    device: self.shared.device.clone(),
                    reason: err.to_string(),
                })
            }
        };

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ingest::run(self.shared.clone(), events, shutdown.clone()));
        *lifecycle = Lifecycle::Running { shutdown, task };

        info!(device = %self.shared.device, "Connectivity monitor started");
        Ok(())
    }

    /// Stop ingesting, drop the feed subscription and release pending waiters
    /// with [`MonitorError::MonitorStopped`]. A no-op when already stopped.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Stopped => return,
            Lifecycle::Idle => {}
            Lifecycle::Running { shutdown, task } => {
                shutdown.cancel();
                if let Err(err) = task.await {
                    warn!(device = %self.shared.device, "Ingestion task ended abnormally: {err}");
                }
            }
        }

        let released = self.shared.close();
        info!(device = %self.shared.device, released, "Connectivity monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running { .. })
    }

    pub fn state(&self) -> ConnectivityState {
        self.shared.lock().tracker.state()
    }

    /// Marker to pass as [`Since::Checkpoint`] before triggering a change.
    pub fn checkpoint(&self) -> Checkpoint {
        self.shared.lock().tracker.checkpoint()
    }

    pub fn recent_transitions(&self) -> Vec<Transition> {
        self.shared.lock().tracker.recent()
    }

    pub fn pending_waiters(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    pub async fn wait_for_disconnect(&self, timeout: Duration) -> Result<Transition, MonitorError> {
        self.wait_for(ConnectionKind::Disconnected, WaitOptions::new(timeout))
            .await
    }

    pub async fn wait_for_connect(&self, timeout: Duration) -> Result<Transition, MonitorError> {
        self.wait_for(ConnectionKind::Connected, WaitOptions::new(timeout))
            .await
    }

    /// Suspend until a transition to `kind` allowed by `options.since` is
    /// observed, the timeout elapses, the wait is cancelled or the monitor
    /// stops.
    pub async fn wait_for(
        &self,
        kind: ConnectionKind,
        options: WaitOptions,
    ) -> Result<Transition, MonitorError> {
        let device = &self.shared.device;
        let deadline = Instant::now() + options.timeout;

        let (id, rx) = match self.shared.register(kind, options.since, deadline)? {
            Registration::Ready(transition) => {
                debug!(%device, %kind, seq = transition.seq, "Wait satisfied from recent transitions");
                return Ok(transition);
            }
            Registration::Pending(id, rx) => (id, rx),
        };
        let _guard = WaiterGuard {
            shared: &self.shared,
            id,
        };

        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| {
                Err(MonitorError::MonitorStopped {
                    device: device.clone(),
                })
            }),
            _ = cancelled => Err(MonitorError::Cancelled {
                device: device.clone(),
                kind,
            }),
            _ = tokio::time::sleep_until(deadline) => Err(MonitorError::Timeout {
                device: device.clone(),
                kind,
                timeout: options.timeout,
            }),
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Ok(lifecycle) = self.lifecycle.try_lock() {
            if let Lifecycle::Running { shutdown, .. } = &*lifecycle {
                shutdown.cancel();
            }
        }
    }
}
