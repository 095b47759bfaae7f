//! Shared monitors, one per device, with explicit reference counting.
//!
//! Opening an event subscription per test is expensive, so a test suite keeps
//! one [`Monitor`] per device alive across all of its tests. The registry
//! makes that sharing explicit: every user [`acquire`](MonitorRegistry::acquire)s
//! a [`MonitorLease`] and hands it back with
//! [`release`](MonitorRegistry::release). The first acquisition creates and
//! starts the monitor, the last release stops it, so `stop()` runs exactly
//! once per monitor.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::device::DeviceId;
use crate::error::MonitorError;
use crate::feed::EventFeed;
use crate::monitor::Monitor;

struct Entry {
    monitor: Arc<Monitor>,
    leases: usize,
}

pub struct MonitorRegistry {
    feed: Arc<dyn EventFeed>,
    config: MonitorConfig,
    entries: Mutex<HashMap<DeviceId, Entry>>,
}

/// A counted reference to a registry-owned monitor.
///
/// Must be given back through [`MonitorRegistry::release`]; dropping it
/// instead keeps the monitor alive until [`MonitorRegistry::shutdown`].
pub struct MonitorLease {
    monitor: Arc<Monitor>,
    released: bool,
}

impl Deref for MonitorLease {
    type Target = Monitor;

    fn deref(&self) -> &Monitor {
        &self.monitor
    }
}

impl std::fmt::Debug for MonitorLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorLease")
            .field("device", self.monitor.device())
            .finish()
    }
}

impl Drop for MonitorLease {
    fn drop(&mut self) {
        if !self.released {
            warn!(device = %self.monitor.device(), "Monitor lease dropped without release");
        }
    }
}

impl MonitorRegistry {
    pub fn new(feed: Arc<dyn EventFeed>, config: MonitorConfig) -> Self {
        MonitorRegistry {
            feed,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lease the device's monitor, creating and starting it on first use.
    pub async fn acquire(&self, device: &DeviceId) -> Result<MonitorLease, MonitorError> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(device) {
            entry.leases += 1;
            debug!(%device, leases = entry.leases, "Reusing connectivity monitor");
            return Ok(MonitorLease {
                monitor: entry.monitor.clone(),
                released: false,
            });
        }

        let monitor = Arc::new(Monitor::with_config(
            self.feed.clone(),
            device.clone(),
            self.config.clone(),
        ));
        monitor.start().await?;

        entries.insert(
            device.clone(),
            Entry {
                monitor: monitor.clone(),
                leases: 1,
            },
        );
        info!(%device, "Created connectivity monitor");

        Ok(MonitorLease {
            monitor,
            released: false,
        })
    }

    /// Give a lease back, stopping the monitor when it was the last one.
    pub async fn release(&self, mut lease: MonitorLease) {
        lease.released = true;
        let device = lease.device().clone();
        let mut entries = self.entries.lock().await;

        let last = match entries.get_mut(&device) {
            Some(entry) if Arc::ptr_eq(&entry.monitor, &lease.monitor) => {
                entry.leases -= 1;
                entry.leases == 0
            }
            _ => {
                warn!(%device, "Released a lease the registry does not own");
                return;
            }
        };

        if last {
            if let Some(entry) = entries.remove(&device) {
                entry.monitor.stop().await;
                info!(%device, "Released last lease, monitor stopped");
            }
        }
    }

    pub async fn lease_count(&self, device: &DeviceId) -> usize {
        self.entries
            .lock()
            .await
            .get(device)
            .map_or(0, |entry| entry.leases)
    }

    pub async fn active_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.entries.lock().await.keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Stop every monitor regardless of outstanding leases.
    pub async fn shutdown(&self) {
        let drained: Vec<Entry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
        for entry in drained {
            if entry.leases > 0 {
                warn!(device = %entry.monitor.device(), leases = entry.leases, "Stopping monitor with outstanding leases");
            }
            entry.monitor.stop().await;
        }
    }
}
