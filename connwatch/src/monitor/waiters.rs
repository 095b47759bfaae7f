use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::state::Transition;
use crate::error::MonitorError;
use crate::messages::ConnectionKind;

pub(crate) type WaitOutcome = Result<Transition, MonitorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(u64);

struct Waiter {
    kind: ConnectionKind,
    /// Only transitions with a higher seq satisfy this waiter.
    after: u64,
    deadline: Instant,
    tx: oneshot::Sender<WaitOutcome>,
}

#[derive(Default)]
pub(crate) struct WaiterRegistry {
    next_id: u64,
    waiters: HashMap<WaiterId, Waiter>,
}

impl WaiterRegistry {
    pub(crate) fn register(
        &mut self,
        kind: ConnectionKind,
        after: u64,
        deadline: Instant,
    ) -> (WaiterId, oneshot::Receiver<WaitOutcome>) {
        let id = WaiterId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            id,
            Waiter {
                kind,
                after,
                deadline,
                tx,
            },
        );
        (id, rx)
    }

    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Hand `transition` to every waiter it satisfies. Waiters whose deadline
    /// has passed are left in place to report their own timeout.
    pub(crate) fn wake(&mut self, transition: &Transition, now: Instant) -> usize {
        let matching: Vec<WaiterId> = self
            .waiters
            .iter()
            .filter(|(_, w)| {
                w.kind == transition.kind && transition.seq > w.after && w.deadline > now
            })
            .map(|(id, _)| *id)
            .collect();

        let mut woken = 0;
        for id in matching {
            if let Some(waiter) = self.waiters.remove(&id) {
                if waiter.tx.send(Ok(transition.clone())).is_ok() {
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Release every waiter with `err`.
    pub(crate) fn fail_all(&mut self, err: &MonitorError) -> usize {
        let released = self.waiters.len();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.tx.send(Err(err.clone()));
        }
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::DeviceId;

    fn transition(seq: u64, kind: ConnectionKind) -> Transition {
        Transition {
            seq,
            kind,
            observed_at_ms: seq * 100,
            reason: None,
        }
    }

    #[test]
    fn test_wake_is_broadcast_per_kind() {
        let mut registry = WaiterRegistry::default();
        let deadline = Instant::now() + Duration::from_secs(30);

        let (_, mut d1) = registry.register(ConnectionKind::Disconnected, 0, deadline);
        let (_, mut d2) = registry.register(ConnectionKind::Disconnected, 0, deadline);
        let (_, mut c1) = registry.register(ConnectionKind::Connected, 0, deadline);

        let woken = registry.wake(&transition(1, ConnectionKind::Disconnected), Instant::now());
        assert_eq!(woken, 2);
        assert_eq!(d1.try_recv().unwrap().unwrap().seq, 1);
        assert_eq!(d2.try_recv().unwrap().unwrap().seq, 1);
        assert!(c1.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wake_skips_older_transitions() {
        let mut registry = WaiterRegistry::default();
        let deadline = Instant::now() + Duration::from_secs(30);

        let (_, mut rx) = registry.register(ConnectionKind::Connected, 5, deadline);
        assert_eq!(registry.wake(&transition(5, ConnectionKind::Connected), Instant::now()), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.wake(&transition(6, ConnectionKind::Connected), Instant::now()), 1);
    }

    #[test]
    fn test_expired_waiter_left_for_timeout() {
        let mut registry = WaiterRegistry::default();
        let now = Instant::now();

        let (_, mut rx) = registry.register(ConnectionKind::Connected, 0, now);
        assert_eq!(registry.wake(&transition(1, ConnectionKind::Connected), now), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_waiter_not_woken() {
        let mut registry = WaiterRegistry::default();
        let deadline = Instant::now() + Duration::from_secs(30);

        let (id, _rx) = registry.register(ConnectionKind::Connected, 0, deadline);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.wake(&transition(1, ConnectionKind::Connected), Instant::now()), 0);
    }

    #[test]
    fn test_fail_all_releases_everyone() {
        let mut registry = WaiterRegistry::default();
        let deadline = Instant::now() + Duration::from_secs(30);
        let (_, mut a) = registry.register(ConnectionKind::Connected, 0, deadline);
        let (_, mut b) = registry.register(ConnectionKind::Disconnected, 0, deadline);

        let err = MonitorError::MonitorStopped {
            device: DeviceId::new("dev-1").unwrap(),
        };
        assert_eq!(registry.fail_all(&err), 2);
        assert_eq!(a.try_recv().unwrap(), Err(err.clone()));
        assert_eq!(b.try_recv().unwrap(), Err(err));
        assert_eq!(registry.len(), 0);
    }
}
