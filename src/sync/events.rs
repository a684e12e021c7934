use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Mutex,
};

use tracing::warn;

use crate::types::Address;

/// Lifecycle events emitted by the sync orchestrator.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    Start { addresses: Vec<Address> },
    Progress { pending: usize, done: usize, failed: usize },
    Complete,
    Error { message: String },
}

type Subscriber = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Minimal typed pub-sub. Delivery is synchronous, in subscription order;
/// a panicking subscriber is caught and logged rather than unwinding into
/// the emitter.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("event bus poisoned")
            .push(Box::new(subscriber));
    }

    pub fn emit(&self, event: &SyncEvent) {
        let subscribers = self.subscribers.lock().expect("event bus poisoned");

        for subscriber in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                warn!(?event, "event subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(vec![]));

        for i in 0..3 {
            let log = log.clone();
            bus.subscribe(move |_| log.lock().unwrap().push(i));
        }

        bus.emit(&SyncEvent::Complete);

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn survives_panicking_subscriber() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("bad subscriber"));

        let counter = delivered.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&SyncEvent::Complete);

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
