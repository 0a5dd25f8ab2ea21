use std::time::Instant;

use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    Start(String),
    Progress(String),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Progress,
    Complete,
}

impl ImportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ImportEvent::Start(_) => EventKind::Start,
            ImportEvent::Progress(_) => EventKind::Progress,
            ImportEvent::Complete => EventKind::Complete,
        }
    }
}

/// Fire-and-forget lifecycle channel shared by the builder and adapter.
///
/// Emitting with no subscribers is not an error; events are simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: ImportEvent) {
        debug!(?event, "import event");
        let _ = self.tx.send(event);
    }

    pub fn start(&self, message: impl Into<String>) {
        self.emit(ImportEvent::Start(message.into()));
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.emit(ImportEvent::Progress(message.into()));
    }

    pub fn complete(&self) {
        self.emit(ImportEvent::Complete);
    }

    /// Subscribe to the given kinds. Dropping the subscription unsubscribes.
    pub fn on(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: kinds.to_vec(),
        }
    }

    #[cfg(test)]
    pub fn on_all(&self) -> Subscription {
        self.on(&[EventKind::Start, EventKind::Progress, EventKind::Complete])
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ImportEvent>,
    kinds: Vec<EventKind>,
}

impl Subscription {
    /// Next matching event, or `None` once every emitter is gone.
    /// Events lost to a lagging receiver are skipped.
    pub async fn recv(&mut self) -> Option<ImportEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.kinds.contains(&event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain whatever is already queued without waiting.
    #[cfg(test)]
    pub fn drain(&mut self) -> Vec<ImportEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.kinds.contains(&event.kind()) => events.push(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Seconds elapsed since `start`, for progress messages.
pub fn duration_secs(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.start("nobody listening");
        bus.complete();
    }

    #[test]
    fn subscription_filters_by_kind() {
        let bus = EventBus::new();
        let mut starts = bus.on(&[EventKind::Start]);
        let mut all = bus.on_all();

        bus.start("fetching");
        bus.progress("halfway");
        bus.complete();

        assert_eq!(starts.drain(), vec![ImportEvent::Start("fetching".into())]);
        assert_eq!(all.drain().len(), 3);
    }

    #[tokio::test]
    async fn recv_ends_when_bus_dropped() {
        let bus = EventBus::new();
        let mut sub = bus.on(&[EventKind::Complete]);
        bus.progress("ignored");
        bus.complete();
        drop(bus);
        assert_eq!(sub.recv().await, Some(ImportEvent::Complete));
        assert_eq!(sub.recv().await, None);
    }
}
