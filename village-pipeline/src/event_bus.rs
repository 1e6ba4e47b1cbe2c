//! A small generic broadcast bus, used by every component to emit its
//! typed event enum (spec §6 "Event bus"). Errors from one subscriber
//! (a lagged receiver) never prevent another from seeing later events —
//! each subscriber owns its own queue.

use tokio::sync::broadcast;

const DEFAULT_BUFFER: usize = 256;

pub struct EventBus<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(DEFAULT_BUFFER));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Emit an event. Returns the number of active subscribers that
    /// received it; zero subscribers is not an error (spec §6: a failed
    /// subscriber is logged, never fatal, and here "no subscriber at all"
    /// is the degenerate case of that).
    pub fn emit(&self, event: T) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_with_no_subscribers_is_not_an_error() {
        let bus: EventBus<u32> = EventBus::default();
        assert_eq!(bus.emit(1), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_every_event() {
        let bus: EventBus<u32> = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(7);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
    }
}
