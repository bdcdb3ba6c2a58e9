//! Dispatch of decoded messages to registered handlers
//!
//! Handlers are keyed by [`MessageType`] and run in registration order. A
//! handler that fails, by error or by panic, is logged and skipped; the
//! remaining handlers for that message still run. Registration may happen
//! from any thread, including from inside a handler.

use crate::message::{MessageType, NetworkMessage};
use log::{debug, error, info, trace};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&NetworkMessage, i32) -> HandlerResult + Send + Sync>;

/// Token returned by [`MessageRouter::register`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<HashMap<MessageType, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, message_type: MessageType, handler: F) -> HandlerId
    where
        F: Fn(&NetworkMessage, i32) -> HandlerResult + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(message_type)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("Handler registered for {:?}", message_type);
        id
    }

    /// Removes a handler; returns false if it was not registered
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(handler_id, _)| *handler_id == id) {
                list.remove(pos);
                debug!("Handler {:?} unregistered", id);
                return true;
            }
        }
        false
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
        info!("All message handlers cleared");
    }

    pub fn handler_count(&self, message_type: MessageType) -> usize {
        self.handlers
            .read()
            .get(&message_type)
            .map_or(0, |list| list.len())
    }

    /// Runs every handler registered for the message's type; returns how many succeeded
    pub fn route_message(&self, message: &NetworkMessage, sender_id: i32) -> usize {
        let message_type = message.message_type();

        // Snapshot so handlers can register or unregister without deadlocking
        let handlers: Vec<Handler> = match self.handlers.read().get(&message_type) {
            Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => {
                trace!("No handlers for {:?}", message_type);
                return 0;
            }
        };

        let mut succeeded = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(message, sender_id))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => error!(
                    "Handler for {:?} from {} failed: {}",
                    message_type, sender_id, e
                ),
                Err(_) => error!(
                    "Handler for {:?} from {} panicked",
                    message_type, sender_id
                ),
            }
        }
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PlayerLeftMessage, PlayerStateMessage};
    use parking_lot::Mutex;

    fn left(id: i32) -> NetworkMessage {
        NetworkMessage::new(PlayerLeftMessage { player_id: id })
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let router = MessageRouter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            router.register(MessageType::PlayerLeft, move |_, sender| {
                calls.lock().push((tag, sender));
                Ok(())
            });
        }

        assert_eq!(router.route_message(&left(1), 4), 3);
        assert_eq!(
            *calls.lock(),
            vec![("first", 4), ("second", 4), ("third", 4)]
        );
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let router = MessageRouter::new();
        let reached = Arc::new(Mutex::new(0));

        router.register(MessageType::PlayerLeft, |_, _| Err("boom".into()));
        router.register(MessageType::PlayerLeft, |_, _| panic!("handler bug"));
        let counter = Arc::clone(&reached);
        router.register(MessageType::PlayerLeft, move |_, _| {
            *counter.lock() += 1;
            Ok(())
        });

        assert_eq!(router.route_message(&left(1), 0), 1);
        assert_eq!(*reached.lock(), 1);
    }

    #[test]
    fn test_only_matching_type_is_dispatched() {
        let router = MessageRouter::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        router.register(MessageType::PlayerState, move |_, _| {
            *counter.lock() += 1;
            Ok(())
        });

        router.route_message(&left(1), 0);
        assert_eq!(*hits.lock(), 0);
        router.route_message(&NetworkMessage::new(PlayerStateMessage::default()), 0);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_unregister_and_clear() {
        let router = MessageRouter::new();
        let a = router.register(MessageType::PlayerLeft, |_, _| Ok(()));
        router.register(MessageType::PlayerLeft, |_, _| Ok(()));
        router.register(MessageType::Fire, |_, _| Ok(()));

        assert!(router.unregister(a));
        assert!(!router.unregister(a));
        assert_eq!(router.handler_count(MessageType::PlayerLeft), 1);

        router.clear();
        assert_eq!(router.handler_count(MessageType::PlayerLeft), 0);
        assert_eq!(router.handler_count(MessageType::Fire), 0);
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let router = Arc::new(MessageRouter::new());
        let inner = Arc::clone(&router);
        router.register(MessageType::PlayerLeft, move |_, _| {
            inner.register(MessageType::Fire, |_, _| Ok(()));
            Ok(())
        });

        router.route_message(&left(2), 0);
        assert_eq!(router.handler_count(MessageType::Fire), 1);
    }
}
