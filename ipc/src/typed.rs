//! Typed messages with a fixed message type.
//!
//! Subsystems declare their messages as serde structs implementing
//! [`TypedMessage`] and never touch payload bytes directly.

use core_types::RoutingId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageType, Priority, IPC_NAMESPACE};

pub trait TypedMessage: Serialize + DeserializeOwned {
    const TYPE: MessageType;

    /// Builds a message routed to `routing_id`
    fn to_message(&self, routing_id: RoutingId) -> Result<Message, serde_json::Error> {
        Message::new(routing_id, Self::TYPE, Priority::Normal).with_payload(self)
    }

    /// Builds a control message
    fn to_control(&self) -> Result<Message, serde_json::Error> {
        self.to_message(RoutingId::CONTROL)
    }

    fn matches(message: &Message) -> bool {
        message.message_type() == Self::TYPE
    }

    fn read(message: &Message) -> Result<Self, serde_json::Error> {
        message.read_payload()
    }
}

/// First message on every channel, carrying the sender's pid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub pid: i32,
}

impl TypedMessage for Hello {
    const TYPE: MessageType = MessageType::new(IPC_NAMESPACE, 1);
}

impl Hello {
    pub(crate) fn current() -> Self {
        Self {
            pid: std::process::id() as i32,
        }
    }

    pub(crate) fn is_hello(message: &Message) -> bool {
        message.routing_id() == RoutingId::NONE && Self::matches(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl TypedMessage for Ping {
        const TYPE: MessageType = MessageType::new(1, 1);
    }

    #[test]
    fn test_typed_round_trip() {
        let message = Ping { seq: 3 }.to_message(RoutingId::new(5)).unwrap();
        assert!(Ping::matches(&message));
        assert_eq!(message.routing_id(), RoutingId::new(5));
        assert_eq!(Ping::read(&message).unwrap(), Ping { seq: 3 });
    }

    #[test]
    fn test_hello_requires_routing_none() {
        let hello = Hello::current().to_message(RoutingId::NONE).unwrap();
        assert!(Hello::is_hello(&hello));

        let routed = Hello::current().to_control().unwrap();
        assert!(!Hello::is_hello(&routed));
    }
}
