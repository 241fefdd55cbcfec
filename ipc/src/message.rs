//! Message types and header flags

use core_types::RoutingId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::handle::TransferableHandle;

pub(crate) const PRIORITY_MASK: u32 = 0x3;
pub(crate) const SYNC_BIT: u32 = 0x4;
pub(crate) const REPLY_BIT: u32 = 0x8;
pub(crate) const REPLY_ERROR_BIT: u32 = 0x10;

/// Namespace reserved for channel-internal messages
pub const IPC_NAMESPACE: u16 = 0xFFFF;

/// Message type: a 16-bit namespace and a 16-bit id within it
///
/// Each subsystem owns a namespace, so ids never collide across subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageType(u32);

impl MessageType {
    pub const fn new(namespace: u16, id: u16) -> Self {
        Self(((namespace as u32) << 16) | id as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u32 {
        self.0
    }

    pub const fn namespace(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn id(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.namespace(), self.id())
    }
}

/// Scheduling hint; delivery within a channel stays FIFO regardless
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    fn bits(self) -> u32 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & PRIORITY_MASK {
            1 => Priority::Low,
            3 => Priority::High,
            _ => Priority::Normal,
        }
    }
}

/// One unit of IPC traffic
///
/// The payload is opaque to the channel; subsystems usually fill it with
/// [`Message::write_payload`]. Handles ride out of band and are closed when
/// the message is dropped without being sent.
#[derive(Debug)]
pub struct Message {
    routing_id: RoutingId,
    message_type: MessageType,
    flags: u32,
    request_id: u32,
    payload: Vec<u8>,
    handles: Vec<TransferableHandle>,
}

impl Message {
    pub fn new(routing_id: RoutingId, message_type: MessageType, priority: Priority) -> Self {
        Self {
            routing_id,
            message_type,
            flags: priority.bits(),
            request_id: 0,
            payload: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// A normal-priority message addressed to the channel endpoint itself
    pub fn control(message_type: MessageType) -> Self {
        Self::new(RoutingId::CONTROL, message_type, Priority::Normal)
    }

    pub(crate) fn from_wire(
        routing_id: RoutingId,
        message_type: MessageType,
        flags: u32,
        request_id: u32,
        payload: Vec<u8>,
        handles: Vec<TransferableHandle>,
    ) -> Self {
        Self {
            routing_id,
            message_type,
            flags,
            request_id,
            payload,
            handles,
        }
    }

    /// Serializes `value` as the payload
    pub fn with_payload<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.write_payload(value)?;
        Ok(self)
    }

    pub fn write_payload<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.payload = serde_json::to_vec(value)?;
        Ok(())
    }

    pub fn read_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn set_payload_bytes(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn with_handle(mut self, handle: TransferableHandle) -> Self {
        self.handles.push(handle);
        self
    }

    pub fn add_handle(&mut self, handle: TransferableHandle) {
        self.handles.push(handle);
    }

    pub fn handles(&self) -> &[TransferableHandle] {
        &self.handles
    }

    pub fn take_handles(&mut self) -> Vec<TransferableHandle> {
        std::mem::take(&mut self.handles)
    }

    pub fn routing_id(&self) -> RoutingId {
        self.routing_id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn priority(&self) -> Priority {
        Priority::from_bits(self.flags)
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn is_control(&self) -> bool {
        self.routing_id.is_control()
    }

    pub fn is_sync(&self) -> bool {
        self.flags & SYNC_BIT != 0
    }

    pub fn is_reply(&self) -> bool {
        self.flags & REPLY_BIT != 0
    }

    pub fn is_reply_error(&self) -> bool {
        self.flags & REPLY_ERROR_BIT != 0
    }

    pub(crate) fn mark_sync(&mut self, request_id: u32) {
        self.flags |= SYNC_BIT;
        self.request_id = request_id;
    }

    /// Everything needed to answer this message later, possibly from another thread
    pub fn reply_token(&self) -> ReplyToken {
        ReplyToken {
            routing_id: self.routing_id,
            message_type: self.message_type,
            request_id: self.request_id,
        }
    }

    /// Empty reply to this message
    pub fn reply(&self) -> Message {
        self.reply_token().reply()
    }

    /// Reply telling the sender its request could not be handled
    pub fn reply_error(&self) -> Message {
        self.reply_token().reply_error()
    }
}

/// Correlates a deferred reply with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyToken {
    routing_id: RoutingId,
    message_type: MessageType,
    request_id: u32,
}

impl ReplyToken {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn reply(&self) -> Message {
        let mut reply = Message::new(self.routing_id, self.message_type, Priority::Normal);
        reply.flags |= REPLY_BIT;
        reply.request_id = self.request_id;
        reply
    }

    pub fn reply_error(&self) -> Message {
        let mut reply = self.reply();
        reply.flags |= REPLY_ERROR_BIT;
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestPayload {
        value: i32,
    }

    const TEST_TYPE: MessageType = MessageType::new(7, 42);

    #[test]
    fn test_message_type_parts() {
        assert_eq!(TEST_TYPE.namespace(), 7);
        assert_eq!(TEST_TYPE.id(), 42);
        assert_eq!(MessageType::from_raw(TEST_TYPE.as_raw()), TEST_TYPE);
        assert_eq!(TEST_TYPE.to_string(), "0007:002a");
    }

    #[test]
    fn test_priority_survives_flags() {
        for priority in [Priority::Low, Priority::Normal, Priority::High] {
            let message = Message::new(RoutingId::new(3), TEST_TYPE, priority);
            assert_eq!(message.priority(), priority);
            assert!(!message.is_sync());
            assert!(!message.is_reply());
        }
    }

    #[test]
    fn test_payload_serialization() {
        let message = Message::control(TEST_TYPE)
            .with_payload(&TestPayload { value: 42 })
            .unwrap();

        assert!(message.is_control());
        let payload: TestPayload = message.read_payload().unwrap();
        assert_eq!(payload, TestPayload { value: 42 });
    }

    #[test]
    fn test_bad_payload_is_error() {
        let mut message = Message::control(TEST_TYPE);
        message.set_payload_bytes(b"not json".to_vec());
        assert!(message.read_payload::<TestPayload>().is_err());
    }

    #[test]
    fn test_reply_correlates_with_request() {
        let mut request = Message::new(RoutingId::new(9), TEST_TYPE, Priority::High);
        request.mark_sync(77);
        assert!(request.is_sync());

        let reply = request.reply();
        assert!(reply.is_reply());
        assert!(!reply.is_reply_error());
        assert!(!reply.is_sync());
        assert_eq!(reply.request_id(), 77);
        assert_eq!(reply.routing_id(), RoutingId::new(9));
        assert_eq!(reply.message_type(), TEST_TYPE);

        let error = request.reply_error();
        assert!(error.is_reply());
        assert!(error.is_reply_error());
        assert_eq!(error.request_id(), 77);
    }

    #[test]
    fn test_reply_token_is_send() {
        let mut request = Message::control(TEST_TYPE);
        request.mark_sync(5);
        let token = request.reply_token();

        let reply = std::thread::spawn(move || token.reply()).join().unwrap();
        assert_eq!(reply.request_id(), 5);
    }
}
