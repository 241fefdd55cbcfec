//! Control messages exchanged between a host and its child
//!
//! All of them travel with `RoutingId::CONTROL`.

use ipc::{MessageType, TypedMessage};
use serde::{Deserialize, Serialize};

/// Namespace of host/child control traffic
pub const CONTROL_NAMESPACE: u16 = 0x0001;

const fn control_type(id: u16) -> MessageType {
    MessageType::new(CONTROL_NAMESPACE, id)
}

/// Child asks to be allowed to exit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest {}

impl TypedMessage for ShutdownRequest {
    const TYPE: MessageType = control_type(1);
}

/// Host tells the child to exit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {}

impl TypedMessage for Shutdown {
    const TYPE: MessageType = control_type(2);
}

/// Child must send [`ShutdownRequest`] instead of exiting on its own
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskBeforeShutdown {}

impl TypedMessage for AskBeforeShutdown {
    const TYPE: MessageType = control_type(3);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetIpcLoggingEnabled {
    pub enabled: bool,
}

impl TypedMessage for SetIpcLoggingEnabled {
    const TYPE: MessageType = control_type(4);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginTracing {
    pub categories: String,
}

impl TypedMessage for BeginTracing {
    const TYPE: MessageType = control_type(5);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndTracing {}

impl TypedMessage for EndTracing {
    const TYPE: MessageType = control_type(6);
}

/// One fragment of trace output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDataCollected {
    pub data: String,
}

impl TypedMessage for TraceDataCollected {
    const TYPE: MessageType = control_type(7);
}

/// Last message of a trace; no fragments follow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndTracingAck {}

impl TypedMessage for EndTracingAck {
    const TYPE: MessageType = control_type(8);
}
