//! Messages understood by the `ipc_child` stub
//!
//! Hosts and tests use them to drive a real child process.

use ipc::{MessageType, TypedMessage};
use serde::{Deserialize, Serialize};

/// Namespace of `ipc_child` traffic
pub const CHILD_NAMESPACE: u16 = 0x0100;

const fn child_type(id: u16) -> MessageType {
    MessageType::new(CHILD_NAMESPACE, id)
}

/// Sent back unchanged; a sync echo is answered with a reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

impl TypedMessage for Echo {
    const TYPE: MessageType = child_type(1);
}

/// Child aborts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crash {}

impl TypedMessage for Crash {
    const TYPE: MessageType = child_type(2);
}

/// Child exits with `code`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub code: i32,
}

impl TypedMessage for Exit {
    const TYPE: MessageType = child_type(3);
}

/// Child sends `count` [`BurstItem`]s
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burst {
    pub count: u32,
}

impl TypedMessage for Burst {
    const TYPE: MessageType = child_type(4);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstItem {
    pub seq: u32,
}

impl TypedMessage for BurstItem {
    const TYPE: MessageType = child_type(5);
}

/// Child asks the host for permission to exit (or exits, if never told
/// to ask first)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestShutdown {}

impl TypedMessage for RequestShutdown {
    const TYPE: MessageType = child_type(6);
}

/// Child sends a shutdown request whose payload does not parse
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMalformed {}

impl TypedMessage for SendMalformed {
    const TYPE: MessageType = child_type(7);
}
