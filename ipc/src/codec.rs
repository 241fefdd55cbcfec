//! Wire framing
//!
//! Every frame is a 24-byte little-endian header followed by the payload:
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 4    | payload size |
//! | 4      | 4    | routing id   |
//! | 8      | 4    | message type |
//! | 12     | 4    | flags        |
//! | 16     | 4    | request id   |
//! | 20     | 2    | handle count |
//! | 22     | 2    | reserved     |
//!
//! Handles travel out of band and are matched to frames in arrival order.

use core_types::RoutingId;
use std::collections::VecDeque;

use crate::config::IpcConfig;
use crate::error::FrameError;
use crate::handle::TransferableHandle;
use crate::message::{Message, MessageType};

pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    payload_size: u32,
    routing_id: i32,
    message_type: u32,
    flags: u32,
    request_id: u32,
    num_handles: u16,
}

impl Header {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.payload_size.to_le_bytes());
        out.extend_from_slice(&self.routing_id.to_le_bytes());
        out.extend_from_slice(&self.message_type.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.num_handles.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    fn parse(bytes: &[u8]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Self {
            payload_size: u32_at(0),
            routing_id: u32_at(4) as i32,
            message_type: u32_at(8),
            flags: u32_at(12),
            request_id: u32_at(16),
            num_handles: u16::from_le_bytes([bytes[20], bytes[21]]),
        }
    }
}

/// An encoded message waiting to be written
#[derive(Debug)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub handles: Vec<TransferableHandle>,
}

/// Encodes a message, taking ownership of its handles
pub fn encode(mut message: Message, config: &IpcConfig) -> Result<Frame, FrameError> {
    let size = HEADER_SIZE + message.payload().len();
    if size > config.max_message_size {
        return Err(FrameError::TooLarge {
            size,
            limit: config.max_message_size,
        });
    }

    let handles = message.take_handles();
    if handles.len() > config.max_descriptors_per_message {
        return Err(FrameError::TooManyHandles {
            count: handles.len(),
            limit: config.max_descriptors_per_message,
        });
    }

    let header = Header {
        payload_size: message.payload().len() as u32,
        routing_id: message.routing_id().as_raw(),
        message_type: message.message_type().as_raw(),
        flags: message.flags(),
        request_id: message.request_id(),
        num_handles: handles.len() as u16,
    };

    let mut bytes = Vec::with_capacity(size);
    header.write_to(&mut bytes);
    bytes.extend_from_slice(message.payload());

    Ok(Frame { bytes, handles })
}

/// Reassembles frames from a byte stream plus out-of-band handles
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    consumed: usize,
    handles: VecDeque<TransferableHandle>,
    max_message_size: usize,
    max_handles: usize,
}

impl FrameReader {
    pub fn new(config: &IpcConfig) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            handles: VecDeque::new(),
            max_message_size: config.max_message_size,
            max_handles: config.max_descriptors_per_message,
        }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if self.consumed > 0 {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    pub fn push_handles(&mut self, handles: impl IntoIterator<Item = TransferableHandle>) {
        self.handles.extend(handles);
    }

    /// Bytes received but not yet part of a complete frame
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    pub fn pending_handles(&self) -> usize {
        self.handles.len()
    }

    /// Returns the next complete message, if one is buffered
    ///
    /// Errors are fatal for the stream; the caller closes the channel, which
    /// drops (and so closes) every handle still queued here.
    pub fn next_message(&mut self) -> Result<Option<Message>, FrameError> {
        let available = &self.buffer[self.consumed..];
        if available.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::parse(&available[..HEADER_SIZE]);
        let size = HEADER_SIZE + header.payload_size as usize;
        if size > self.max_message_size {
            return Err(FrameError::TooLarge {
                size,
                limit: self.max_message_size,
            });
        }

        let num_handles = header.num_handles as usize;
        if num_handles > self.max_handles {
            return Err(FrameError::TooManyHandles {
                count: num_handles,
                limit: self.max_handles,
            });
        }

        if available.len() < size {
            return Ok(None);
        }

        // Handles arrive with the first byte of their frame, so a complete
        // frame without its handles means they were lost.
        if self.handles.len() < num_handles {
            return Err(FrameError::MissingHandles {
                expected: num_handles,
                available: self.handles.len(),
            });
        }

        let payload = available[HEADER_SIZE..size].to_vec();
        self.consumed += size;
        let handles: Vec<TransferableHandle> = self.handles.drain(..num_handles).collect();

        Ok(Some(Message::from_wire(
            RoutingId::new(header.routing_id),
            MessageType::from_raw(header.message_type),
            header.flags,
            header.request_id,
            payload,
            handles,
        )))
    }

    /// Fails if handles are queued with no bytes left to claim them
    pub fn check_stray_handles(&self) -> Result<(), FrameError> {
        if self.pending_bytes() == 0 && !self.handles.is_empty() {
            return Err(FrameError::StrayHandles {
                count: self.handles.len(),
            });
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Priority;

    const TEST_TYPE: MessageType = MessageType::new(3, 9);

    fn message_with_payload(bytes: &[u8]) -> Message {
        let mut message = Message::new(RoutingId::new(12), TEST_TYPE, Priority::High);
        message.set_payload_bytes(bytes.to_vec());
        message
    }

    #[test]
    fn test_header_layout() {
        let config = IpcConfig::default();
        let frame = encode(message_with_payload(b"abc"), &config).unwrap();

        assert_eq!(frame.bytes.len(), HEADER_SIZE + 3);
        assert_eq!(&frame.bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&frame.bytes[4..8], &12i32.to_le_bytes());
        assert_eq!(&frame.bytes[8..12], &TEST_TYPE.as_raw().to_le_bytes());
        assert_eq!(&frame.bytes[HEADER_SIZE..], b"abc");
    }

    #[test]
    fn test_reassembles_byte_by_byte() {
        let config = IpcConfig::default();
        let mut stream = Vec::new();
        stream.extend(encode(message_with_payload(b"first"), &config).unwrap().bytes);
        stream.extend(encode(message_with_payload(b"second"), &config).unwrap().bytes);

        let mut reader = FrameReader::new(&config);
        let mut received = Vec::new();
        for byte in stream {
            reader.push_bytes(&[byte]);
            while let Some(message) = reader.next_message().unwrap() {
                received.push(message);
            }
        }

        assert_eq!(received.len(), 2);
        assert_eq!(received[0].payload(), b"first");
        assert_eq!(received[1].payload(), b"second");
        assert_eq!(received[1].priority(), Priority::High);
        assert_eq!(received[1].routing_id(), RoutingId::new(12));
        assert_eq!(reader.pending_bytes(), 0);
    }

    #[test]
    fn test_oversized_message_rejected_on_encode() {
        let config = IpcConfig {
            max_message_size: HEADER_SIZE + 4,
            ..IpcConfig::default()
        };
        let result = encode(message_with_payload(b"too long"), &config);
        assert_eq!(
            result.unwrap_err(),
            FrameError::TooLarge {
                size: HEADER_SIZE + 8,
                limit: HEADER_SIZE + 4
            }
        );
    }

    #[test]
    fn test_oversized_header_rejected_before_payload_arrives() {
        let sender = IpcConfig::default();
        let receiver = IpcConfig {
            max_message_size: HEADER_SIZE + 4,
            ..IpcConfig::default()
        };
        let frame = encode(message_with_payload(b"0123456789"), &sender).unwrap();

        let mut reader = FrameReader::new(&receiver);
        reader.push_bytes(&frame.bytes[..HEADER_SIZE]);
        assert!(matches!(
            reader.next_message(),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_too_many_handles_rejected() {
        let config = IpcConfig {
            max_descriptors_per_message: 1,
            ..IpcConfig::default()
        };
        let message = message_with_payload(b"")
            .with_handle(TransferableHandle::from(tempfile::tempfile().unwrap()))
            .with_handle(TransferableHandle::from(tempfile::tempfile().unwrap()));

        assert_eq!(
            encode(message, &config).unwrap_err(),
            FrameError::TooManyHandles { count: 2, limit: 1 }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_handles_matched_in_order() {
        let config = IpcConfig::default();
        let with_handle = message_with_payload(b"h")
            .with_handle(TransferableHandle::from(tempfile::tempfile().unwrap()));
        let first = encode(with_handle, &config).unwrap();
        let second = encode(message_with_payload(b"plain"), &config).unwrap();

        let mut reader = FrameReader::new(&config);
        reader.push_handles(first.handles);
        reader.push_bytes(&first.bytes);
        reader.push_bytes(&second.bytes);

        let one = reader.next_message().unwrap().unwrap();
        let two = reader.next_message().unwrap().unwrap();
        assert_eq!(one.handles().len(), 1);
        assert!(two.handles().is_empty());
        assert!(reader.check_stray_handles().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_handles_is_error() {
        let config = IpcConfig::default();
        let message = message_with_payload(b"h")
            .with_handle(TransferableHandle::from(tempfile::tempfile().unwrap()));
        let frame = encode(message, &config).unwrap();

        let mut reader = FrameReader::new(&config);
        reader.push_bytes(&frame.bytes);
        assert_eq!(
            reader.next_message().unwrap_err(),
            FrameError::MissingHandles {
                expected: 1,
                available: 0
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_stray_handles_detected() {
        let config = IpcConfig::default();
        let mut reader = FrameReader::new(&config);
        reader.push_handles([TransferableHandle::from(tempfile::tempfile().unwrap())]);
        assert_eq!(
            reader.check_stray_handles(),
            Err(FrameError::StrayHandles { count: 1 })
        );
    }
}
