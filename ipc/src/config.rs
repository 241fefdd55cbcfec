//! Channel limits and timeouts

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::codec::HEADER_SIZE;

/// Largest number of descriptors the kernel accepts in one `SCM_RIGHTS` message
pub const KERNEL_MAX_DESCRIPTORS: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_descriptors_per_message must be between 1 and {max}, got {value}")]
    DescriptorLimit { value: usize, max: usize },

    #[error("max_message_size must be between {min} and {max}, got {value}")]
    MessageSize { value: usize, min: usize, max: usize },

    #[error("read_buffer_size must be at least {min}, got {value}")]
    ReadBuffer { value: usize, min: usize },

    #[error("default_sync_timeout_ms must be non-zero")]
    SyncTimeout,
}

/// Limits applied by every channel on an I/O thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub max_descriptors_per_message: usize,
    pub max_message_size: usize,
    pub read_buffer_size: usize,
    pub default_sync_timeout_ms: u64,
}

impl IpcConfig {
    /// Checks the limits against what the transport can carry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_descriptors_per_message == 0
            || self.max_descriptors_per_message > KERNEL_MAX_DESCRIPTORS
        {
            return Err(ConfigError::DescriptorLimit {
                value: self.max_descriptors_per_message,
                max: KERNEL_MAX_DESCRIPTORS,
            });
        }

        let max_size = u32::MAX as usize;
        if self.max_message_size < HEADER_SIZE || self.max_message_size > max_size {
            return Err(ConfigError::MessageSize {
                value: self.max_message_size,
                min: HEADER_SIZE,
                max: max_size,
            });
        }

        if self.read_buffer_size < HEADER_SIZE {
            return Err(ConfigError::ReadBuffer {
                value: self.read_buffer_size,
                min: HEADER_SIZE,
            });
        }

        if self.default_sync_timeout_ms == 0 {
            return Err(ConfigError::SyncTimeout);
        }

        Ok(())
    }

    pub fn default_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.default_sync_timeout_ms)
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_descriptors_per_message: 7,
            max_message_size: 128 * 1024 * 1024,
            read_buffer_size: 4 * 1024,
            default_sync_timeout_ms: 10_000,
        }
    }
}
