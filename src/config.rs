//! Server-side protocol configuration.

use std::time::Duration;

use crate::frame::{settings_id, DEFAULT_MAX_FRAME_SIZE};
use crate::hpack::DEFAULT_TABLE_SIZE;

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Initial flow-control window (RFC 9113 Section 6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Our SETTINGS_HEADER_TABLE_SIZE: bound for the peer's encoder table.
    pub header_table_size: u32,
    /// Our SETTINGS_MAX_FRAME_SIZE: largest frame payload we accept.
    pub max_frame_size: u32,
    pub initial_window_size: u32,
    /// `None` means no limit.
    pub max_concurrent_streams: Option<u32>,
    /// `None` means no limit.
    pub max_header_list_size: Option<u32>,
    pub max_header_block_size: usize,
    /// Depth of the inbound and outbound frame queues.
    pub queue_capacity: usize,
    /// Close the connection after this long without an inbound frame.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_TABLE_SIZE as u32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_concurrent_streams: Some(100),
            max_header_list_size: None,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            queue_capacity: 32,
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl ServerConfig {
    pub fn with_header_table_size(mut self, size: u32) -> Self {
        self.header_table_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_concurrent_streams(mut self, limit: Option<u32>) -> Self {
        self.max_concurrent_streams = limit;
        self
    }

    pub fn with_max_header_list_size(mut self, limit: Option<u32>) -> Self {
        self.max_header_list_size = limit;
        self
    }

    pub fn with_max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Entries of the SETTINGS frame this server opens the connection with.
    /// Unlimited options are left out.
    pub fn local_settings(&self) -> Vec<(u16, u32)> {
        let mut settings = vec![
            (settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            (settings_id::ENABLE_PUSH, 0),
        ];
        if let Some(limit) = self.max_concurrent_streams {
            settings.push((settings_id::MAX_CONCURRENT_STREAMS, limit));
        }
        settings.push((settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size));
        settings.push((settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        if let Some(limit) = self.max_header_list_size {
            settings.push((settings_id::MAX_HEADER_LIST_SIZE, limit));
        }
        settings
    }
}
