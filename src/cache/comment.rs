//! Comment and log cache.
//!
//! Comments are low-rate, variable-content records, so the ring stores owned
//! [`CommentRecord`]s instead of flat arrays. System log lines share the ring
//! with a forced ANSI charset and a sentinel color, so clients that only poll
//! comments still see them.

use crate::error::{AcqError, AcqResult};
use crate::packet::MAX_COMMENT;

/// Charset discriminator for ANSI text.
pub const CHARSET_ANSI: u8 = 0;
/// Sentinel color marking a record that entered as a log line.
pub const LOG_RGBA: u32 = 0xFFFF_FFFF;

/// One cached comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentRecord {
    /// Instrument timestamp of the comment packet.
    pub timestamp: u64,
    /// Display color as packed RGBA, `LOG_RGBA` for log lines.
    pub rgba: u32,
    /// Character set discriminator.
    pub charset: u8,
    /// Comment text, truncated to `MAX_COMMENT` bytes.
    pub text: String,
}

/// Ring buffer of comment records.
#[derive(Debug)]
pub struct CommentCache {
    records: Vec<CommentRecord>,
    capacity: usize,
    write_index: usize,
    write_start_index: usize,
    read_end_index: usize,
    overflow_count: u64,
}

impl CommentCache {
    /// Allocate a ring for `capacity` comments.
    pub fn allocate(capacity: u32) -> AcqResult<Self> {
        if capacity == 0 {
            return Err(AcqError::InvalidCapacity(0));
        }
        let slots = capacity as usize + 1;
        let mut records = Vec::new();
        records
            .try_reserve_exact(slots)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        records.resize_with(slots, CommentRecord::default);
        Ok(Self {
            records,
            capacity: capacity as usize,
            write_index: 0,
            write_start_index: 0,
            read_end_index: 0,
            overflow_count: 0,
        })
    }

    /// Comments dropped so far to make room for newer ones.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Append one comment, truncating its text to `MAX_COMMENT` bytes on a
    /// character boundary.
    pub fn push(&mut self, timestamp: u64, rgba: u32, charset: u8, text: &str) {
        let slots = self.capacity + 1;
        let record = &mut self.records[self.write_index];
        record.timestamp = timestamp;
        record.rgba = rgba;
        record.charset = charset;
        record.text.clear();
        record.text.push_str(truncate_text(text));
        self.write_index = (self.write_index + 1) % slots;
        if self.write_index == self.write_start_index {
            let next = (self.write_start_index + 1) % slots;
            // Keep a lapped snapshot boundary inside the live window.
            if self.read_end_index == self.write_start_index {
                self.read_end_index = next;
            }
            self.write_start_index = next;
            self.overflow_count += 1;
        }
    }

    /// Append a log line as a comment with the sentinel color.
    pub fn push_log(&mut self, timestamp: u64, text: &str) {
        self.push(timestamp, LOG_RGBA, CHARSET_ANSI, text);
    }

    /// Latch the snapshot boundary and return the comments behind it.
    pub fn latch_read_end(&mut self) -> usize {
        self.read_end_index = self.write_index;
        self.available()
    }

    /// Comments between the read cursor and the latched boundary.
    pub fn available(&self) -> usize {
        let slots = self.capacity + 1;
        (self.read_end_index + slots - self.write_start_index) % slots
    }

    /// Copy out comments up to the latched boundary, oldest first.
    ///
    /// A consuming read moves the records out instead of cloning them, so no
    /// text allocation happens while the caller holds the cache.
    pub fn read(&mut self, consume: bool) -> Vec<CommentRecord> {
        let n = self.available();
        let slots = self.capacity + 1;
        let mut out = Vec::with_capacity(n);
        let mut idx = self.write_start_index;
        for _ in 0..n {
            let record = if consume {
                std::mem::take(&mut self.records[idx])
            } else {
                self.records[idx].clone()
            };
            out.push(record);
            idx = (idx + 1) % slots;
        }
        if consume {
            self.write_start_index = self.read_end_index;
        }
        out
    }

    /// Reset all ring indices, keeping the allocation.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.write_start_index = 0;
        self.read_end_index = 0;
    }
}

/// Clip text to `MAX_COMMENT` bytes without splitting a character.
fn truncate_text(text: &str) -> &str {
    if text.len() <= MAX_COMMENT {
        return text;
    }
    let mut end = MAX_COMMENT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
