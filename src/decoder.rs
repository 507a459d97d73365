//! Incremental decoding of the newline-delimited JSON event stream.
//!
//! The subprocess pipe delivers text in arbitrary chunks: a chunk may hold
//! several records, the tail of one record and the head of the next, or a
//! fragment in the middle of a record. [`StreamDecoder`] splits each chunk
//! on newlines and appends every non-empty piece to a persistent buffer,
//! attempting a parse after each append. A successful parse empties the
//! buffer; a failed one leaves it for the next chunk to complete.
//!
//! Incomplete and permanently malformed text look identical to the parser,
//! so the buffer is capped at `max_buffer_bytes` and discarded beyond that.
//!
//! [`Utf8Assembler`] sits in front of the decoder and turns raw pipe reads
//! into text without splitting multi-byte characters across reads.

use serde_json::Value;

use crate::bus::EventRecord;
use crate::constants::DEFAULT_MAX_BUFFER_BYTES;

/// Reassembles discrete records from a chunked text stream.
#[derive(Debug)]
pub struct StreamDecoder {
    /// Text of a document that has not parsed yet.
    buffer: String,
    /// Buffer size beyond which pending text is dropped.
    max_buffer_bytes: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_BYTES)
    }
}

impl StreamDecoder {
    /// Create a decoder with an empty buffer.
    #[must_use]
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer_bytes,
        }
    }

    /// Feed one chunk, calling `on_record` for every record it completes.
    ///
    /// Records are handed over in stream order. Returns how many were
    /// decoded from this chunk.
    pub fn feed<F>(&mut self, chunk: &str, mut on_record: F) -> usize
    where
        F: FnMut(EventRecord),
    {
        if chunk.is_empty() {
            return 0;
        }

        let mut decoded = 0;
        for piece in chunk.split('\n') {
            if piece.is_empty() {
                continue;
            }
            self.buffer.push_str(piece);
            if let Some(record) = self.try_decode() {
                on_record(record);
                decoded += 1;
            }
        }
        decoded
    }

    /// Text currently held while waiting for a document to complete.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Check if no partial document is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any pending partial document.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn try_decode(&mut self) -> Option<EventRecord> {
        match serde_json::from_str::<Value>(&self.buffer) {
            Ok(value) => {
                let text = std::mem::take(&mut self.buffer);
                let record = EventRecord::from_value(value);
                if record.is_none() {
                    log::warn!("Dropping event without a string Action field: {}", text);
                }
                record
            }
            Err(e) => {
                log::debug!(
                    "JSON not complete yet ({} bytes buffered): {}",
                    self.buffer.len(),
                    e
                );
                if self.buffer.len() > self.max_buffer_bytes {
                    log::warn!(
                        "Discarding {} bytes of undecodable event stream (limit {})",
                        self.buffer.len(),
                        self.max_buffer_bytes
                    );
                    self.buffer.clear();
                }
                None
            }
        }
    }
}

/// Converts raw pipe reads into UTF-8 text.
///
/// A multi-byte character split across two reads is held back until the
/// rest arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    /// Incomplete trailing character from the previous read.
    pending: Vec<u8>,
}

impl Utf8Assembler {
    /// Create an assembler with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return all text that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Bytes held back waiting for the rest of a character.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush bytes that will never be completed, lossily.
    ///
    /// Called at end of stream; returns an empty string if nothing is held.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
