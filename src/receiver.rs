//! Inbound segment reassembly.
//!
//! The [`ReceiveBuffer`] holds everything that happens *after* a data segment
//! is accepted by the connection and *before* the stream is committed to the
//! sink:
//! - Growing on demand when a segment lands past the current end, leaving
//!   empty placeholders for the gap.
//! - Storing each payload exactly once; the first arrival for a slot wins.
//! - Writing every slot to the sink in sequence order when the peer's FIN
//!   arrives, or refusing to if any slot is still empty.
//! - Remembering how far a failed commit got, so a retried commit resumes at
//!   the first unwritten byte and no byte reaches the sink twice.
//!
//! The buffer does **not** decide about ACKs; [`crate::connection`] ACKs every
//! stored or duplicate segment regardless of what [`ReceiveBuffer::store`]
//! reports.

use std::io::{self, Write};

use crate::error::EngineError;

/// Result of offering one payload to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The slot was empty and now holds the payload.
    Stored,
    /// The slot was already filled; the buffer is unchanged.
    Duplicate,
    /// The sequence number is past `max_slots`; nothing was allocated.
    OutOfRange,
}

#[derive(Debug)]
pub struct ReceiveBuffer {
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
    max_slots: usize,
    /// Slots fully written to the sink.
    committed: usize,
    /// Bytes of slot `committed` already written.
    offset: usize,
    written: usize,
}

impl ReceiveBuffer {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: Vec::new(),
            filled: 0,
            max_slots,
            committed: 0,
            offset: 0,
            written: 0,
        }
    }

    /// Number of slots, filled or not (highest sequence number seen + 1).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn get(&self, seq: u32) -> Option<&[u8]> {
        self.slots.get(seq as usize)?.as_deref()
    }

    /// Sequence numbers of slots that are still empty.
    pub fn missing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(seq, _)| seq as u32)
            .collect()
    }

    /// Store `payload` at `seq` unless that slot is already filled.
    pub fn store(&mut self, seq: u32, payload: Vec<u8>) -> StoreOutcome {
        let idx = seq as usize;
        if idx >= self.max_slots {
            return StoreOutcome::OutOfRange;
        }
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        let slot = &mut self.slots[idx];
        if slot.is_some() {
            return StoreOutcome::Duplicate;
        }
        *slot = Some(payload);
        self.filled += 1;
        StoreOutcome::Stored
    }

    /// Bytes already handed to the sink by [`flush_to`](Self::flush_to).
    pub fn written(&self) -> usize {
        self.written
    }

    /// Write every payload to `sink` in ascending sequence order.
    ///
    /// Fails with [`EngineError::IncompleteStream`] before writing anything
    /// if a slot is empty.  If the sink fails part way, the bytes it accepted
    /// stay accounted for and the next call continues after them.  Returns
    /// the total number of bytes written.
    pub fn flush_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<usize, EngineError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(EngineError::IncompleteStream { missing });
        }
        while let Some(slot) = self.slots.get(self.committed) {
            let payload = slot.as_deref().unwrap_or_default();
            while self.offset < payload.len() {
                match sink.write(&payload[self.offset..]) {
                    Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    Ok(n) => {
                        self.offset += n;
                        self.written += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            }
            self.committed += 1;
            self.offset = 0;
        }
        sink.flush()?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let buf = ReceiveBuffer::new(16);
        assert!(buf.is_empty());
        assert_eq!(buf.filled(), 0);
        assert!(buf.missing().is_empty());
    }

    #[test]
    fn out_of_order_arrival_grows_with_placeholders() {
        let mut buf = ReceiveBuffer::new(16);
        assert_eq!(buf.store(0, b"aa".to_vec()), StoreOutcome::Stored);
        assert_eq!(buf.store(2, b"cc".to_vec()), StoreOutcome::Stored);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.missing(), vec![1]);

        assert_eq!(buf.store(1, b"bb".to_vec()), StoreOutcome::Stored);
        assert!(buf.missing().is_empty());

        let mut sink = Vec::new();
        assert_eq!(buf.flush_to(&mut sink).unwrap(), 6);
        assert_eq!(sink, b"aabbcc");
    }

    #[test]
    fn first_writer_wins() {
        let mut buf = ReceiveBuffer::new(16);
        buf.store(0, b"first".to_vec());
        assert_eq!(buf.store(0, b"second".to_vec()), StoreOutcome::Duplicate);
        assert_eq!(buf.get(0), Some(&b"first"[..]));
        assert_eq!(buf.filled(), 1);
    }

    #[test]
    fn sequence_past_limit_is_refused() {
        let mut buf = ReceiveBuffer::new(4);
        assert_eq!(buf.store(4, b"x".to_vec()), StoreOutcome::OutOfRange);
        assert!(buf.is_empty());
    }

    #[test]
    fn flush_with_gap_writes_nothing() {
        let mut buf = ReceiveBuffer::new(16);
        buf.store(0, b"a".to_vec());
        buf.store(3, b"d".to_vec());

        let mut sink = Vec::new();
        match buf.flush_to(&mut sink) {
            Err(EngineError::IncompleteStream { missing }) => assert_eq!(missing, vec![1, 2]),
            other => panic!("expected IncompleteStream, got {other:?}"),
        }
        assert!(sink.is_empty());
    }

    /// Sink that accepts at most `chunk` bytes per call and fails the
    /// `fail_on`-th call.
    struct FlakySink {
        data: Vec<u8>,
        calls: usize,
        fail_on: usize,
        chunk: usize,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(io::Error::other("disk hiccup"));
            }
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_flush_resumes_without_repeating_bytes() {
        let mut buf = ReceiveBuffer::new(16);
        buf.store(0, b"aaaa".to_vec());
        buf.store(1, b"bbbb".to_vec());
        let mut sink = FlakySink {
            data: Vec::new(),
            calls: 0,
            fail_on: 2,
            chunk: usize::MAX,
        };

        assert!(matches!(buf.flush_to(&mut sink), Err(EngineError::Io(_))));
        assert_eq!(sink.data, b"aaaa");
        assert_eq!(buf.written(), 4);

        assert_eq!(buf.flush_to(&mut sink).unwrap(), 8);
        assert_eq!(sink.data, b"aaaabbbb");
    }

    #[test]
    fn short_writes_inside_a_slot_are_resumed() {
        let mut buf = ReceiveBuffer::new(16);
        buf.store(0, b"abcdefg".to_vec());
        let mut sink = FlakySink {
            data: Vec::new(),
            calls: 0,
            fail_on: 3,
            chunk: 3,
        };

        assert!(buf.flush_to(&mut sink).is_err());
        assert_eq!(sink.data, b"abcdef");
        assert_eq!(buf.flush_to(&mut sink).unwrap(), 7);
        assert_eq!(sink.data, b"abcdefg");
    }

    #[test]
    fn empty_buffer_flushes_nothing() {
        let mut buf = ReceiveBuffer::new(16);
        let mut sink = Vec::new();
        assert_eq!(buf.flush_to(&mut sink).unwrap(), 0);
    }
}
