//! Newline-delimited JSON.

use bytes::{BufMut, Bytes, BytesMut};

use super::EncodingError;
use crate::BatchRecord;

const INITIAL_SPOOL: usize = 64 * 1024;

/// Incremental NDJSON writer for one batch at a time.
///
/// Records are appended with [`push`](Self::push); [`finish`](Self::finish)
/// hands the payload out as [`Bytes`] and leaves the encoder empty for the
/// next batch.
#[derive(Debug)]
pub struct BatchEncoder {
    spool: BytesMut,
    lines: usize,
}

impl Default for BatchEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchEncoder {
    pub fn new() -> Self {
        Self {
            spool: BytesMut::with_capacity(INITIAL_SPOOL),
            lines: 0,
        }
    }

    pub const fn content_type(&self) -> &'static str {
        "application/x-ndjson"
    }

    #[inline]
    pub fn push(&mut self, record: &BatchRecord) -> Result<(), EncodingError> {
        serde_json::to_writer((&mut self.spool).writer(), record)?;
        self.spool.put_u8(b'\n');
        self.lines += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn byte_len(&self) -> usize {
        self.spool.len()
    }

    /// Take the encoded payload and reset for the next batch.
    pub fn finish(&mut self) -> Bytes {
        self.lines = 0;
        self.spool.split().freeze()
    }

    /// Drop anything pushed so far.
    pub fn clear(&mut self) {
        self.lines = 0;
        self.spool.clear();
    }
}

/// Encode a complete slice of records in one call.
pub fn encode_batch(records: &[BatchRecord]) -> Result<Bytes, EncodingError> {
    let mut encoder = BatchEncoder::new();
    for record in records {
        encoder.push(record)?;
    }
    Ok(encoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(v: Value) -> BatchRecord {
        match v {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn empty_batch_is_empty_payload() {
        let payload = encode_batch(&[]).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn one_line_per_record_in_order() {
        let payload =
            encode_batch(&[record(json!({"a": 1})), record(json!({"a": 2}))])
                .unwrap();
        let text = std::str::from_utf8(&payload).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'));
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first, json!({"a": 1}));
        assert_eq!(second, json!({"a": 2}));
    }

    #[test]
    fn finish_resets_for_next_batch() {
        let mut enc = BatchEncoder::new();
        enc.push(&record(json!({"id": 1, "name": "Zoë"}))).unwrap();
        assert_eq!(enc.len(), 1);

        let first = enc.finish();
        assert!(enc.is_empty());
        assert_eq!(enc.byte_len(), 0);

        enc.push(&record(json!({"id": 2, "name": null}))).unwrap();
        let second = enc.finish();

        assert_eq!(&first[..], "{\"id\":1,\"name\":\"Zoë\"}\n".as_bytes());
        assert_eq!(&second[..], b"{\"id\":2,\"name\":null}\n");
    }

    #[test]
    fn embedded_newlines_stay_escaped() {
        let payload =
            encode_batch(&[record(json!({"note": "line1\nline2"}))]).unwrap();
        assert_eq!(payload.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
