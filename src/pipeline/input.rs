//! Record framing for the input stream.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::error::PipelineError;

/// One input record, without its `\n` terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based position in the input.
    pub line: u64,
    pub text: String,
}

/// Splits a byte stream into `\n`-terminated UTF-8 records.
///
/// A `\r` before the `\n` is part of the record. A final record without a
/// terminator is still yielded at end of input.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    /// Bytes of the buffer already searched for a terminator.
    scanned: usize,
    line: u64,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, frame: BytesMut) -> Result<Record, PipelineError> {
        self.line += 1;
        let text = String::from_utf8(frame.to_vec())
            .map_err(|_| PipelineError::InvalidUtf8 { line: self.line })?;
        Ok(Record {
            line: self.line,
            text,
        })
    }
}

impl Decoder for RecordDecoder {
    type Item = Record;
    type Error = PipelineError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Record>, PipelineError> {
        let Some(offset) = buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = buf.len();
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        let mut frame = buf.split_to(end + 1);
        frame.truncate(end);
        self.record(frame).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Record>, PipelineError> {
        if let Some(record) = self.decode(buf)? {
            return Ok(Some(record));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        self.scanned = 0;
        let frame = buf.split_to(buf.len());
        self.record(frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    async fn decode_all(input: &'static [u8]) -> Vec<Result<Record, PipelineError>> {
        FramedRead::new(input, RecordDecoder::new()).collect().await
    }

    fn texts(results: Vec<Result<Record, PipelineError>>) -> Vec<String> {
        results.into_iter().map(|r| r.unwrap().text).collect()
    }

    #[tokio::test]
    async fn test_splits_on_newline() {
        let records = decode_all(b"a,1\nb,2\na,3\n").await;
        let records: Vec<Record> = records.into_iter().map(Result::unwrap).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].line, 1);
        assert_eq!(records[2].line, 3);
        assert_eq!(records[2].text, "a,3");
    }

    #[tokio::test]
    async fn test_trailing_record_without_newline() {
        assert_eq!(texts(decode_all(b"x\ny").await), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_empty_input_and_empty_lines() {
        assert!(decode_all(b"").await.is_empty());
        assert_eq!(texts(decode_all(b"\n\nz\n").await), vec!["", "", "z"]);
    }

    #[tokio::test]
    async fn test_carriage_return_kept() {
        assert_eq!(texts(decode_all(b"a\r\nb\r\n").await), vec!["a\r", "b\r"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_reports_line() {
        let results = decode_all(b"ok\n\xff\xfe\n").await;
        assert_eq!(results[0].as_ref().unwrap().text, "ok");
        assert!(matches!(
            results[1],
            Err(PipelineError::InvalidUtf8 { line: 2 })
        ));
    }

    #[test]
    fn test_partial_frames_across_reads() {
        let mut decoder = RecordDecoder::new();
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"lo\nwor");
        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.text, "hello");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ld");
        let record = decoder.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(record.text, "world");
        assert_eq!(record.line, 2);
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }
}
