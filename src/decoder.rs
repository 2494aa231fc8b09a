// 🔎 Record Decoder - lazy line-delimited JSON reader
// Holds one line at a time; the caller decides what to do with each error.

use serde_json::error::Category;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;

use crate::error::{DecodeError, DecodeErrorKind};
use crate::records::SourceRecord;

/// A successfully decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    /// 1-based line number in the source
    pub line: usize,
    pub record: T,
}

/// Iterator over the records of one JSONL source.
///
/// Blank lines are skipped. Each item is either a typed record or a
/// `DecodeError` naming the line; iteration may continue after an error.
pub struct JsonLinesDecoder<R, T> {
    reader: R,
    path: String,
    line_no: usize,
    buf: Vec<u8>,
    finished: bool,
    _record: PhantomData<T>,
}

impl<T: SourceRecord> JsonLinesDecoder<BufReader<File>, T> {
    /// Open a source file for decoding
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(
            BufReader::with_capacity(1 << 20, file),
            path.display().to_string(),
        ))
    }
}

impl<R: BufRead, T: SourceRecord> JsonLinesDecoder<R, T> {
    pub fn new(reader: R, path: impl Into<String>) -> Self {
        JsonLinesDecoder {
            reader,
            path: path.into(),
            line_no: 0,
            buf: Vec::new(),
            finished: false,
            _record: PhantomData,
        }
    }

    /// Lines consumed so far, blank ones included
    pub fn lines_read(&self) -> usize {
        self.line_no
    }

    fn error(&self, kind: DecodeErrorKind, reason: impl Into<String>) -> DecodeError {
        DecodeError {
            path: self.path.clone(),
            line: self.line_no,
            kind,
            reason: reason.into(),
        }
    }

    fn decode_line(&self, line: &str) -> Result<T, DecodeError> {
        let mut record: T = serde_json::from_str(line).map_err(|e| {
            let kind = match e.classify() {
                Category::Data => DecodeErrorKind::MissingField,
                Category::Syntax | Category::Eof | Category::Io => DecodeErrorKind::Malformed,
            };
            self.error(kind, e.to_string())
        })?;

        record
            .validate()
            .map_err(|reason| self.error(DecodeErrorKind::InvalidValue, reason))?;

        Ok(record)
    }
}

impl<R: BufRead, T: SourceRecord> Iterator for JsonLinesDecoder<R, T> {
    type Item = Result<Decoded<T>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.finished = true;
                }
                Ok(_) => {
                    self.line_no += 1;
                    // the bad line's bytes are already consumed; the next call moves on
                    let line = match std::str::from_utf8(&self.buf) {
                        Ok(text) => text.trim(),
                        Err(e) => {
                            return Some(Err(self.error(
                                DecodeErrorKind::Malformed,
                                format!("invalid UTF-8: {}", e),
                            )))
                        }
                    };
                    if line.is_empty() {
                        continue;
                    }
                    return Some(self.decode_line(line).map(|record| Decoded {
                        line: self.line_no,
                        record,
                    }));
                }
                Err(e) => {
                    // A read failure cannot be skipped past; end the sequence
                    self.finished = true;
                    self.line_no += 1;
                    return Some(Err(self.error(DecodeErrorKind::Malformed, e.to_string())));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ReviewRecord, TipRecord};
    use std::io::Cursor;

    fn decoder<T: SourceRecord>(input: &str) -> JsonLinesDecoder<Cursor<Vec<u8>>, T> {
        JsonLinesDecoder::new(Cursor::new(input.as_bytes().to_vec()), "test.json")
    }

    #[test]
    fn test_decodes_lines_in_order_and_skips_blanks() {
        let input = concat!(
            r#"{"user_id":"u1","business_id":"b1","date":"2020-01-01 10:00:00","text":"Great"}"#,
            "\n\n",
            r#"{"user_id":"u2","business_id":"b1","date":"2020-01-02 10:00:00"}"#,
            "\n"
        );

        let items: Vec<_> = decoder::<TipRecord>(input).collect();

        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        let second = items[1].as_ref().unwrap();
        assert_eq!(first.line, 1);
        assert_eq!(first.record.text, "Great");
        assert_eq!(second.line, 3);
        assert_eq!(second.record.user_id, "u2");
        assert_eq!(second.record.compliment_count, 0);
    }

    #[test]
    fn test_missing_required_field() {
        let input = r#"{"user_id":"u1","business_id":"b1","stars":5,"date":"2020-01-01 10:00:00"}"#;

        let err = decoder::<ReviewRecord>(input).next().unwrap().unwrap_err();

        assert_eq!(err.kind, DecodeErrorKind::MissingField);
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("review_id"));
    }

    #[test]
    fn test_malformed_json() {
        let input = "{\"user_id\":\"u1\",\n";

        let err = decoder::<TipRecord>(input).next().unwrap().unwrap_err();

        assert_eq!(err.kind, DecodeErrorKind::Malformed);
    }

    #[test]
    fn test_invalid_timestamp() {
        let input = r#"{"user_id":"u1","business_id":"b1","date":"01/02/2020"}"#;

        let err = decoder::<TipRecord>(input).next().unwrap().unwrap_err();

        assert_eq!(err.kind, DecodeErrorKind::InvalidValue);
    }

    #[test]
    fn test_continues_after_error() {
        let input = concat!(
            "not json\n",
            r#"{"user_id":"u1","business_id":"b1","date":"2020-01-01 10:00:00"}"#,
            "\n"
        );

        let mut dec = decoder::<TipRecord>(input);
        assert!(dec.next().unwrap().is_err());
        let ok = dec.next().unwrap().unwrap();
        assert_eq!(ok.line, 2);
        assert!(dec.next().is_none());
        assert_eq!(dec.lines_read(), 2);
    }

    #[test]
    fn test_invalid_utf8_line_does_not_end_sequence() {
        let mut input = br#"{"user_id":"u1","business_id":"b1","date":"2020-01-01 10:00:00"}"#.to_vec();
        input.extend_from_slice(b"\n{\"user_id\":\"u\xff\"}\n");
        input.extend_from_slice(br#"{"user_id":"u2","business_id":"b1","date":"2020-01-02 10:00:00"}"#);
        input.push(b'\n');

        let items: Vec<_> =
            JsonLinesDecoder::<_, TipRecord>::new(Cursor::new(input), "test.json").collect();

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::Malformed);
        assert_eq!(err.line, 2);
        let last = items[2].as_ref().unwrap();
        assert_eq!(last.line, 3);
        assert_eq!(last.record.user_id, "u2");
    }
}
