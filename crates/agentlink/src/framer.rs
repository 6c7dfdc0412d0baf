//! Newline-delimited record framing
//!
//! The wire is UTF-8 JSON objects separated by `\n`, nothing else. Reading
//! happens on the inbound worker only; writing is funneled through the single
//! outbound worker, which appends exactly one newline and flushes after every
//! record.
//!
//! A maximum record length (default 1 MiB) bounds buffering: an oversized
//! record is discarded up to its terminating newline and reported as an
//! error, and the reader stays usable for the next record.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::AgentLinkError;

/// Default cap on a single record, in bytes.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1024 * 1024;

/// Reads newline-terminated records from a byte stream.
///
/// Whitespace-only records are skipped. The final record before EOF does not
/// need a trailing newline.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    max_record_len: usize,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Wrap a stream with the given record-length cap.
    pub fn new(inner: R, max_record_len: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            max_record_len,
        }
    }

    /// Read the next non-empty record.
    ///
    /// Returns `Ok(None)` on clean EOF. An oversized record yields an error
    /// after its bytes have been drained, so the subsequent call resumes at
    /// the next record boundary.
    pub async fn next_record(&mut self) -> Result<Option<String>, AgentLinkError> {
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                // EOF; hand back whatever is pending
                if buf.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                trace!(len = line.len(), "read final record");
                return Ok(Some(line));
            }

            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if buf.len() + pos > self.max_record_len {
                        let consumed = pos + 1;
                        self.reader.consume(consumed);
                        return Err(AgentLinkError::message_parse(
                            format!(
                                "record exceeds maximum length of {} bytes",
                                self.max_record_len
                            ),
                            "",
                        ));
                    }
                    buf.extend_from_slice(&chunk[..pos]);
                    self.reader.consume(pos + 1);

                    let line = String::from_utf8_lossy(&buf).trim().to_string();
                    if line.is_empty() {
                        buf.clear();
                        continue;
                    }
                    trace!(len = line.len(), "read record");
                    return Ok(Some(line));
                }
                None => {
                    let len = chunk.len();
                    if buf.len() + len > self.max_record_len {
                        // Drain the rest of the oversized record before failing
                        self.reader.consume(len);
                        self.discard_until_newline().await?;
                        return Err(AgentLinkError::message_parse(
                            format!(
                                "record exceeds maximum length of {} bytes",
                                self.max_record_len
                            ),
                            "",
                        ));
                    }
                    buf.extend_from_slice(chunk);
                    self.reader.consume(len);
                }
            }
        }
    }

    async fn discard_until_newline(&mut self) -> Result<(), AgentLinkError> {
        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.reader.consume(pos + 1);
                    return Ok(());
                }
                None => {
                    let len = chunk.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Write one record: the serialized text, one newline, then flush.
pub async fn write_record<W: AsyncWrite + Unpin>(
    writer: &mut W,
    record: &str,
) -> Result<(), AgentLinkError> {
    writer.write_all(record.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    trace!(len = record.len(), "wrote record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect(input: &str, cap: usize) -> Vec<Result<String, AgentLinkError>> {
        let mut reader = RecordReader::new(Cursor::new(input.as_bytes().to_vec()), cap);
        let mut out = Vec::new();
        loop {
            match reader.next_record().await {
                Ok(Some(line)) => out.push(Ok(line)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    #[tokio::test]
    async fn test_reads_records_in_order() {
        let records = collect("{\"a\":1}\n{\"b\":2}\n", DEFAULT_MAX_RECORD_LEN).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref().unwrap(), "{\"a\":1}");
        assert_eq!(records[1].as_ref().unwrap(), "{\"b\":2}");
    }

    #[tokio::test]
    async fn test_skips_blank_records() {
        let records = collect("\n   \n{\"a\":1}\n\n", DEFAULT_MAX_RECORD_LEN).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_trims_whitespace() {
        let records = collect("  {\"a\":1}  \n", DEFAULT_MAX_RECORD_LEN).await;
        assert_eq!(records[0].as_ref().unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_final_record_without_newline() {
        let records = collect("{\"a\":1}", DEFAULT_MAX_RECORD_LEN).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_oversized_record_rejected() {
        let big = format!("{{\"pad\":\"{}\"}}\n{{\"ok\":1}}\n", "x".repeat(64));
        let records = collect(&big, 32).await;
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0].as_ref().unwrap_err(),
            AgentLinkError::MessageParse { .. }
        ));
        // Reader recovers at the next record boundary
        assert_eq!(records[1].as_ref().unwrap(), "{\"ok\":1}");
    }

    #[tokio::test]
    async fn test_oversized_error_names_the_cap() {
        let big = format!("{}\n", "y".repeat(100));
        let records = collect(&big, 10).await;
        let msg = records[0].as_ref().unwrap_err().to_string();
        assert!(msg.contains("10 bytes"), "unexpected message: {msg}");
    }

    #[tokio::test]
    async fn test_write_record_appends_single_newline() {
        let mut sink = Cursor::new(Vec::new());
        write_record(&mut sink, "{\"a\":1}").await.unwrap();
        write_record(&mut sink, "{\"b\":2}").await.unwrap();
        assert_eq!(sink.into_inner(), b"{\"a\":1}\n{\"b\":2}\n");
    }
}
