//! Streaming access-log CSV parsing.
//!
//! Reads a log stream line by line and pushes each successfully parsed
//! record into a caller-supplied sink without buffering the record set.
//! Malformed lines are skipped, counted, and sampled; only transport-level
//! I/O failures abort the parse.

use crate::schemas::{AccessLogRecord, ParseErrorSample, ParseStats};
use std::io::BufRead;
use thiserror::Error;
use tracing::{info, warn};

/// Number of columns every data row must have
pub const EXPECTED_COLUMNS: usize = 12;

/// Cap on retained [`ParseErrorSample`]s per parse run
pub const MAX_ERROR_SAMPLES: usize = 10;

/// Retained characters of a sampled bad line
const MAX_SAMPLE_CHARS: usize = 200;

const BOM: char = '\u{feff}';

/// Fixed leading token of the CSV header line
const HEADER_TOKEN: &str = "TimeGenerated";

/// Fatal parse failure. Per-line problems never surface here; they are
/// absorbed into [`ParseStats`].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read log stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-line rejection classification. A row failing the column check is
/// never reported as a numeric failure, and vice versa.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LineError {
    #[error("field count mismatch: expected={expected}, actual={actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("numeric conversion failed: {0}")]
    Numeric(String),
}

/// Streaming CSV log parser with a per-run line budget.
pub struct LogParser {
    max_lines: u64,
}

impl LogParser {
    pub fn new(max_lines: u64) -> Self {
        Self { max_lines }
    }

    /// Parse a log stream, delivering each record to `sink` before the next
    /// line is read.
    ///
    /// The first line is inspected for a byte-order mark and the header
    /// signature; a blank first line defers header consumption to the next
    /// line. Parsing stops early once `max_lines` non-blank data lines have
    /// been processed.
    pub fn parse<R, F>(&self, mut reader: R, mut sink: F) -> Result<ParseStats, ParseError>
    where
        R: BufRead,
        F: FnMut(AccessLogRecord),
    {
        let mut stats = ParseStats::default();

        let Some(first_line) = read_line_lossy(&mut reader)? else {
            return Ok(stats); // empty file
        };

        let first_line = first_line
            .strip_prefix(BOM)
            .map(str::to_string)
            .unwrap_or(first_line);

        if first_line.trim().is_empty() {
            // Blank first line: the next line is the header, if any
            if read_line_lossy(&mut reader)?.is_none() {
                return Ok(stats);
            }
        } else if is_header_line(&first_line) {
            // Header recognized, skip it
        } else {
            // File starts with data
            stats.lines_processed += 1;
            self.process_line(&first_line, &mut stats, &mut sink);
        }

        while let Some(line) = read_line_lossy(&mut reader)? {
            if stats.lines_processed >= self.max_lines {
                warn!("line budget ({}) reached, stopping parse", self.max_lines);
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            stats.lines_processed += 1;
            self.process_line(&line, &mut stats, &mut sink);
        }

        info!(
            "parse finished: {} lines, {} ok, {} rejected",
            stats.lines_processed, stats.success_count, stats.error_count
        );
        Ok(stats)
    }

    fn process_line<F>(&self, line: &str, stats: &mut ParseStats, sink: &mut F)
    where
        F: FnMut(AccessLogRecord),
    {
        match parse_line(line) {
            Ok(record) => {
                sink(record);
                stats.success_count += 1;
            }
            Err(err) => {
                stats.error_count += 1;
                collect_error_sample(
                    &mut stats.error_samples,
                    stats.lines_processed,
                    line,
                    &err.to_string(),
                );
            }
        }
    }
}

/// Read one line with the trailing newline stripped, decoding invalid UTF-8
/// lossily so a stray byte cannot abort the whole parse.
fn read_line_lossy<R: BufRead>(reader: &mut R) -> Result<Option<String>, ParseError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn is_header_line(line: &str) -> bool {
    line.starts_with(HEADER_TOKEN)
}

/// Split one row and convert it into a typed record.
pub fn parse_line(line: &str) -> Result<AccessLogRecord, LineError> {
    let fields = split_line(line);

    if fields.len() != EXPECTED_COLUMNS {
        return Err(LineError::FieldCount {
            expected: EXPECTED_COLUMNS,
            actual: fields.len(),
        });
    }

    Ok(AccessLogRecord {
        time_generated: fields[0].clone(),
        client_ip: fields[1].clone(),
        http_method: fields[2].clone(),
        request_uri: fields[3].clone(),
        user_agent: fields[4].clone(),
        http_status: parse_numeric(&fields[5], "http_status")?,
        http_version: fields[6].clone(),
        received_bytes: parse_numeric(&fields[7], "received_bytes")?,
        sent_bytes: parse_numeric(&fields[8], "sent_bytes")?,
        client_response_time: parse_numeric(&fields[9], "client_response_time")?,
        ssl_protocol: fields[10].clone(),
        original_request_uri: fields[11].clone(),
    })
}

fn parse_numeric<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, LineError> {
    value
        .parse::<T>()
        .map_err(|_| LineError::Numeric(format!("invalid {field} '{value}'")))
}

/// Two-state field splitter (NORMAL / INSIDE-QUOTES).
///
/// In NORMAL a comma ends the field and a quote enters INSIDE-QUOTES; inside
/// quotes a doubled `""` unescapes to `"` and a lone quote returns to NORMAL.
/// The final field is flushed at end of line regardless of a trailing comma.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }

    fields.push(current);
    fields
}

fn collect_error_sample(
    samples: &mut Vec<ParseErrorSample>,
    line_number: u64,
    line: &str,
    reason: &str,
) {
    if samples.len() >= MAX_ERROR_SAMPLES {
        return;
    }
    let truncated = if line.chars().count() > MAX_SAMPLE_CHARS {
        let mut s: String = line.chars().take(MAX_SAMPLE_CHARS).collect();
        s.push_str("...");
        s
    } else {
        line.to_string()
    };
    samples.push(ParseErrorSample {
        line_number,
        line: truncated,
        reason: reason.to_string(),
    });
}
