//! Conversion of decoded blktrace lines into simulator records.
//!
//! `blkparse` prints one event per line in its default format:
//!
//! ```text
//!   8,0    3        1     0.000000000   697  C  WS 4096 + 512 [0]
//! ```
//!
//! Only completion events (`C`) are of interest. Each one is expanded into
//! one [`Record`] per logical block it touches.

use std::fmt;
use std::num::ParseIntError;

use crate::blocks::map_blocks;
use crate::config::BlockSize;

/// Lines with fewer columns than this are headers, summaries or partial
/// output and are skipped.
pub const MIN_COLUMNS: usize = 10;

const ACTION_COLUMN: usize = 5;
const RWBS_COLUMN: usize = 6;
const ADDRESS_COLUMN: usize = 7;
const LENGTH_COLUMN: usize = 9;

const COMPLETION_ACTION: &str = "C";
const WRITE_FLAG: char = 'W';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Write
    Store,
    /// Read (anything without the write flag)
    Load,
}

impl Direction {
    pub fn from_rwbs(rwbs: &str) -> Self {
        if rwbs.contains(WRITE_FLAG) {
            Direction::Store
        } else {
            Direction::Load
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Store => "S",
            Direction::Load => "L",
        }
    }
}

/// A completed device I/O, in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub direction: Direction,
    pub address: u64,
    pub length: u64,
}

impl CompletionEvent {
    /// One record per touched logical block, in ascending block order.
    pub fn records(&self, block_size: BlockSize) -> impl Iterator<Item = Record> {
        let direction = self.direction;
        map_blocks(self.address, self.length, block_size).map(move |block| Record { direction, block })
    }
}

/// One output line: `<S|L> 0x<block> 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub direction: Direction,
    pub block: u64,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#x} 1", self.direction.as_str(), self.block)
    }
}

/// A completion line whose numeric columns could not be parsed. The trace
/// format is no longer what we expect, so the session stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Address { value: String, source: ParseIntError },
    Length { value: String, source: ParseIntError },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Address { value, source } => {
                write!(f, "invalid sector address '{value}': {source}")
            }
            ParseError::Length { value, source } => {
                write!(f, "invalid sector count '{value}': {source}")
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Address { source, .. } | ParseError::Length { source, .. } => Some(source),
        }
    }
}

/// Parse one decoded trace line.
///
/// Returns `Ok(None)` for lines that are not completion events, including
/// short or malformed lines, and `Err` only when a completion line carries
/// a non-numeric address or length.
pub fn parse_line(line: &str) -> Result<Option<CompletionEvent>, ParseError> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.len() < MIN_COLUMNS {
        return Ok(None);
    }
    if columns[ACTION_COLUMN] != COMPLETION_ACTION {
        return Ok(None);
    }

    let address = columns[ADDRESS_COLUMN]
        .parse::<u64>()
        .map_err(|source| ParseError::Address {
            value: columns[ADDRESS_COLUMN].to_string(),
            source,
        })?;
    let length = columns[LENGTH_COLUMN]
        .parse::<u64>()
        .map_err(|source| ParseError::Length {
            value: columns[LENGTH_COLUMN].to_string(),
            source,
        })?;

    Ok(Some(CompletionEvent {
        direction: Direction::from_rwbs(columns[RWBS_COLUMN]),
        address,
        length,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(line: &str, sectors: u64) -> Vec<String> {
        let bs = BlockSize::from_sectors(sectors).unwrap();
        parse_line(line)
            .unwrap()
            .map(|ev| ev.records(bs).map(|r| format!("{r}\n")).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_short_line_is_ignored() {
        assert_eq!(parse_line("CPU0 (sdb):").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("8,0 3 1 0.0 697 C W 4096 +").unwrap(), None);
    }

    #[test]
    fn test_non_completion_is_ignored() {
        let line = "  8,0    3        1     0.000000000   697  Q   W 4096 + 512 [dd]";
        assert_eq!(parse_line(line).unwrap(), None);
    }

    #[test]
    fn test_write_completion() {
        let line = "  8,0    3        1     0.000000000   697  C  WS 4096 + 512 [0]";
        let event = parse_line(line).unwrap().unwrap();
        assert_eq!(event.direction, Direction::Store);
        assert_eq!(event.address, 4096);
        assert_eq!(event.length, 512);

        let out = render(line, 8);
        assert_eq!(out[0], "S 0x200 1\n");
        assert_eq!(out.len(), 65);
        assert_eq!(out.last().unwrap(), "S 0x240 1\n");
    }

    #[test]
    fn test_read_completion() {
        let line = "  8,0    0        2     0.000100000     0  C   R 1000 + 3000 [0]";
        let out = render(line, 1024);
        assert_eq!(
            out,
            vec!["L 0x0 1\n", "L 0x1 1\n", "L 0x2 1\n", "L 0x3 1\n"]
        );
    }

    #[test]
    fn test_flags_without_write_are_loads() {
        assert_eq!(Direction::from_rwbs("RA"), Direction::Load);
        assert_eq!(Direction::from_rwbs("N"), Direction::Load);
        assert_eq!(Direction::from_rwbs("FWFSM"), Direction::Store);
    }

    #[test]
    fn test_bad_address_is_fatal() {
        let line = "  8,0    3        1     0.000000000   697  C  W abc + 512 [0]";
        let err = parse_line(line).unwrap_err();
        assert!(matches!(err, ParseError::Address { ref value, .. } if value == "abc"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_bad_length_is_fatal() {
        let line = "  8,0    3        1     0.000000000   697  C  W 4096 + x12 [0]";
        let err = parse_line(line).unwrap_err();
        assert!(matches!(err, ParseError::Length { .. }));
    }

    #[test]
    fn test_record_display() {
        let r = Record {
            direction: Direction::Load,
            block: 0xdeadbeef,
        };
        assert_eq!(r.to_string(), "L 0xdeadbeef 1");
    }
}
