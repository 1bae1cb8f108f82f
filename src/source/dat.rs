//! Prophesee DAT file decoder.
//!
//! N-CARS recordings are stored as DAT files: a text header of lines
//! starting with `"% "`, then (when any header line is present) one byte of
//! event type and one byte of event size, then fixed-size little-endian
//! records.
//!
//! When the header declares `Width` and `Height`, events outside that
//! sensor area are rejected.
//!
//! Each CD record is a `u32` timestamp followed by a `u32` packing
//! `x` (bits 0-13), `y` (bits 14-27) and polarity (bit 28).
//!
//! The decoder reads lazily with a one-event lookahead so that only the
//! current window is held in memory.

use crate::source::{
    check_duration, Event, EventBatch, EventSource, OpenSource, SourceError,
};
use std::fs::File;
use std::io::{BufReader, Chain, Cursor, Read};
use std::path::Path;

const X_MASK: u32 = 0x0000_3FFF;
const Y_MASK: u32 = 0x0FFF_C000;
const Y_SHIFT: u32 = 14;
const P_MASK: u32 = 0x1000_0000;
const P_SHIFT: u32 = 28;

/// Minimum record size: timestamp word plus data word.
const MIN_EVENT_SIZE: usize = 8;

/// Metadata read from a DAT header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatHeader {
    pub version: u32,
    pub event_type: u8,
    pub event_size: usize,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

impl DatHeader {
    fn parse_line(&mut self, line: &str) -> Result<(), SourceError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 3 {
            return Ok(());
        }

        let parse = |value: &str| {
            value.parse::<u32>().map_err(|e| {
                SourceError::InvalidHeader(format!("bad value '{value}' for {}: {e}", words[1]))
            })
        };

        match words[1] {
            "Version" => self.version = parse(words[2])?,
            "Height" => self.height = Some(parse(words[2])?),
            "Width" => self.width = Some(parse(words[2])?),
            _ => {}
        }
        Ok(())
    }
}

/// Decode one CD record's data word.
fn decode_record(timestamp: u32, data: u32) -> Event {
    Event {
        timestamp: i64::from(timestamp),
        x: (data & X_MASK) as u16,
        y: ((data & Y_MASK) >> Y_SHIFT) as u16,
        polarity: (data & P_MASK) >> P_SHIFT != 0,
    }
}

/// Read until `buf` is full or the reader is at EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Event source over a DAT stream.
pub struct DatEventSource<R: Read> {
    reader: Chain<Cursor<Vec<u8>>, R>,
    header: DatHeader,
    record: Vec<u8>,
    pending: Option<Event>,
    decoded: u64,
    current_time: i64,
}

impl DatEventSource<BufReader<File>> {
    /// Open a DAT file from disk.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read> DatEventSource<R> {
    /// Parse the header from `reader` and position on the first event.
    pub fn from_reader(mut reader: R) -> Result<Self, SourceError> {
        let mut header = DatHeader {
            event_size: MIN_EVENT_SIZE,
            ..DatHeader::default()
        };

        // Header lines start with "% "; the first two bytes that do not are
        // either the type/size pair or the start of the first record.
        let mut lead = [0u8; 2];
        let mut header_lines = 0usize;
        let carry = loop {
            let n = read_full(&mut reader, &mut lead)?;
            if n == 2 && &lead == b"% " {
                header_lines += 1;
                let mut line = Vec::new();
                read_line(&mut reader, &mut line)?;
                header.parse_line(&format!("% {}", String::from_utf8_lossy(&line)))?;
                continue;
            }
            break lead[..n].to_vec();
        };

        let carry = if header_lines > 0 {
            if carry.len() < 2 {
                return Err(SourceError::InvalidHeader(
                    "missing event type and size".to_string(),
                ));
            }
            header.event_type = carry[0];
            header.event_size = carry[1] as usize;
            if header.event_size < MIN_EVENT_SIZE {
                return Err(SourceError::InvalidHeader(format!(
                    "event size {} is smaller than {MIN_EVENT_SIZE} bytes",
                    header.event_size
                )));
            }
            Vec::new()
        } else {
            carry
        };

        let mut source = Self {
            reader: Cursor::new(carry).chain(reader),
            record: vec![0u8; header.event_size],
            header,
            pending: None,
            decoded: 0,
            current_time: 0,
        };
        source.pending = source.read_event()?;
        Ok(source)
    }

    pub fn header(&self) -> &DatHeader {
        &self.header
    }

    fn read_event(&mut self) -> Result<Option<Event>, SourceError> {
        let n = read_full(&mut self.reader, &mut self.record)?;
        if n == 0 {
            return Ok(None);
        }
        if n < self.record.len() {
            return Err(SourceError::Truncated {
                index: self.decoded,
                expected: self.record.len(),
                actual: n,
            });
        }

        let timestamp = u32::from_le_bytes([
            self.record[0],
            self.record[1],
            self.record[2],
            self.record[3],
        ]);
        let data = u32::from_le_bytes([
            self.record[4],
            self.record[5],
            self.record[6],
            self.record[7],
        ]);
        let event = decode_record(timestamp, data);

        if let (Some(width), Some(height)) = (self.header.width, self.header.height) {
            if u32::from(event.x) >= width || u32::from(event.y) >= height {
                return Err(SourceError::OutOfBounds {
                    index: self.decoded,
                    x: event.x,
                    y: event.y,
                    width,
                    height,
                });
            }
        }

        if let Some(previous) = self.pending {
            if event.timestamp < previous.timestamp {
                return Err(SourceError::NonMonotonic {
                    index: self.decoded,
                    previous: previous.timestamp,
                    timestamp: event.timestamp,
                });
            }
        }

        self.decoded += 1;
        Ok(Some(event))
    }
}

/// Read up to and including the next `\n`.
fn read_line<R: Read>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<()> {
    let mut byte = [0u8; 1];
    loop {
        if read_full(reader, &mut byte)? == 0 {
            return Ok(());
        }
        if byte[0] == b'\n' {
            return Ok(());
        }
        line.push(byte[0]);
    }
}

impl<R: Read> EventSource for DatEventSource<R> {
    fn is_exhausted(&self) -> bool {
        self.pending.is_none()
    }

    fn next_batch(&mut self, duration_us: i64) -> Result<EventBatch, SourceError> {
        check_duration(duration_us)?;

        let mut batch = EventBatch::new(self.current_time, self.current_time + duration_us);
        while let Some(event) = self.pending {
            if event.timestamp >= batch.end {
                break;
            }
            batch.push(event);
            self.pending = self.read_event()?;
        }

        self.current_time = batch.end;
        Ok(batch)
    }
}

/// Opens DAT files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatOpener;

impl OpenSource for DatOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn EventSource>, SourceError> {
        Ok(Box::new(DatEventSource::open(path)?))
    }
}
