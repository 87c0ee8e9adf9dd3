//! SMPTE timecode prefix found in front of some TrueHD elementary streams.
//!
//! The prefix is 16 bytes: the marker `01 10`, four BCD coded 16-bit words
//! for hours, minutes, seconds and frames, a binary sample offset, a word
//! holding the frame rate code and drop frame flag, and the trailer `80 00`.

use std::fmt::{Display, Formatter};

use anyhow::{Result, bail, ensure};
use log::trace;

use crate::structs::timestamp::{NS_PER_SECOND, Timestamp};
use crate::utils::errors::TimestampError;

pub const TIMECODE_LEN: usize = 16;

/// (numerator, denominator, label) by frame rate code, starting at code 1.
const TIMECODE_RATES: [(i64, i64, &str); 8] = [
    (24000, 1001, "23.976"),
    (24, 1, "24"),
    (25, 1, "25"),
    (30000, 1001, "29.97"),
    (30, 1, "30"),
    (50, 1, "50"),
    (60000, 1001, "59.94"),
    (60, 1, "60"),
];

/// Frame rate code of a timecode. Codes outside 1..=8 are kept but carry no rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimecodeRate(pub u8);

impl TimecodeRate {
    fn entry(self) -> Option<(i64, i64, &'static str)> {
        (self.0 as usize)
            .checked_sub(1)
            .and_then(|index| TIMECODE_RATES.get(index))
            .copied()
    }

    pub fn as_rational(self) -> Option<(i64, i64)> {
        self.entry().map(|(num, den, _)| (num, den))
    }
}

impl Display for TimecodeRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.entry() {
            Some((_, _, label)) => f.write_str(label),
            None => write!(f, "reserved({:#04x})", self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timecode {
    pub hours: u16,
    pub minutes: u16,
    pub seconds: u16,
    pub frames: u16,
    /// Offset in samples past the frame boundary.
    pub samples: u16,
    pub rate: TimecodeRate,
    pub drop_frame: bool,
}

impl Display for Timecode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let separator = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{separator}{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )?;
        if self.samples > 0 {
            write!(f, " +{}", self.samples)?;
        }
        write!(f, " @ {} fps", self.rate)
    }
}

impl Timecode {
    /// Returns true if `buffer` starts with the timecode marker bytes.
    pub fn is_timecode(buffer: &[u8]) -> bool {
        matches!(
            buffer,
            [0x01, 0x10, _, _, _, _, _, _, _, _, _, _, _, _, 0x80, 0x00, ..]
        )
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        ensure!(
            buffer.len() >= TIMECODE_LEN,
            "Timecode needs {TIMECODE_LEN} bytes, got {}",
            buffer.len()
        );

        if !Self::is_timecode(buffer) {
            bail!(TimestampError::InvalidSyncBytes);
        }

        let word = |index: usize| u16::from_be_bytes([buffer[2 * index], buffer[2 * index + 1]]);
        let flags = word(6);

        let timecode = Timecode {
            hours: bcd_value(word(1))?,
            minutes: bcd_value(word(2))?,
            seconds: bcd_value(word(3))?,
            frames: bcd_value(word(4))?,
            samples: word(5),
            rate: TimecodeRate(((flags >> 2) & 0xF) as u8),
            drop_frame: flags & 1 != 0,
        };

        trace!("SMPTE timecode: {timecode}");

        Ok(timecode)
    }

    /// Converts to a timestamp. Frames use the nominal frame rate, samples
    /// the stream's sample rate. Drop frame counting is not compensated.
    pub fn to_timestamp(&self, sample_rate: u32) -> Timestamp {
        let secs = self.hours as i64 * 3600 + self.minutes as i64 * 60 + self.seconds as i64;
        let mut ns = secs * NS_PER_SECOND;

        if let Some((num, den)) = self.rate.as_rational() {
            ns += self.frames as i64 * NS_PER_SECOND * den / num;
        }
        if sample_rate > 0 {
            ns += self.samples as i64 * NS_PER_SECOND / sample_rate as i64;
        }

        Timestamp::from_ns(ns)
    }
}

/// Decodes four packed BCD digits.
fn bcd_value(value: u16) -> Result<u16> {
    let mut result = 0;
    for shift in [12, 8, 4, 0] {
        let digit = (value >> shift) & 0xF;
        if digit > 9 {
            bail!(TimestampError::InvalidBcdDigit);
        }
        result = result * 10 + digit;
    }

    Ok(result)
}
