use std::collections::VecDeque;

use anyhow::Result;
use log::{debug, trace};

use crate::process::scanner::{Probe, ScanState, SyncScanner, Unit};
use crate::process::timestamp::TimestampCalculator;
use crate::process::{EsParser, Frame};
use crate::structs::ac3::{AC3_HEADER_SIZE, Ac3Header, verify_checksums};
use crate::structs::timecode::{TIMECODE_LEN, Timecode};
use crate::structs::timestamp::Timestamp;
use crate::structs::truehd::{
    MAJOR_SYNC_MIN_LEN, TrueHdHeader, access_unit_length, check_parity, major_sync_info_len,
    major_sync_word,
};
use crate::utils::errors::{Ac3Error, TrueHdError};

#[derive(Debug, Clone)]
enum UnitKind {
    Timecode(Timecode),
    TrueHd(TrueHdHeader),
    Ac3(Ac3Header),
}

/// Sync state shared between probing and unit handling.
#[derive(Debug, Default)]
struct TrueHdSync {
    last_major: Option<TrueHdHeader>,
    locked: bool,
    pending: Option<UnitKind>,
}

impl TrueHdSync {
    fn probe(&mut self, data: &[u8], state: ScanState) -> Probe {
        if data.len() < 2 {
            return Probe::NeedMore;
        }

        if data[..2] == [0x0B, 0x77] {
            if let Some(probe) = self.probe_ac3(data, state) {
                return probe;
            }
        }

        if self.last_major.is_none() && data[..2] == [0x01, 0x10] {
            if data.len() < TIMECODE_LEN {
                return Probe::NeedMore;
            }
            if let Ok(timecode) = Timecode::from_bytes(data) {
                self.pending = Some(UnitKind::Timecode(timecode));
                return Probe::Found(TIMECODE_LEN);
            }
        }

        if data.len() < 8 {
            return Probe::NeedMore;
        }

        if major_sync_word(data).is_some() {
            return self.probe_major_sync(data, state);
        }

        if self.locked {
            if let Some(probe) = self.probe_minor(data, state) {
                return probe;
            }
        }

        match self.next_candidate(data) {
            Some(pos) => Probe::Skip(pos),
            None => Probe::Skip(data.len() - 7),
        }
    }

    /// Returns `None` if no AC-3 frame starts here.
    fn probe_ac3(&mut self, data: &[u8], state: ScanState) -> Option<Probe> {
        let header = match Ac3Header::decode(data) {
            Ok(header) => header,
            Err(e) => {
                return match e.downcast_ref::<Ac3Error>() {
                    Some(Ac3Error::HeaderTooShort(_))
                        if data.len() < AC3_HEADER_SIZE && !state.eos =>
                    {
                        Some(Probe::NeedMore)
                    }
                    _ => None,
                };
            }
        };

        if data.len() < header.frame_size {
            return (!state.eos).then_some(Probe::NeedMore);
        }

        if !verify_checksums(&data[..header.frame_size], &header) {
            trace!("CRC mismatch on embedded AC-3 candidate");
            return None;
        }

        let size = header.frame_size;
        self.pending = Some(UnitKind::Ac3(header));
        Some(Probe::Found(size))
    }

    fn probe_major_sync(&mut self, data: &[u8], state: ScanState) -> Probe {
        if data.len() < MAJOR_SYNC_MIN_LEN {
            return Probe::NeedMore;
        }

        let header = match TrueHdHeader::decode_major_sync(data) {
            Ok(header) => header,
            Err(e) => {
                return match e.downcast_ref::<TrueHdError>() {
                    Some(TrueHdError::HeaderTooShort(_)) => Probe::NeedMore,
                    _ => {
                        debug!("Invalid major sync: {e}");
                        self.locked = false;
                        Probe::Invalid
                    }
                };
            }
        };

        match check_parity(data, header.substreams, major_sync_info_len(data)) {
            Ok(Some(_)) => {}
            Ok(None) => return Probe::NeedMore,
            Err(e) => {
                debug!("{e}");
                self.locked = false;
                return Probe::Invalid;
            }
        }

        if data.len() < header.size {
            return if state.eos {
                Probe::Invalid
            } else {
                Probe::NeedMore
            };
        }

        let size = header.size;
        self.locked = true;
        self.last_major = Some(header.clone());
        self.pending = Some(UnitKind::TrueHd(header));

        Probe::Found(size)
    }

    fn probe_minor(&mut self, data: &[u8], state: ScanState) -> Option<Probe> {
        let major = self.last_major.as_ref()?;
        let size = access_unit_length(data)?;

        let result = if size < 4 + 2 * major.substreams as usize {
            Err(TrueHdError::InvalidAccessUnitLength(size).into())
        } else {
            check_parity(data, major.substreams, None)
        };

        match result {
            Ok(Some(_)) if data.len() >= size => {
                let header = TrueHdHeader::minor(major, data)?;
                self.pending = Some(UnitKind::TrueHd(header));
                Some(Probe::Found(size))
            }
            Ok(_) if !state.eos => Some(Probe::NeedMore),
            Ok(_) => {
                self.locked = false;
                Some(Probe::Invalid)
            }
            Err(e) => {
                debug!("Lost TrueHD sync: {e}");
                self.locked = false;
                Some(Probe::Invalid)
            }
        }
    }

    /// Offset of the next position that may start a unit.
    fn next_candidate(&self, data: &[u8]) -> Option<usize> {
        let timecode_allowed = self.last_major.is_none();

        (1..data.len()).find(|&i| {
            let rest = &data[i..];
            rest.starts_with(&[0x0B, 0x77])
                || (timecode_allowed && rest.starts_with(&[0x01, 0x10]))
                || major_sync_word(rest).is_some()
        })
    }
}

/// Parser for TrueHD and MLP streams. AC-3 frames interleaved with the
/// access units (Blu-ray style TrueHD tracks) are split into their own queue.
///
/// ```rust
/// use esparse::process::EsParser;
/// use esparse::process::truehd::TrueHdParser;
///
/// let mut parser = TrueHdParser::default();
/// parser.add_bytes(&[0xFF; 64])?;
/// parser.flush()?;
///
/// assert_eq!(parser.frame_available(), 0);
/// assert_eq!(parser.ac3_frame_available(), 0);
/// assert_eq!(parser.garbage_size(), 64);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct TrueHdParser {
    scanner: SyncScanner,
    sync: TrueHdSync,
    frames: VecDeque<Frame<TrueHdHeader>>,
    ac3_frames: VecDeque<Frame<Ac3Header>>,
    timecode: Option<Timecode>,
}

impl TrueHdParser {
    /// SMPTE timecode found in front of the first access unit.
    pub fn timecode(&self) -> Option<&Timecode> {
        self.timecode.as_ref()
    }

    /// Parameters of the last major sync.
    pub fn stream_header(&self) -> Option<&TrueHdHeader> {
        self.sync.last_major.as_ref()
    }

    pub fn ac3_frame_available(&self) -> usize {
        self.ac3_frames.len()
    }

    pub fn get_ac3_frame(&mut self) -> Option<Frame<Ac3Header>> {
        self.ac3_frames.pop_front()
    }

    fn parse(&mut self) -> Result<()> {
        loop {
            let sync = &mut self.sync;
            let Some(unit) = self.scanner.next_unit(|data, state| sync.probe(data, state))? else {
                return Ok(());
            };

            match self.sync.pending.take() {
                Some(kind) => self.handle_unit(unit, kind),
                None => debug!("Unit at {} without decoded header", unit.stream_position),
            }
        }
    }

    fn handle_unit(&mut self, unit: Unit, kind: UnitKind) {
        let Unit {
            data,
            stream_position,
            garbage_before,
        } = unit;

        match kind {
            UnitKind::Timecode(timecode) => {
                debug!("Stream timecode {timecode}");
                self.timecode = Some(timecode);
            }
            UnitKind::Ac3(header) => {
                trace!("Embedded AC-3 frame at {stream_position}");
                let duration =
                    Timestamp::from_samples(header.samples as u64, header.sample_rate as u64);
                let mut frame = Frame::new(header, data, stream_position);
                frame.garbage_before = garbage_before;
                frame.keyframe = true;
                frame.dependent = true;
                frame.duration = duration;
                self.ac3_frames.push_back(frame);
            }
            UnitKind::TrueHd(header) => {
                let duration = Timestamp::from_samples(
                    header.samples_per_frame as u64,
                    header.sample_rate as u64,
                );
                let keyframe = header.major_sync;
                let mut frame = Frame::new(header, data, stream_position);
                frame.garbage_before = garbage_before;
                frame.keyframe = keyframe;
                frame.duration = duration;
                self.frames.push_back(frame);
            }
        }
    }
}

impl EsParser for TrueHdParser {
    type Header = TrueHdHeader;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.scanner.add(data);
        self.parse()
    }

    fn flush(&mut self) -> Result<()> {
        self.scanner.finish();
        self.parse()
    }

    fn frame_available(&self) -> usize {
        self.frames.len()
    }

    fn get_frame(&mut self) -> Option<Frame<TrueHdHeader>> {
        self.frames.pop_front()
    }

    fn parsed_stream_position(&self) -> u64 {
        self.scanner.position()
    }

    fn total_stream_position(&self) -> u64 {
        self.scanner.total_added()
    }

    fn garbage_size(&self) -> u64 {
        self.scanner.garbage()
    }
}

/// Couples a [`TrueHdParser`] with one [`TimestampCalculator`] per logical
/// stream so that TrueHD and embedded AC-3 frames are timed independently.
#[derive(Debug, Default)]
pub struct TrueHdAc3Splitter {
    parser: TrueHdParser,
    truehd_timestamps: TimestampCalculator,
    ac3_timestamps: TimestampCalculator,
}

impl TrueHdAc3Splitter {
    pub fn parser(&self) -> &TrueHdParser {
        &self.parser
    }

    pub fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.parser.add_bytes(data)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.parser.flush()
    }

    pub fn add_truehd_timestamp(&mut self, timestamp: Timestamp, stream_position: Option<u64>) {
        self.truehd_timestamps.add_timestamp(timestamp, stream_position);
    }

    pub fn add_ac3_timestamp(&mut self, timestamp: Timestamp, stream_position: Option<u64>) {
        self.ac3_timestamps.add_timestamp(timestamp, stream_position);
    }

    pub fn truehd_frame_available(&self) -> usize {
        self.parser.frame_available()
    }

    pub fn ac3_frame_available(&self) -> usize {
        self.parser.ac3_frame_available()
    }

    pub fn get_truehd_frame(&mut self) -> Result<Option<Frame<TrueHdHeader>>> {
        let Some(mut frame) = self.parser.get_frame() else {
            return Ok(None);
        };

        let samples = frame.header.samples_per_frame as u64;
        self.truehd_timestamps
            .set_samples_per_second(frame.header.sample_rate as u64);
        frame.timestamp = Some(
            self.truehd_timestamps
                .get_next_timestamp(samples, Some(frame.stream_position)),
        );
        frame.duration = Some(self.truehd_timestamps.get_duration(samples)?);

        Ok(Some(frame))
    }

    pub fn get_ac3_frame(&mut self) -> Result<Option<Frame<Ac3Header>>> {
        let Some(mut frame) = self.parser.get_ac3_frame() else {
            return Ok(None);
        };

        let samples = frame.header.samples as u64;
        self.ac3_timestamps
            .set_samples_per_second(frame.header.sample_rate as u64);
        frame.timestamp = Some(
            self.ac3_timestamps
                .get_next_timestamp(samples, Some(frame.stream_position)),
        );
        frame.duration = Some(self.ac3_timestamps.get_duration(samples)?);

        Ok(Some(frame))
    }
}
