use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use anyhow::{Result, bail};
use log::{debug, trace, warn};

use crate::process::scanner::{StartCodeSplitter, SyncScanner, Unit};
use crate::process::{EsParser, FALLBACK_FRAME_DURATION, Frame};
use crate::structs::timestamp::Timestamp;
use crate::structs::vc1::{
    EntryPoint, FrameHeader, SC_END_OF_SEQUENCE, SC_ENTRY_POINT,
    SC_FIELD, SC_FIELD_USER_DATA, SC_FRAME, SC_FRAME_USER_DATA, SC_SEQUENCE_HEADER,
    SC_SEQUENCE_USER_DATA, SC_SLICE, SC_SLICE_USER_DATA, SequenceHeader, start_code_name,
};
use crate::utils::errors::Vc1Error;
use crate::utils::rbsp::{remove_emulation_prevention, start_code_len, trim_trailing_zeros};

const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Summary of one VC-1 frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vc1Picture {
    pub frame_header: FrameHeader,
    /// A sequence header was prepended to the frame.
    pub has_sequence_header: bool,
    /// An entry point header was prepended to the frame.
    pub has_entry_point: bool,
}

/// Hands out presentation timestamps in display order, preferring queued
/// ones over extrapolation.
#[derive(Debug, Default)]
struct PresentationClock {
    next: Timestamp,
    provided: BinaryHeap<Reverse<Timestamp>>,
}

impl PresentationClock {
    fn stamp(&mut self, frame: &mut Frame<Vc1Picture>) {
        let timestamp = match self.provided.pop() {
            Some(Reverse(timestamp)) => timestamp,
            None => self.next,
        };
        frame.timestamp = Some(timestamp);
        self.next = timestamp + frame.duration.unwrap_or(Timestamp::ZERO);
    }
}

/// VC-1 advanced profile (SMPTE 421M Annex E) elementary stream parser.
///
/// Every output frame starts at a frame start code and carries the
/// sequence header, entry point and user data units that preceded it, plus
/// the field and slice units that follow. Units keep their start codes.
///
/// Presentation timestamps follow the anchor rule: B and BI frames are
/// shown right away, I and P frames once the next anchor frame arrives.
/// Frames are released in decode order as soon as their timestamp is known.
#[derive(Debug, Default)]
pub struct Vc1Parser {
    scanner: SyncScanner,
    splitter: StartCodeSplitter,
    sequence_header: Option<SequenceHeader>,
    raw_sequence_header: Vec<u8>,
    entry_point: Option<EntryPoint>,
    raw_entry_point: Vec<u8>,
    /// Header units waiting for the next frame start code.
    headers: Option<Frame<Vc1Picture>>,
    current: Option<Frame<Vc1Picture>>,
    /// Frames in decode order waiting for an anchor's timestamp.
    reorder: VecDeque<Frame<Vc1Picture>>,
    frames: VecDeque<Frame<Vc1Picture>>,
    clock: PresentationClock,
    default_duration: Option<Timestamp>,
    dropped_units: u64,
}

impl Vc1Parser {
    pub fn sequence_header(&self) -> Option<&SequenceHeader> {
        self.sequence_header.as_ref()
    }

    pub fn entry_point(&self) -> Option<&EntryPoint> {
        self.entry_point.as_ref()
    }

    /// Last sequence header and entry point with their start codes, usable
    /// as codec private data.
    pub fn codec_private(&self) -> Option<Vec<u8>> {
        if self.raw_sequence_header.is_empty() || self.raw_entry_point.is_empty() {
            return None;
        }

        Some([self.raw_sequence_header.as_slice(), self.raw_entry_point.as_slice()].concat())
    }

    /// Frame duration used when the sequence header carries no frame rate.
    pub fn set_default_duration(&mut self, duration: Timestamp) {
        self.default_duration = Some(duration);
    }

    /// Queues a presentation timestamp. Queued timestamps are handed out
    /// smallest first as frames reach their display slot.
    pub fn add_timestamp(&mut self, timestamp: Timestamp) {
        self.clock.provided.push(Reverse(timestamp));
    }

    pub fn frame_duration(&self) -> Timestamp {
        self.sequence_header
            .as_ref()
            .and_then(SequenceHeader::frame_duration_ns)
            .map(Timestamp::from_ns)
            .or(self.default_duration)
            .unwrap_or(FALLBACK_FRAME_DURATION)
    }

    /// Units that could not be decoded or placed and were left out of all
    /// frames.
    pub fn dropped_units(&self) -> u64 {
        self.dropped_units
    }

    fn parse(&mut self) -> Result<()> {
        loop {
            let splitter = &mut self.splitter;
            let Some(unit) = self.scanner.next_unit(|data, state| splitter.probe(data, state))?
            else {
                return Ok(());
            };

            self.handle_unit(unit)?;
        }
    }

    fn handle_unit(&mut self, unit: Unit) -> Result<()> {
        let prefix = start_code_len(&unit.data);
        let body = trim_trailing_zeros(&unit.data[prefix..]);
        let Some(&code) = body.first() else {
            return Ok(());
        };

        trace!(
            "VC-1 {} unit ({} bytes) at {}",
            start_code_name(code),
            body.len(),
            unit.stream_position
        );

        let raw = [START_CODE.as_slice(), body].concat();
        let payload = remove_emulation_prevention(&body[1..]);

        match code {
            SC_SEQUENCE_HEADER => {
                self.finish_frame();
                let seq = match SequenceHeader::decode(&payload) {
                    Ok(seq) => seq,
                    Err(e) => return self.drop_unit(code, unit.stream_position, e),
                };
                self.sequence_header = Some(seq);
                self.raw_sequence_header = raw.clone();

                let headers = self.header_frame(&unit);
                headers.header.has_sequence_header = true;
                headers.data.extend_from_slice(&raw);
            }
            SC_ENTRY_POINT => {
                self.finish_frame();
                let entry = match &self.sequence_header {
                    Some(seq) => EntryPoint::decode(&payload, seq),
                    None => Err(Vc1Error::MissingSequenceHeader.into()),
                };
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return self.drop_unit(code, unit.stream_position, e),
                };
                self.entry_point = Some(entry);
                self.raw_entry_point = raw.clone();

                let headers = self.header_frame(&unit);
                headers.header.has_entry_point = true;
                headers.data.extend_from_slice(&raw);
            }
            SC_FRAME => {
                self.finish_frame();
                if let Err(e) = self.start_frame(&unit, &raw, &payload) {
                    return self.drop_unit(code, unit.stream_position, e);
                }
            }
            SC_FIELD | SC_SLICE => match self.current.as_mut() {
                Some(current) => current.data.extend_from_slice(&raw),
                None => {
                    let e = anyhow::anyhow!("no frame in progress");
                    return self.drop_unit(code, unit.stream_position, e);
                }
            },
            SC_SLICE_USER_DATA | SC_FIELD_USER_DATA | SC_FRAME_USER_DATA
                if self.current.is_some() =>
            {
                if let Some(current) = self.current.as_mut() {
                    current.data.extend_from_slice(&raw);
                }
            }
            SC_SLICE_USER_DATA..=SC_SEQUENCE_USER_DATA => {
                self.header_frame(&unit).data.extend_from_slice(&raw);
            }
            SC_END_OF_SEQUENCE => {
                if let Some(current) = self.current.as_mut() {
                    current.data.extend_from_slice(&raw);
                }
                self.finish_frame();
                self.release_anchor();
                self.release_frames();
            }
            _ => {
                let e = anyhow::anyhow!("reserved start code {code:#04X}");
                return self.drop_unit(code, unit.stream_position, e);
            }
        }

        Ok(())
    }

    fn drop_unit(&mut self, code: u8, stream_position: u64, e: anyhow::Error) -> Result<()> {
        if let Some(Vc1Error::NotAdvancedProfile(_)) = e.downcast_ref::<Vc1Error>() {
            warn!("VC-1 {} at {stream_position}: {e}", start_code_name(code));
        } else {
            debug!(
                "Dropping VC-1 {} unit at {stream_position}: {e}",
                start_code_name(code)
            );
        }
        self.dropped_units += 1;
        Ok(())
    }

    fn header_frame(&mut self, unit: &Unit) -> &mut Frame<Vc1Picture> {
        self.headers.get_or_insert_with(|| {
            let mut frame = Frame::new(Vc1Picture::default(), Vec::new(), unit.stream_position);
            frame.garbage_before = unit.garbage_before;
            frame
        })
    }

    fn start_frame(&mut self, unit: &Unit, raw: &[u8], payload: &[u8]) -> Result<()> {
        let Some(seq) = &self.sequence_header else {
            bail!(Vc1Error::MissingSequenceHeader);
        };
        let frame_header = FrameHeader::decode(payload, seq)?;

        let mut frame = self
            .headers
            .take()
            .unwrap_or_else(|| Frame::new(Vc1Picture::default(), Vec::new(), unit.stream_position));
        frame.garbage_before += unit.garbage_before;
        frame.data.extend_from_slice(raw);
        frame.header.frame_header = frame_header;
        frame.keyframe = frame_header.is_keyframe();
        frame.incomplete = self.entry_point.is_none();

        let duration = self.frame_duration().ns() * frame_header.field_count() as i64 / 2;
        frame.duration = Some(Timestamp::from_ns(duration));

        trace!(
            "VC-1 {} frame {:?}, {} fields",
            frame_header.picture_type,
            frame_header.fcm,
            frame_header.field_count()
        );

        self.current = Some(frame);
        Ok(())
    }

    fn finish_frame(&mut self) {
        let Some(mut frame) = self.current.take() else {
            return;
        };

        if frame.header.frame_header.picture_type.is_anchor() {
            self.release_anchor();
        } else {
            self.clock.stamp(&mut frame);
        }

        self.reorder.push_back(frame);
        self.release_frames();
    }

    /// Gives the anchor frame waiting for its display slot a timestamp.
    fn release_anchor(&mut self) {
        if let Some(anchor) = self.reorder.iter_mut().find(|f| f.timestamp.is_none()) {
            self.clock.stamp(anchor);
        }
    }

    fn release_frames(&mut self) {
        while self.reorder.front().is_some_and(|f| f.timestamp.is_some()) {
            if let Some(frame) = self.reorder.pop_front() {
                self.frames.push_back(frame);
            }
        }
    }
}

impl EsParser for Vc1Parser {
    type Header = Vc1Picture;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.scanner.add(data);
        self.parse()
    }

    fn flush(&mut self) -> Result<()> {
        self.scanner.finish();
        self.parse()?;
        self.finish_frame();
        self.release_anchor();
        self.release_frames();

        if let Some(headers) = self.headers.take() {
            debug!(
                "Dropping {} bytes of VC-1 headers without a following frame",
                headers.data.len()
            );
        }

        Ok(())
    }

    fn frame_available(&self) -> usize {
        self.frames.len()
    }

    fn get_frame(&mut self) -> Option<Frame<Vc1Picture>> {
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
