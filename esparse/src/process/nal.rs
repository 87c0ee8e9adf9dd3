use std::collections::VecDeque;

use anyhow::{Result, bail};
use log::{debug, trace, warn};

use crate::process::scanner::{StartCodeSplitter, SyncScanner};
use crate::process::{EsParser, FALLBACK_FRAME_DURATION, Frame};
use crate::structs::nal::{AccessUnit, SliceType};
use crate::structs::timestamp::Timestamp;
use crate::utils::errors::NalError;
use crate::utils::rbsp::{remove_emulation_prevention, start_code_len, trim_trailing_zeros};

/// Codec specific classification of a slice NAL unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceInfo {
    /// First slice of a new picture.
    pub first_slice: bool,
    /// First slice of the second field of a field pair.
    pub second_field: bool,
    pub slice_type: SliceType,
    pub poc: i32,
    pub keyframe: bool,
    /// Picture order count was reset by this picture.
    pub poc_reset: bool,
    /// Picture order count could not be derived reliably.
    pub incomplete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    /// Parameter set, belongs to the following access unit.
    ParameterSet,
    /// Access unit delimiter.
    Delimiter,
    /// Non-VCL unit that precedes the slices of an access unit (SEI and friends).
    Prefix,
    /// Non-VCL unit that belongs to the access unit in progress.
    Suffix,
    Slice(SliceInfo),
    /// Not written to any frame.
    Discard,
}

/// Per-codec part of the Annex B access unit assembler.
pub trait NalCodec: Default {
    const NAME: &'static str;

    fn nal_unit_type(nal: &[u8]) -> u8;

    fn is_vcl(nal: &[u8]) -> bool;

    /// Classifies one NAL unit and updates the codec state. `rbsp` is `nal`
    /// with emulation prevention bytes removed.
    fn handle_nal(&mut self, nal: &[u8], rbsp: &[u8]) -> Result<NalKind>;

    /// Frame duration from the active sequence parameter set timing info.
    fn frame_duration(&self) -> Option<Timestamp>;

    /// Raw parameter set NAL units, usable as codec private data.
    fn parameter_sets(&self) -> Vec<Vec<u8>>;
}

#[derive(Debug)]
struct PendingAccessUnit {
    frame: Frame<AccessUnit>,
    poc_reset: bool,
    intra: bool,
}

/// Annex B NAL unit stream parser assembling access units.
///
/// Each output frame holds one access unit with its NAL units written with
/// a big endian size prefix of [`nalu_size_length`](Self::nalu_size_length)
/// bytes. Frames are released once the presentation order of their
/// keyframe delimited segment is known.
#[derive(Debug)]
pub struct NalParser<C: NalCodec> {
    codec: C,
    scanner: SyncScanner,
    splitter: StartCodeSplitter,
    frames: VecDeque<Frame<AccessUnit>>,
    /// Non-VCL units waiting for the slices of the next access unit.
    prefix: Option<Frame<AccessUnit>>,
    current: Option<PendingAccessUnit>,
    segment: Vec<Frame<AccessUnit>>,
    provided_timestamps: VecDeque<Timestamp>,
    next_timestamp: Timestamp,
    last_timestamp: Option<Timestamp>,
    decode_index: u64,
    nalu_size_length: u8,
    keep_parameter_sets_in_frames: bool,
    default_duration: Option<Timestamp>,
    dropped_nal_units: u64,
}

impl<C: NalCodec> Default for NalParser<C> {
    fn default() -> Self {
        Self {
            codec: C::default(),
            scanner: SyncScanner::default(),
            splitter: StartCodeSplitter::default(),
            frames: VecDeque::new(),
            prefix: None,
            current: None,
            segment: Vec::new(),
            provided_timestamps: VecDeque::new(),
            next_timestamp: Timestamp::ZERO,
            last_timestamp: None,
            decode_index: 0,
            nalu_size_length: 4,
            keep_parameter_sets_in_frames: true,
            default_duration: None,
            dropped_nal_units: 0,
        }
    }
}

impl<C: NalCodec> NalParser<C> {
    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn nalu_size_length(&self) -> u8 {
        self.nalu_size_length
    }

    /// Size of the length prefix written before each NAL unit, 1 to 4 bytes.
    pub fn set_nalu_size_length(&mut self, length: u8) -> Result<()> {
        if !(1..=4).contains(&length) {
            bail!(NalError::InvalidNaluSizeLength(length));
        }

        self.nalu_size_length = length;
        Ok(())
    }

    /// Whether in-band parameter sets are kept in the access units.
    pub fn set_keep_parameter_sets_in_frames(&mut self, keep: bool) {
        self.keep_parameter_sets_in_frames = keep;
    }

    pub fn set_default_duration(&mut self, duration: Timestamp) {
        self.default_duration = Some(duration);
    }

    /// Queues a presentation timestamp. Queued timestamps are handed to the
    /// frames of a segment in presentation order; frames left over continue
    /// from the last one by the frame duration. Timestamps not after the
    /// last one already assigned are discarded.
    pub fn add_timestamp(&mut self, timestamp: Timestamp) {
        self.provided_timestamps.push_back(timestamp);
    }

    pub fn frame_duration(&self) -> Timestamp {
        self.codec
            .frame_duration()
            .or(self.default_duration)
            .unwrap_or(FALLBACK_FRAME_DURATION)
    }

    /// NAL units that could not be decoded and were left out of all frames.
    pub fn dropped_nal_units(&self) -> u64 {
        self.dropped_nal_units
    }

    fn parse(&mut self) -> Result<()> {
        loop {
            let splitter = &mut self.splitter;
            let Some(unit) = self.scanner.next_unit(|data, state| splitter.probe(data, state))?
            else {
                return Ok(());
            };

            let prefix = start_code_len(&unit.data);
            let nal = trim_trailing_zeros(&unit.data[prefix..]);
            if nal.is_empty() {
                continue;
            }

            self.handle_nal(nal, unit.stream_position + prefix as u64, unit.garbage_before)?;
        }
    }

    fn handle_nal(&mut self, nal: &[u8], stream_position: u64, garbage_before: u64) -> Result<()> {
        let rbsp = remove_emulation_prevention(nal);

        let kind = match self.codec.handle_nal(nal, &rbsp) {
            Ok(kind) => kind,
            Err(e) => {
                if C::is_vcl(nal)
                    && let Some(current) = self.current.as_mut()
                {
                    warn!("{} slice at {stream_position} left unresolved: {e}", C::NAME);
                    current.frame.incomplete = true;
                    return write_nal::<C>(&mut current.frame, nal, self.nalu_size_length);
                }

                debug!("Dropping {} NAL unit at {stream_position}: {e}", C::NAME);
                self.dropped_nal_units += 1;
                return Ok(());
            }
        };

        trace!("{} NAL unit {kind:?} ({} bytes) at {stream_position}", C::NAME, nal.len());

        match kind {
            NalKind::Delimiter => self.finish_access_unit(),
            NalKind::ParameterSet if !self.keep_parameter_sets_in_frames => {}
            NalKind::Suffix if self.prefix.is_none() && self.current.is_some() => {
                if let Some(current) = self.current.as_mut() {
                    write_nal::<C>(&mut current.frame, nal, self.nalu_size_length)?;
                }
            }
            NalKind::ParameterSet | NalKind::Prefix | NalKind::Suffix => {
                let prefix = self
                    .prefix
                    .get_or_insert_with(|| new_frame(stream_position, garbage_before));
                write_nal::<C>(prefix, nal, self.nalu_size_length)?;
            }
            NalKind::Slice(info) => self.add_slice(nal, info, stream_position, garbage_before)?,
            NalKind::Discard => {}
        }

        Ok(())
    }

    fn add_slice(
        &mut self,
        nal: &[u8],
        info: SliceInfo,
        stream_position: u64,
        garbage_before: u64,
    ) -> Result<()> {
        if (!info.first_slice || info.second_field)
            && let Some(current) = self.current.as_mut()
        {
            let frame = &mut current.frame;
            if let Some(prefix) = self.prefix.take() {
                frame.data.extend_from_slice(&prefix.data);
                frame.header.nal_unit_types.extend(prefix.header.nal_unit_types);
                frame.garbage_before += prefix.garbage_before;
            }

            frame.header.slice_type = frame.header.slice_type.combine(info.slice_type);
            if info.second_field {
                frame.header.poc = frame.header.poc.min(info.poc);
            }
            frame.incomplete |= info.incomplete;

            return write_nal::<C>(frame, nal, self.nalu_size_length);
        }

        self.finish_access_unit();

        let mut frame = self
            .prefix
            .take()
            .unwrap_or_else(|| new_frame(stream_position, garbage_before));
        frame.header.slice_type = info.slice_type;
        frame.header.poc = info.poc;
        frame.keyframe = info.keyframe;
        // A picture whose first slice was never seen
        frame.incomplete = info.incomplete || !info.first_slice;
        write_nal::<C>(&mut frame, nal, self.nalu_size_length)?;

        self.current = Some(PendingAccessUnit {
            frame,
            poc_reset: info.poc_reset,
            intra: info.slice_type.is_intra(),
        });

        Ok(())
    }

    fn finish_access_unit(&mut self) {
        let Some(PendingAccessUnit {
            mut frame,
            poc_reset,
            intra,
        }) = self.current.take()
        else {
            return;
        };

        frame.header.decode_index = self.decode_index;
        self.decode_index += 1;

        let max_poc = self.segment.iter().map(|f| f.header.poc).max();
        if poc_reset || (intra && max_poc.is_none_or(|max| frame.header.poc > max)) {
            self.complete_segment();
        }

        self.segment.push(frame);
    }

    /// Assigns presentation timestamps to the frames of the current segment
    /// by their rank in picture order and releases them in decode order.
    fn complete_segment(&mut self) {
        if self.segment.is_empty() {
            return;
        }

        let count = self.segment.len();
        let duration = self.frame_duration();

        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&i| (self.segment[i].header.poc, self.segment[i].header.decode_index));

        let queued = count.min(self.provided_timestamps.len());
        let mut provided: Vec<Timestamp> = self.provided_timestamps.drain(..queued).collect();
        provided.sort();
        if let Some(last) = self.last_timestamp {
            provided.retain(|&timestamp| timestamp > last);
            if provided.len() < queued {
                debug!(
                    "{} dropped {} provided timestamps not after {last}",
                    C::NAME,
                    queued - provided.len()
                );
            }
        }

        // Ranks without a provided timestamp continue from the previous one
        let mut timestamps = Vec::with_capacity(count);
        for rank in 0..count {
            let timestamp = match provided.get(rank) {
                Some(&timestamp) => timestamp,
                None => timestamps
                    .last()
                    .map_or(self.next_timestamp, |&previous| previous + duration),
            };
            timestamps.push(timestamp);
        }

        for (&index, &timestamp) in order.iter().zip(&timestamps) {
            let frame = &mut self.segment[index];
            frame.timestamp = Some(timestamp);
            frame.duration = Some(duration);
        }

        if let Some(&last) = timestamps.last() {
            self.last_timestamp = Some(last);
            self.next_timestamp = last + duration;
        }

        debug!(
            "{} segment of {count} frames completed, next timestamp {}",
            C::NAME,
            self.next_timestamp
        );
        self.frames.extend(self.segment.drain(..));
    }
}

fn new_frame(stream_position: u64, garbage_before: u64) -> Frame<AccessUnit> {
    let mut frame = Frame::new(AccessUnit::default(), Vec::new(), stream_position);
    frame.garbage_before = garbage_before;
    frame
}

fn write_nal<C: NalCodec>(frame: &mut Frame<AccessUnit>, nal: &[u8], length: u8) -> Result<()> {
    write_length_prefixed(&mut frame.data, nal, length)?;
    frame.header.nal_unit_types.push(C::nal_unit_type(nal));

    Ok(())
}

/// Appends `nal` with a big endian size prefix of `length` bytes.
pub fn write_length_prefixed(out: &mut Vec<u8>, nal: &[u8], length: u8) -> Result<()> {
    if length < 4 && nal.len() >= 1 << (8 * length as u32) {
        bail!(NalError::NaluTooLarge {
            size: nal.len(),
            length
        });
    }

    let size = (nal.len() as u32).to_be_bytes();
    out.extend_from_slice(&size[4 - length as usize..]);
    out.extend_from_slice(nal);

    Ok(())
}

/// Splits the length prefixed NAL units of an access unit.
pub fn split_length_prefixed(data: &[u8], length: u8) -> Result<Vec<&[u8]>> {
    if !(1..=4).contains(&length) {
        bail!(NalError::InvalidNaluSizeLength(length));
    }

    let length = length as usize;
    let mut nals = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < length {
            bail!(NalError::TruncatedNalUnit(length - rest.len()));
        }

        let (prefix, tail) = rest.split_at(length);
        let size = prefix.iter().fold(0usize, |size, &b| (size << 8) | b as usize);
        if tail.len() < size {
            bail!(NalError::TruncatedNalUnit(size - tail.len()));
        }

        let (nal, tail) = tail.split_at(size);
        nals.push(nal);
        rest = tail;
    }

    Ok(nals)
}

impl<C: NalCodec> EsParser for NalParser<C> {
    type Header = AccessUnit;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.scanner.add(data);
        self.parse()
    }

    fn flush(&mut self) -> Result<()> {
        self.scanner.finish();
        self.parse()?;
        self.finish_access_unit();
        self.complete_segment();

        if let Some(prefix) = self.prefix.take() {
            debug!(
                "Dropping {} bytes of {} non-VCL NAL units at end of stream",
                prefix.data.len(),
                C::NAME
            );
        }

        Ok(())
    }

    fn frame_available(&self) -> usize {
        self.frames.len()
    }

    fn get_frame(&mut self) -> Option<Frame<AccessUnit>> {
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

#[cfg(test)]
mod tests {
    use super::*;

    /// Toy codec: byte 0 is the NAL type. Type 1 is a slice with
    /// `first_slice = byte1 & 0x80`, `intra = byte1 & 0x40` and POC in byte 2;
    /// type 7 is a parameter set, 6 a prefix SEI, 9 a delimiter.
    #[derive(Debug, Default)]
    struct ToyCodec {
        parameter_sets: Vec<Vec<u8>>,
    }

    impl NalCodec for ToyCodec {
        const NAME: &'static str = "toy";

        fn nal_unit_type(nal: &[u8]) -> u8 {
            nal[0]
        }

        fn is_vcl(nal: &[u8]) -> bool {
            nal[0] == 1
        }

        fn handle_nal(&mut self, nal: &[u8], rbsp: &[u8]) -> Result<NalKind> {
            Ok(match rbsp {
                [1, flags, poc, ..] => NalKind::Slice(SliceInfo {
                    first_slice: flags & 0x80 != 0,
                    slice_type: if flags & 0x40 != 0 { SliceType::I } else { SliceType::B },
                    poc: *poc as i32,
                    keyframe: flags & 0x20 != 0,
                    poc_reset: flags & 0x20 != 0,
                    ..Default::default()
                }),
                [1, ..] => bail!(NalError::TruncatedHeader),
                [7, ..] => {
                    self.parameter_sets.push(nal.to_vec());
                    NalKind::ParameterSet
                }
                [6, ..] => NalKind::Prefix,
                [9, ..] => NalKind::Delimiter,
                [12, ..] => NalKind::Suffix,
                _ => NalKind::Discard,
            })
        }

        fn frame_duration(&self) -> Option<Timestamp> {
            None
        }

        fn parameter_sets(&self) -> Vec<Vec<u8>> {
            self.parameter_sets.clone()
        }
    }

    fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
        nals.iter()
            .flat_map(|nal| [&[0u8, 0, 0, 1][..], *nal].concat())
            .collect()
    }

    fn pictures(pocs: &[(u8, u8)]) -> Vec<u8> {
        let nals: Vec<Vec<u8>> = pocs.iter().map(|&(flags, poc)| vec![1, flags, poc, 0xAB]).collect();
        let refs: Vec<&[u8]> = nals.iter().map(Vec::as_slice).collect();
        annex_b(&refs)
    }

    #[test]
    fn access_units_are_length_prefixed() -> Result<()> {
        let mut parser = NalParser::<ToyCodec>::default();
        let data = annex_b(&[&[7, 0x42], &[6, 0x05], &[1, 0xE0, 0, 0x11], &[1, 0x40, 0, 0x22]]);
        for chunk in data.chunks(3) {
            parser.add_bytes(chunk)?;
        }
        parser.flush()?;

        let frame = parser.get_frame().expect("one access unit");
        assert_eq!(
            frame.data,
            vec![
                0, 0, 0, 2, 7, 0x42, 0, 0, 0, 2, 6, 0x05, 0, 0, 0, 4, 1, 0xE0, 0, 0x11, 0, 0, 0,
                4, 1, 0x40, 0, 0x22
            ]
        );
        assert_eq!(frame.header.nal_unit_types, vec![7, 6, 1, 1]);
        assert_eq!(frame.stream_position, 4);
        assert!(frame.keyframe);
        assert_eq!(frame.timestamp, Some(Timestamp::ZERO));
        assert_eq!(frame.duration, Some(FALLBACK_FRAME_DURATION));
        assert_eq!(parser.frame_available(), 0);
        assert_eq!(parser.codec().parameter_sets(), vec![vec![7, 0x42]]);
        assert_eq!(parser.parsed_stream_position(), data.len() as u64);
        Ok(())
    }

    #[test]
    fn presentation_order_within_segments() -> Result<()> {
        // I0 P4 B2 B1 B3 | I0 P2 B1 (decode order, POC in the second byte)
        let data = pictures(&[
            (0xE0, 0),
            (0x80, 4),
            (0x80, 2),
            (0x80, 1),
            (0x80, 3),
            (0xE0, 0),
            (0x80, 2),
            (0x80, 1),
        ]);

        let mut parser = NalParser::<ToyCodec>::default();
        parser.set_default_duration(Timestamp::from_ms(20));
        parser.add_bytes(&data)?;
        assert_eq!(parser.frame_available(), 5);
        parser.flush()?;

        let frames: Vec<_> = parser.frames().collect();
        let pts: Vec<i64> = frames
            .iter()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect();
        assert_eq!(pts, vec![0, 80, 40, 20, 60, 100, 140, 120]);

        let decode_order: Vec<u64> = frames.iter().map(|f| f.header.decode_index).collect();
        assert_eq!(decode_order, (0..8).collect::<Vec<_>>());
        assert_eq!(frames[1].header.slice_type, SliceType::B);
        Ok(())
    }

    #[test]
    fn open_gop_intra_starts_a_segment() -> Result<()> {
        // I8 with leading B6 B7, no POC reset
        let data = pictures(&[(0xC0, 0), (0x80, 4), (0xC0, 8), (0x80, 6), (0x80, 7)]);

        let mut parser = NalParser::<ToyCodec>::default();
        parser.add_bytes(&data)?;
        parser.flush()?;

        let pts: Vec<i64> = parser
            .frames()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect();
        assert_eq!(pts, vec![0, 40, 160, 80, 120]);
        Ok(())
    }

    #[test]
    fn provided_timestamps_are_sorted_into_presentation_order() -> Result<()> {
        let data = pictures(&[(0xE0, 0), (0x80, 2), (0x80, 1), (0xE0, 0)]);

        let mut parser = NalParser::<ToyCodec>::default();
        for ms in [100, 140, 120] {
            parser.add_timestamp(Timestamp::from_ms(ms));
        }
        parser.add_bytes(&data)?;
        parser.flush()?;

        let pts: Vec<i64> = parser
            .frames()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect();
        assert_eq!(pts, vec![100, 140, 120, 180]);
        Ok(())
    }

    #[test]
    fn short_timestamp_queues_keep_the_timeline_monotonic() -> Result<()> {
        let data = pictures(&[
            (0xE0, 0),
            (0x80, 1),
            (0x80, 2),
            (0x80, 3),
            (0xE0, 0),
            (0x80, 2),
            (0x80, 1),
        ]);

        let mut parser = NalParser::<ToyCodec>::default();
        for ms in [0, 40, 80] {
            parser.add_timestamp(Timestamp::from_ms(ms));
        }
        parser.add_bytes(&data)?;
        assert_eq!(parser.frame_available(), 4);

        // 100 ms lies before the end of the first segment
        parser.add_timestamp(Timestamp::from_ms(100));
        parser.add_timestamp(Timestamp::from_ms(300));
        parser.flush()?;

        let pts: Vec<i64> = parser
            .frames()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect();
        assert_eq!(pts, vec![0, 40, 80, 120, 300, 380, 340]);
        Ok(())
    }

    #[test]
    fn timestamps_continue_after_an_exhausted_queue() -> Result<()> {
        let data = pictures(&[
            (0xE0, 0),
            (0x80, 1),
            (0x80, 2),
            (0x80, 3),
            (0xE0, 0),
            (0x80, 1),
        ]);

        let mut parser = NalParser::<ToyCodec>::default();
        for ms in [0, 40, 80] {
            parser.add_timestamp(Timestamp::from_ms(ms));
        }
        parser.add_bytes(&data)?;
        parser.flush()?;

        let pts: Vec<i64> = parser
            .frames()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect();
        assert_eq!(pts, vec![0, 40, 80, 120, 160, 200]);
        Ok(())
    }

    #[test]
    fn delimiters_split_and_are_dropped() -> Result<()> {
        let data = annex_b(&[
            &[9, 0x10],
            &[1, 0xE0, 0, 1],
            &[12, 0x01],
            &[9, 0x10],
            &[1, 0x80, 1, 1],
        ]);

        let mut parser = NalParser::<ToyCodec>::default();
        parser.set_nalu_size_length(2)?;
        parser.add_bytes(&data)?;
        parser.flush()?;

        let frames: Vec<_> = parser.frames().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![0, 4, 1, 0xE0, 0, 1, 0, 2, 12, 0x01]);
        assert_eq!(frames[1].header.nal_unit_types, vec![1]);
        Ok(())
    }

    #[test]
    fn parameter_sets_can_be_stripped() -> Result<()> {
        let mut parser = NalParser::<ToyCodec>::default();
        parser.set_keep_parameter_sets_in_frames(false);
        parser.add_bytes(&annex_b(&[&[7, 0x42], &[1, 0xE0, 0, 1]]))?;
        parser.flush()?;

        let frame = parser.get_frame().expect("access unit");
        assert_eq!(frame.header.nal_unit_types, vec![1]);
        assert_eq!(parser.codec().parameter_sets().len(), 1);
        Ok(())
    }

    #[test]
    fn garbage_and_broken_units() -> Result<()> {
        let mut data = vec![0xFF, 0xFE, 0x00];
        data.extend(annex_b(&[&[1, 0xE0, 0, 1], &[1], &[5, 5]]));
        data.extend([0, 0, 1]);
        data.extend(annex_b(&[&[1, 0x80, 1, 1]]));

        let mut parser = NalParser::<ToyCodec>::default();
        parser.add_bytes(&data)?;
        parser.flush()?;

        assert_eq!(parser.garbage_size(), 2);
        let frames: Vec<_> = parser.frames().collect();
        assert_eq!(frames.len(), 2);
        // The truncated slice is kept in the access unit in progress
        assert!(frames[0].incomplete);
        assert_eq!(frames[0].garbage_before, 2);
        assert_eq!(frames[0].header.nal_unit_types, vec![1, 1]);
        assert_eq!(parser.dropped_nal_units(), 0);
        Ok(())
    }

    #[test]
    fn nalu_size_length_limits() {
        let mut parser = NalParser::<ToyCodec>::default();
        assert!(parser.set_nalu_size_length(0).is_err());
        assert!(parser.set_nalu_size_length(5).is_err());
        assert!(parser.set_nalu_size_length(3).is_ok());
        assert_eq!(parser.nalu_size_length(), 3);

        let mut frame = new_frame(0, 0);
        let nal = vec![1u8; 256];
        assert!(write_nal::<ToyCodec>(&mut frame, &nal, 1).is_err());
        assert!(write_nal::<ToyCodec>(&mut frame, &nal, 2).is_ok());
        assert_eq!(&frame.data[..3], &[1, 0, 1]);

        let nals = split_length_prefixed(&frame.data, 2).expect("well formed");
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].len(), 256);
        assert!(split_length_prefixed(&frame.data[..100], 2).is_err());
    }
}
