use std::collections::VecDeque;

use anyhow::{Result, bail};
use log::{debug, info, warn};

use crate::process::hevc::{HevcCodec, HevcParser};
use crate::process::nal::{NalCodec, split_length_prefixed, write_length_prefixed};
use crate::process::{EsParser, Frame};
use crate::structs::hevc::{NAL_UNSPEC62, NAL_UNSPEC63};
use crate::structs::nal::AccessUnit;
use crate::utils::errors::NalError;

/// NAL unit header prepended to every enhancement layer NAL unit.
const EL_NAL_HEADER: [u8; 2] = [NAL_UNSPEC63 << 1, 0x01];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CombinerState {
    /// No enhancement layer data seen yet.
    #[default]
    Pending,
    Started,
    Finished,
}

/// What happens to base layer frames that never get an enhancement layer
/// counterpart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnmatchedBaseLayerPolicy {
    #[default]
    EmitAlone,
    /// Emit alone and mark the frame as `incomplete`.
    EmitAloneFlagged,
}

/// Merges Dolby Vision enhancement layer access units into the base layer
/// access unit with the same decode index.
///
/// Enhancement layer NAL units are wrapped in NAL units of type 63, the RPU
/// (NAL unit type 62) is appended last.
#[derive(Debug)]
pub struct DoviCombiner {
    state: CombinerState,
    policy: UnmatchedBaseLayerPolicy,
    nalu_size_length: u8,
    base: VecDeque<Frame<AccessUnit>>,
    enhancement: VecDeque<Frame<AccessUnit>>,
    frames: VecDeque<Frame<AccessUnit>>,
    combined: u64,
    unmatched_base: u64,
    dropped_enhancement: u64,
}

impl Default for DoviCombiner {
    fn default() -> Self {
        Self {
            state: CombinerState::Pending,
            policy: UnmatchedBaseLayerPolicy::default(),
            nalu_size_length: 4,
            base: VecDeque::new(),
            enhancement: VecDeque::new(),
            frames: VecDeque::new(),
            combined: 0,
            unmatched_base: 0,
            dropped_enhancement: 0,
        }
    }
}

impl DoviCombiner {
    pub fn new(policy: UnmatchedBaseLayerPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn state(&self) -> CombinerState {
        self.state
    }

    pub fn set_policy(&mut self, policy: UnmatchedBaseLayerPolicy) {
        self.policy = policy;
    }

    /// Must match the size prefix length used by both layer parsers.
    pub fn set_nalu_size_length(&mut self, length: u8) -> Result<()> {
        if !(1..=4).contains(&length) {
            bail!(NalError::InvalidNaluSizeLength(length));
        }

        self.nalu_size_length = length;
        Ok(())
    }

    pub fn add_base_layer_frame(&mut self, frame: Frame<AccessUnit>) -> Result<()> {
        self.base.push_back(frame);
        self.combine()
    }

    pub fn add_enhancement_layer_frame(&mut self, frame: Frame<AccessUnit>) -> Result<()> {
        match self.state {
            CombinerState::Finished => {
                warn!("Enhancement layer frame after the end of the stream dropped");
                self.dropped_enhancement += 1;
                return Ok(());
            }
            CombinerState::Pending => {
                debug!("First Dolby Vision enhancement layer frame");
                self.state = CombinerState::Started;
            }
            CombinerState::Started => {}
        }

        self.enhancement.push_back(frame);
        self.combine()
    }

    /// No more frames of either layer will arrive. Buffered base layer
    /// frames are released without enhancement layer data.
    pub fn finish(&mut self) -> Result<()> {
        self.state = CombinerState::Finished;
        self.combine()?;

        self.dropped_enhancement += self.enhancement.len() as u64;
        self.enhancement.clear();

        if self.unmatched_base > 0 || self.dropped_enhancement > 0 {
            info!(
                "Dolby Vision: {} frames combined, {} base layer frames without enhancement layer, {} enhancement layer frames dropped",
                self.combined, self.unmatched_base, self.dropped_enhancement
            );
        }

        Ok(())
    }

    pub fn frame_available(&self) -> usize {
        self.frames.len()
    }

    pub fn get_frame(&mut self) -> Option<Frame<AccessUnit>> {
        self.frames.pop_front()
    }

    pub fn combined_frames(&self) -> u64 {
        self.combined
    }

    pub fn unmatched_base_layer_frames(&self) -> u64 {
        self.unmatched_base
    }

    pub fn dropped_enhancement_layer_frames(&self) -> u64 {
        self.dropped_enhancement
    }

    fn combine(&mut self) -> Result<()> {
        while let Some(base) = self.base.front() {
            let base_index = base.header.decode_index;

            match self.enhancement.front().map(|el| el.header.decode_index) {
                Some(el_index) if el_index < base_index => {
                    debug!("Enhancement layer frame {el_index} has no base layer frame");
                    self.enhancement.pop_front();
                    self.dropped_enhancement += 1;
                }
                Some(el_index) if el_index == base_index => {
                    if let (Some(mut base), Some(el)) =
                        (self.base.pop_front(), self.enhancement.pop_front())
                    {
                        self.append_enhancement_layer(&mut base, &el)?;
                        base.dependent = true;
                        self.combined += 1;
                        self.frames.push_back(base);
                    }
                }
                Some(_) => self.emit_unmatched(),
                None if self.state == CombinerState::Finished => self.emit_unmatched(),
                None => break,
            }
        }

        Ok(())
    }

    fn emit_unmatched(&mut self) {
        let Some(mut base) = self.base.pop_front() else {
            return;
        };

        self.unmatched_base += 1;
        if self.policy == UnmatchedBaseLayerPolicy::EmitAloneFlagged {
            base.incomplete = true;
        }
        self.frames.push_back(base);
    }

    fn append_enhancement_layer(
        &self,
        base: &mut Frame<AccessUnit>,
        el: &Frame<AccessUnit>,
    ) -> Result<()> {
        let length = self.nalu_size_length;
        let mut rpus = Vec::new();

        for nal in split_length_prefixed(&el.data, length)? {
            if HevcCodec::nal_unit_type(nal) == NAL_UNSPEC62 {
                rpus.push(nal);
                continue;
            }

            let wrapped = [&EL_NAL_HEADER[..], nal].concat();
            write_length_prefixed(&mut base.data, &wrapped, length)?;
            base.header.nal_unit_types.push(NAL_UNSPEC63);
        }

        for rpu in rpus {
            write_length_prefixed(&mut base.data, rpu, length)?;
            base.header.nal_unit_types.push(NAL_UNSPEC62);
        }

        base.incomplete |= el.incomplete;
        Ok(())
    }
}

/// HEVC parser for a Dolby Vision dual layer stream.
///
/// Bytes given to [`add_bytes`](EsParser::add_bytes) are the base layer,
/// the enhancement layer arrives through
/// [`add_enhancement_layer_bytes`](Self::add_enhancement_layer_bytes).
/// Without enhancement layer input the output equals the plain base layer.
#[derive(Debug, Default)]
pub struct DoviParser {
    base: HevcParser,
    enhancement: HevcParser,
    combiner: DoviCombiner,
}

impl DoviParser {
    pub fn base_layer(&self) -> &HevcParser {
        &self.base
    }

    pub fn enhancement_layer(&self) -> &HevcParser {
        &self.enhancement
    }

    pub fn combiner(&self) -> &DoviCombiner {
        &self.combiner
    }

    pub fn set_policy(&mut self, policy: UnmatchedBaseLayerPolicy) {
        self.combiner.set_policy(policy);
    }

    pub fn set_nalu_size_length(&mut self, length: u8) -> Result<()> {
        self.base.set_nalu_size_length(length)?;
        self.enhancement.set_nalu_size_length(length)?;
        self.combiner.set_nalu_size_length(length)
    }

    pub fn add_enhancement_layer_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.enhancement.add_bytes(data)?;
        self.drain()
    }

    /// Checks whether the enhancement layer carries any RPU.
    pub fn has_rpu(frame: &Frame<AccessUnit>) -> bool {
        frame.header.nal_unit_types.contains(&NAL_UNSPEC62)
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(frame) = self.enhancement.get_frame() {
            self.combiner.add_enhancement_layer_frame(frame)?;
        }
        while let Some(frame) = self.base.get_frame() {
            self.combiner.add_base_layer_frame(frame)?;
        }

        Ok(())
    }
}

impl EsParser for DoviParser {
    type Header = AccessUnit;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.base.add_bytes(data)?;
        self.drain()
    }

    fn flush(&mut self) -> Result<()> {
        self.enhancement.flush()?;
        self.base.flush()?;
        self.drain()?;
        self.combiner.finish()
    }

    fn frame_available(&self) -> usize {
        self.combiner.frame_available()
    }

    fn get_frame(&mut self) -> Option<Frame<AccessUnit>> {
        self.combiner.get_frame()
    }

    fn parsed_stream_position(&self) -> u64 {
        self.base.parsed_stream_position()
    }

    fn total_stream_position(&self) -> u64 {
        self.base.total_stream_position()
    }

    fn garbage_size(&self) -> u64 {
        self.base.garbage_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::hevc::test_nals::*;
    use crate::structs::hevc::{NAL_IDR_W_RADL, NAL_TRAIL_R};
    use crate::utils::testing::annex_b;

    fn frame(decode_index: u64, nals: &[&[u8]]) -> Frame<AccessUnit> {
        let mut data = Vec::new();
        for nal in nals {
            data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            data.extend_from_slice(nal);
        }

        let header = AccessUnit {
            decode_index,
            nal_unit_types: nals.iter().map(|nal| HevcCodec::nal_unit_type(nal)).collect(),
            ..Default::default()
        };
        Frame::new(header, data, 0)
    }

    fn base_stream() -> Vec<u8> {
        annex_b(&[
            vps(),
            sps(),
            pps(),
            slice(NAL_IDR_W_RADL, 0, 2, 0),
            slice(NAL_TRAIL_R, 0, 1, 1),
            slice(NAL_TRAIL_R, 0, 1, 2),
        ])
    }

    #[test]
    fn layers_are_combined_by_decode_index() -> Result<()> {
        let mut combiner = DoviCombiner::default();
        let bl_slice: &[u8] = &[0x26, 0x01, 0xAA];
        let el_slice: &[u8] = &[0x26, 0x01, 0xBB];
        let rpu: &[u8] = &[0x7C, 0x01, 0x19, 0x08];

        combiner.add_base_layer_frame(frame(0, &[bl_slice]))?;
        assert_eq!(combiner.state(), CombinerState::Pending);
        assert_eq!(combiner.frame_available(), 0);

        combiner.add_enhancement_layer_frame(frame(0, &[rpu, el_slice]))?;
        assert_eq!(combiner.state(), CombinerState::Started);

        let combined = combiner.get_frame().expect("combined frame");
        assert_eq!(
            combined.data,
            vec![
                0, 0, 0, 3, 0x26, 0x01, 0xAA, 0, 0, 0, 5, 0x7E, 0x01, 0x26, 0x01, 0xBB, 0, 0, 0,
                4, 0x7C, 0x01, 0x19, 0x08
            ]
        );
        assert_eq!(combined.header.nal_unit_types, vec![19, 63, 62]);
        assert!(combined.dependent);
        assert!(DoviParser::has_rpu(&combined));
        Ok(())
    }

    #[test]
    fn mismatched_decode_indices() -> Result<()> {
        let slice: &[u8] = &[0x02, 0x01, 0xAA];
        let mut combiner = DoviCombiner::new(UnmatchedBaseLayerPolicy::EmitAloneFlagged);

        // EL 0 has no BL partner, BL 1 has no EL partner
        combiner.add_enhancement_layer_frame(frame(0, &[slice]))?;
        combiner.add_enhancement_layer_frame(frame(2, &[slice]))?;
        combiner.add_base_layer_frame(frame(1, &[slice]))?;
        combiner.add_base_layer_frame(frame(2, &[slice]))?;
        combiner.add_base_layer_frame(frame(3, &[slice]))?;
        combiner.finish()?;

        let frames: Vec<_> = std::iter::from_fn(|| combiner.get_frame()).collect();
        let summary: Vec<(u64, usize, bool, bool)> = frames
            .iter()
            .map(|f| {
                (
                    f.header.decode_index,
                    f.header.nal_unit_types.len(),
                    f.incomplete,
                    f.dependent,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![(1, 1, true, false), (2, 2, false, true), (3, 1, true, false)]
        );
        assert_eq!(combiner.combined_frames(), 1);
        assert_eq!(combiner.unmatched_base_layer_frames(), 2);
        assert_eq!(combiner.dropped_enhancement_layer_frames(), 1);
        assert_eq!(combiner.state(), CombinerState::Finished);
        Ok(())
    }

    #[test]
    fn base_layer_only_stream_is_emitted_at_flush() -> Result<()> {
        let mut parser = DoviParser::default();
        parser.add_bytes(&base_stream())?;
        assert_eq!(parser.frame_available(), 0);

        parser.flush()?;
        let frames: Vec<_> = parser.frames().collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| !f.incomplete && !f.dependent));
        assert_eq!(parser.combiner().state(), CombinerState::Finished);
        assert_eq!(parser.combiner().unmatched_base_layer_frames(), 3);
        Ok(())
    }

    #[test]
    fn dual_layer_stream() -> Result<()> {
        let mut parser = DoviParser::default();
        parser.add_enhancement_layer_bytes(&base_stream())?;
        parser.add_enhancement_layer_bytes(&annex_b(&[vec![0x7C, 0x01, 0x19, 0x08]]))?;
        parser.add_bytes(&base_stream())?;
        parser.flush()?;

        let frames: Vec<_> = parser.frames().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(parser.combiner().combined_frames(), 3);
        assert_eq!(
            frames[0].header.nal_unit_types,
            vec![32, 33, 34, 19, 63, 63, 63, 63]
        );
        assert_eq!(frames[2].header.nal_unit_types, vec![1, 63, 62]);
        assert!(frames.iter().all(|f| f.keyframe == (f.header.decode_index == 0)));
        assert!(frames.iter().all(|f| f.dependent));
        Ok(())
    }
}
