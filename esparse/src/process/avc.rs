use anyhow::Result;
use log::debug;

use crate::process::nal::{NalCodec, NalKind, NalParser, SliceInfo};
use crate::structs::avc::{
    NAL_AUD, NAL_END_OF_SEQUENCE, NAL_END_OF_STREAM, NAL_FILLER_DATA, NAL_IDR_SLICE, NAL_PPS,
    NAL_PREFIX, NAL_SEI, NAL_SLICE, NAL_SLICE_DPA, NAL_SLICE_DPB, NAL_SLICE_DPC, NAL_SPS,
    NAL_SPS_EXT, NAL_SUBSET_SPS, NalHeader, Pps, SliceHeader, Sps,
};
use crate::structs::nal::ParameterSetStore;
use crate::structs::timestamp::Timestamp;

/// AVC Annex B elementary stream parser.
///
/// ```rust
/// use esparse::process::EsParser;
/// use esparse::process::avc::AvcParser;
///
/// let mut parser = AvcParser::default();
/// parser.add_bytes(&[0x00, 0x00, 0x00, 0x01, 0x09, 0xF0])?;
/// parser.flush()?;
///
/// assert_eq!(parser.frame_available(), 0);
/// assert!(parser.codec().active_sps().is_none());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub type AvcParser = NalParser<AvcCodec>;

/// Picture order count state carried from picture to picture, H.264 8.2.1.
#[derive(Debug, Default)]
struct PocState {
    /// `prevPicOrderCntMsb` / `prevPicOrderCntLsb` of the previous reference picture.
    prev_msb: i32,
    prev_lsb: i32,
    prev_frame_num_offset: i64,
    prev_frame_num: u32,
    prev_mmco5: bool,
}

impl PocState {
    /// Returns the picture order count of the picture starting with `slice`:
    /// the field's own count for field pictures, the smaller of both fields
    /// for frames.
    fn picture_poc(&mut self, slice: &SliceHeader, sps: &Sps) -> i32 {
        let idr = slice.is_idr();
        let frame_num_offset = if idr {
            0
        } else {
            let prev = if self.prev_mmco5 { 0 } else { self.prev_frame_num_offset };
            if self.prev_frame_num > slice.frame_num {
                prev + sps.max_frame_num() as i64
            } else {
                prev
            }
        };

        let (top, bottom) = match sps.pic_order_cnt_type {
            0 => self.type0(slice, sps),
            1 => type1(slice, sps, frame_num_offset),
            _ => {
                let temp = match (idr, slice.nal_ref_idc) {
                    (true, _) => 0,
                    (false, 0) => 2 * (frame_num_offset + slice.frame_num as i64) - 1,
                    (false, _) => 2 * (frame_num_offset + slice.frame_num as i64),
                };
                (temp as i32, temp as i32)
            }
        };

        let poc = match (slice.field_pic, slice.bottom_field) {
            (false, _) => top.min(bottom),
            (true, false) => top,
            (true, true) => bottom,
        };

        self.prev_frame_num_offset = frame_num_offset;
        self.prev_frame_num = if slice.mmco5 { 0 } else { slice.frame_num };
        self.prev_mmco5 = slice.mmco5;

        poc
    }

    fn type0(&mut self, slice: &SliceHeader, sps: &Sps) -> (i32, i32) {
        let (prev_msb, prev_lsb) = if slice.is_idr() {
            (0, 0)
        } else {
            (self.prev_msb, self.prev_lsb)
        };

        let max_lsb = 1i32 << sps.log2_max_pic_order_cnt_lsb;
        let lsb = slice.pic_order_cnt_lsb as i32;
        let msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
            prev_msb + max_lsb
        } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
            prev_msb - max_lsb
        } else {
            prev_msb
        };

        let top = msb + lsb;
        let bottom = if slice.field_pic {
            top
        } else {
            top + slice.delta_pic_order_cnt_bottom
        };

        if slice.nal_ref_idc != 0 {
            if slice.mmco5 {
                // Counts restart relative to this picture
                self.prev_msb = 0;
                self.prev_lsb = if slice.field_pic { 0 } else { top - top.min(bottom) };
            } else {
                self.prev_msb = msb;
                self.prev_lsb = lsb;
            }
        }

        (top, bottom)
    }
}

fn type1(slice: &SliceHeader, sps: &Sps, frame_num_offset: i64) -> (i32, i32) {
    let cycle = &sps.offset_for_ref_frame;
    let mut abs_frame_num = if cycle.is_empty() {
        0
    } else {
        frame_num_offset + slice.frame_num as i64
    };
    if slice.nal_ref_idc == 0 && abs_frame_num > 0 {
        abs_frame_num -= 1;
    }

    let mut expected = 0i64;
    if abs_frame_num > 0 {
        let delta_per_cycle: i64 = cycle.iter().map(|&o| o as i64).sum();
        let cycle_count = (abs_frame_num - 1) / cycle.len() as i64;
        let in_cycle = ((abs_frame_num - 1) % cycle.len() as i64) as usize;

        expected = cycle_count * delta_per_cycle
            + cycle[..=in_cycle].iter().map(|&o| o as i64).sum::<i64>();
    }
    if slice.nal_ref_idc == 0 {
        expected += sps.offset_for_non_ref_pic as i64;
    }

    let [delta0, delta1] = slice.delta_pic_order_cnt.map(i64::from);
    let top_to_bottom = sps.offset_for_top_to_bottom_field as i64;
    let (top, bottom) = match (slice.field_pic, slice.bottom_field) {
        (false, _) => {
            let top = expected + delta0;
            (top, top + top_to_bottom + delta1)
        }
        (true, false) => (expected + delta0, expected + delta0),
        (true, true) => {
            let bottom = expected + top_to_bottom + delta0;
            (bottom, bottom)
        }
    };

    (top as i32, bottom as i32)
}

/// An unpaired field waiting for its second field.
#[derive(Debug, Clone, Copy)]
struct OpenField {
    frame_num: u32,
    bottom: bool,
    reference: bool,
}

#[derive(Debug)]
pub struct AvcCodec {
    spss: ParameterSetStore<Sps>,
    ppss: ParameterSetStore<Pps>,
    active_sps: Option<u32>,
    prev_slice: Option<SliceHeader>,
    poc: PocState,
    current_poc: i32,
    open_field: Option<OpenField>,
}

impl Default for AvcCodec {
    fn default() -> Self {
        Self {
            spss: ParameterSetStore::new("SPS"),
            ppss: ParameterSetStore::new("PPS"),
            active_sps: None,
            prev_slice: None,
            poc: PocState::default(),
            current_poc: 0,
            open_field: None,
        }
    }
}

impl AvcCodec {
    pub fn sps(&self, id: u32) -> Option<&Sps> {
        self.spss.get(id)
    }

    pub fn pps(&self, id: u32) -> Option<&Pps> {
        self.ppss.get(id)
    }

    /// The SPS referenced by the last slice.
    pub fn active_sps(&self) -> Option<&Sps> {
        self.spss.get(self.active_sps?)
    }

    fn handle_slice(&mut self, rbsp: &[u8]) -> Result<NalKind> {
        let slice = SliceHeader::decode(rbsp, &self.spss, &self.ppss)?;
        let sps = self.spss.require(slice.sps_id)?;
        self.active_sps = Some(slice.sps_id);

        let first_slice = self
            .prev_slice
            .as_ref()
            .is_none_or(|prev| slice.starts_new_picture(prev, sps));
        if !first_slice {
            let info = SliceInfo {
                slice_type: slice.slice_type,
                poc: self.current_poc,
                ..Default::default()
            };
            self.prev_slice = Some(slice);
            return Ok(NalKind::Slice(info));
        }

        let reference = slice.nal_ref_idc != 0;
        let second_field = slice.field_pic
            && !slice.is_idr()
            && self.open_field.is_some_and(|open| {
                open.frame_num == slice.frame_num
                    && open.bottom != slice.bottom_field
                    && open.reference == reference
            });

        self.open_field = (slice.field_pic && !second_field).then_some(OpenField {
            frame_num: slice.frame_num,
            bottom: slice.bottom_field,
            reference,
        });

        let poc_reset = slice.is_idr() || self.poc.prev_mmco5;
        let poc = self.poc.picture_poc(&slice, sps);
        self.current_poc = poc;

        if poc_reset {
            debug!("AVC picture order count reset at frame_num {}", slice.frame_num);
        }

        let info = SliceInfo {
            first_slice: true,
            second_field,
            slice_type: slice.slice_type,
            poc,
            keyframe: slice.is_idr(),
            poc_reset,
            incomplete: false,
        };
        self.prev_slice = Some(slice);

        Ok(NalKind::Slice(info))
    }
}

impl NalCodec for AvcCodec {
    const NAME: &'static str = "AVC";

    fn nal_unit_type(nal: &[u8]) -> u8 {
        nal.first().map_or(0, |byte| byte & 0x1F)
    }

    fn is_vcl(nal: &[u8]) -> bool {
        (NAL_SLICE..=NAL_IDR_SLICE).contains(&Self::nal_unit_type(nal))
    }

    fn handle_nal(&mut self, nal: &[u8], rbsp: &[u8]) -> Result<NalKind> {
        let header = NalHeader::decode(rbsp)?;

        Ok(match header.nal_unit_type {
            NAL_SLICE | NAL_SLICE_DPA | NAL_IDR_SLICE => self.handle_slice(rbsp)?,
            NAL_SLICE_DPB | NAL_SLICE_DPC => NalKind::Suffix,
            NAL_SPS => {
                let sps = Sps::decode(rbsp)?;
                self.spss.insert(sps.id, nal, sps);
                NalKind::ParameterSet
            }
            NAL_PPS => {
                let pps = Pps::decode(rbsp)?;
                self.ppss.insert(pps.id, nal, pps);
                NalKind::ParameterSet
            }
            NAL_SPS_EXT | NAL_SUBSET_SPS => NalKind::ParameterSet,
            NAL_AUD => NalKind::Delimiter,
            NAL_SEI | NAL_PREFIX | 16..=18 => NalKind::Prefix,
            NAL_END_OF_SEQUENCE | NAL_END_OF_STREAM => {
                self.prev_slice = None;
                NalKind::Suffix
            }
            NAL_FILLER_DATA => NalKind::Discard,
            _ => NalKind::Suffix,
        })
    }

    fn frame_duration(&self) -> Option<Timestamp> {
        self.active_sps()
            .or_else(|| self.spss.get(0))
            .and_then(Sps::frame_duration_ns)
            .map(Timestamp::from_ns)
    }

    fn parameter_sets(&self) -> Vec<Vec<u8>> {
        self.spss
            .raw()
            .chain(self.ppss.raw())
            .map(<[u8]>::to_vec)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EsParser;
    use crate::structs::avc::test_nals::*;
    use crate::process::Frame;
    use crate::structs::nal::{AccessUnit, SliceType};
    use crate::utils::testing::annex_b;

    fn run(data: &[u8]) -> Result<(AvcParser, Vec<Frame<AccessUnit>>)> {
        let mut parser = AvcParser::default();
        for chunk in data.chunks(7) {
            parser.add_bytes(chunk)?;
        }
        parser.flush()?;
        let frames = parser.frames().collect();
        Ok((parser, frames))
    }

    fn pts_ms(frames: &[Frame<AccessUnit>]) -> Vec<i64> {
        frames
            .iter()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect()
    }

    #[test]
    fn b_frames_get_presentation_timestamps() -> Result<()> {
        let data = annex_b(&[
            sps(0, true),
            pps(0, 0),
            slice(true, 3, 7, 0, 0),
            slice(false, 2, 5, 1, 6),
            slice(false, 0, 6, 2, 2),
            slice(false, 0, 6, 2, 4),
        ]);
        let (parser, frames) = run(&data)?;

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].header.nal_unit_types, vec![7, 8, 5]);
        assert!(frames[0].keyframe);
        assert!(!frames[1].keyframe);
        assert_eq!(frames[1].header.slice_type, SliceType::P);
        assert_eq!(frames[2].header.slice_type, SliceType::B);

        let pocs: Vec<i32> = frames.iter().map(|f| f.header.poc).collect();
        assert_eq!(pocs, vec![0, 6, 2, 4]);
        assert_eq!(pts_ms(&frames), vec![0, 120, 40, 80]);
        assert_eq!(frames[3].duration, Some(Timestamp::from_ms(40)));

        assert_eq!(parser.codec().active_sps().map(Sps::width), Some(1920));
        assert_eq!(parser.codec().parameter_sets().len(), 2);
        assert_eq!(parser.garbage_size(), 0);
        Ok(())
    }

    #[test]
    fn idr_starts_a_new_segment() -> Result<()> {
        let data = annex_b(&[
            sps(0, true),
            pps(0, 0),
            slice(true, 3, 7, 0, 0),
            slice(false, 2, 5, 1, 4),
            slice(false, 0, 6, 2, 2),
            slice(true, 3, 7, 0, 0),
            slice(false, 2, 5, 1, 2),
        ]);
        let (_, frames) = run(&data)?;

        assert_eq!(pts_ms(&frames), vec![0, 80, 40, 120, 160]);
        let decode_order: Vec<u64> = frames.iter().map(|f| f.header.decode_index).collect();
        assert_eq!(decode_order, vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn mmco5_resets_picture_order() -> Result<()> {
        let data = annex_b(&[
            sps(0, true),
            pps(0, 0),
            slice(true, 3, 7, 0, 0),
            slice(false, 2, 5, 1, 4),
            mmco5_slice(2, 8),
            slice(false, 2, 5, 1, 2),
        ]);
        let (_, frames) = run(&data)?;

        let pocs: Vec<i32> = frames.iter().map(|f| f.header.poc).collect();
        assert_eq!(pocs, vec![0, 4, 8, 2]);
        assert_eq!(pts_ms(&frames), vec![0, 40, 80, 120]);
        Ok(())
    }

    #[test]
    fn field_pairs_form_one_frame() -> Result<()> {
        let data = annex_b(&[
            sps(0, false),
            pps(0, 0),
            field_slice(true, false, 0, 0),
            field_slice(false, true, 0, 1),
            field_slice(false, false, 1, 4),
            field_slice(false, true, 1, 5),
        ]);
        let (_, frames) = run(&data)?;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.nal_unit_types, vec![7, 8, 5, 1]);
        assert_eq!(frames[1].header.nal_unit_types, vec![1, 1]);
        assert!(frames[0].keyframe);
        assert_eq!((frames[0].header.poc, frames[1].header.poc), (0, 4));
        assert_eq!(pts_ms(&frames), vec![0, 40]);
        Ok(())
    }

    #[test]
    fn slices_without_parameter_sets_are_dropped() -> Result<()> {
        let data = annex_b(&[
            slice(true, 3, 7, 0, 0),
            sps(0, true),
            pps(0, 0),
            slice(true, 3, 7, 0, 0),
        ]);
        let (parser, frames) = run(&data)?;

        assert_eq!(parser.dropped_nal_units(), 1);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].incomplete);
        Ok(())
    }

    #[test]
    fn repeated_parameter_sets_are_recognised() -> Result<()> {
        let mut codec = AvcCodec::default();
        let raw = sps(0, true);
        codec.handle_nal(&raw, &raw)?;
        codec.handle_nal(&raw, &raw)?;

        assert_eq!(codec.parameter_sets().len(), 1);
        assert_eq!(codec.sps(0).map(|sps| sps.level_idc), Some(40));
        Ok(())
    }
}
