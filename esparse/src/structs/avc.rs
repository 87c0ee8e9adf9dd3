//! H.264 / AVC NAL unit headers, parameter sets and slice headers.

use anyhow::{Result, bail};
use log::trace;

use crate::structs::nal::{
    ColourDescription, EXTENDED_SAR, ParameterSetStore, SliceType, VuiTiming, ceil_log2,
    check_range, sample_aspect_ratio,
};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::NalError;

pub const NAL_SLICE: u8 = 1;
pub const NAL_SLICE_DPA: u8 = 2;
pub const NAL_SLICE_DPB: u8 = 3;
pub const NAL_SLICE_DPC: u8 = 4;
pub const NAL_IDR_SLICE: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;
pub const NAL_END_OF_SEQUENCE: u8 = 10;
pub const NAL_END_OF_STREAM: u8 = 11;
pub const NAL_FILLER_DATA: u8 = 12;
pub const NAL_SPS_EXT: u8 = 13;
pub const NAL_PREFIX: u8 = 14;
pub const NAL_SUBSET_SPS: u8 = 15;

/// Profiles carrying chroma format, bit depth and scaling matrices in the SPS.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
}

impl NalHeader {
    pub fn decode(nal: &[u8]) -> Result<Self> {
        let Some(&byte) = nal.first() else {
            bail!(NalError::TruncatedHeader);
        };
        if byte & 0x80 != 0 {
            bail!(NalError::ForbiddenZeroBit);
        }

        Ok(Self {
            nal_ref_idc: (byte >> 5) & 0x03,
            nal_unit_type: byte & 0x1F,
        })
    }

    pub fn is_idr(&self) -> bool {
        self.nal_unit_type == NAL_IDR_SLICE
    }

    pub fn is_slice(&self) -> bool {
        (NAL_SLICE..=NAL_IDR_SLICE).contains(&self.nal_unit_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vui {
    pub sample_aspect_ratio: Option<(u16, u16)>,
    pub video_full_range: bool,
    pub colour_description: Option<ColourDescription>,
    pub timing: Option<VuiTiming>,
    pub fixed_frame_rate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub delta_pic_order_always_zero: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_allowed: bool,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub mb_adaptive_frame_field: bool,
    pub direct_8x8_inference: bool,
    /// Left, right, top and bottom cropping in crop units.
    pub crop: Option<[u32; 4]>,
    pub vui: Option<Vui>,
}

impl Sps {
    /// Decodes an SPS from its RBSP (NAL header included).
    pub fn decode(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(8)?;

        let mut sps = Self {
            profile_idc: reader.get_n(8)?,
            constraint_flags: reader.get_n(8)?,
            level_idc: reader.get_n(8)?,
            id: check_range("seq_parameter_set_id", reader.get_ue()?, 31)?,
            chroma_format_idc: 1,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            ..Default::default()
        };

        if HIGH_PROFILES.contains(&sps.profile_idc) {
            sps.chroma_format_idc = check_range("chroma_format_idc", reader.get_ue()?, 3)?;
            if sps.chroma_format_idc == 3 {
                sps.separate_colour_plane = reader.get()?;
            }
            sps.bit_depth_luma = check_range("bit_depth_luma_minus8", reader.get_ue()?, 6)? + 8;
            sps.bit_depth_chroma =
                check_range("bit_depth_chroma_minus8", reader.get_ue()?, 6)? + 8;
            reader.skip_n(1)?; // qpprime_y_zero_transform_bypass_flag

            if reader.get()? {
                let lists = if sps.chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if reader.get()? {
                        skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        sps.log2_max_frame_num =
            check_range("log2_max_frame_num_minus4", reader.get_ue()?, 12)? + 4;
        sps.pic_order_cnt_type = check_range("pic_order_cnt_type", reader.get_ue()?, 2)?;

        match sps.pic_order_cnt_type {
            0 => {
                sps.log2_max_pic_order_cnt_lsb =
                    check_range("log2_max_pic_order_cnt_lsb_minus4", reader.get_ue()?, 12)? + 4;
            }
            1 => {
                sps.delta_pic_order_always_zero = reader.get()?;
                sps.offset_for_non_ref_pic = reader.get_se()?;
                sps.offset_for_top_to_bottom_field = reader.get_se()?;
                let cycle = check_range(
                    "num_ref_frames_in_pic_order_cnt_cycle",
                    reader.get_ue()?,
                    255,
                )?;
                sps.offset_for_ref_frame = (0..cycle)
                    .map(|_| reader.get_se())
                    .collect::<std::io::Result<_>>()?;
            }
            _ => {}
        }

        sps.max_num_ref_frames = reader.get_ue()?;
        sps.gaps_in_frame_num_allowed = reader.get()?;
        sps.pic_width_in_mbs = check_range("pic_width_in_mbs_minus1", reader.get_ue()?, 2047)? + 1;
        sps.pic_height_in_map_units =
            check_range("pic_height_in_map_units_minus1", reader.get_ue()?, 2047)? + 1;
        sps.frame_mbs_only = reader.get()?;
        if !sps.frame_mbs_only {
            sps.mb_adaptive_frame_field = reader.get()?;
        }
        sps.direct_8x8_inference = reader.get()?;

        if reader.get()? {
            sps.crop = Some([
                reader.get_ue()?,
                reader.get_ue()?,
                reader.get_ue()?,
                reader.get_ue()?,
            ]);
        }

        if reader.get()? {
            sps.vui = Some(read_vui(&mut reader)?);
        }

        trace!(
            "SPS {}: profile {} level {} {}x{} poc type {}",
            sps.id,
            sps.profile_idc,
            sps.level_idc,
            sps.width(),
            sps.height(),
            sps.pic_order_cnt_type
        );

        Ok(sps)
    }

    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane {
            0
        } else {
            self.chroma_format_idc
        }
    }

    fn crop_units(&self) -> (u32, u32) {
        let (sub_width, sub_height) = match self.chroma_array_type() {
            0 => (1, 1),
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };

        (sub_width, sub_height * (2 - self.frame_mbs_only as u32))
    }

    pub fn width(&self) -> u32 {
        let width = self.pic_width_in_mbs * 16;
        let [left, right, _, _] = self.crop.unwrap_or_default();

        width.saturating_sub(self.crop_units().0.saturating_mul(left.saturating_add(right)))
    }

    pub fn height(&self) -> u32 {
        let height = (2 - self.frame_mbs_only as u32) * self.pic_height_in_map_units * 16;
        let [_, _, top, bottom] = self.crop.unwrap_or_default();

        height.saturating_sub(self.crop_units().1.saturating_mul(top.saturating_add(bottom)))
    }

    pub fn max_frame_num(&self) -> u32 {
        1 << self.log2_max_frame_num
    }

    /// Duration of one frame from the VUI timing info.
    pub fn frame_duration_ns(&self) -> Option<i64> {
        let timing = self.vui.as_ref()?.timing?;
        if timing.time_scale == 0 || timing.num_units_in_tick == 0 {
            return None;
        }

        Some(2 * timing.num_units_in_tick as i64 * 1_000_000_000 / timing.time_scale as i64)
    }
}

fn skip_scaling_list(reader: &mut BsIoSliceReader, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;

    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.get_se()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }

    Ok(())
}

fn read_vui(reader: &mut BsIoSliceReader) -> Result<Vui> {
    let mut vui = Vui::default();

    if reader.get()? {
        let idc: u8 = reader.get_n(8)?;
        vui.sample_aspect_ratio = if idc == EXTENDED_SAR {
            Some((reader.get_n(16)?, reader.get_n(16)?))
        } else {
            sample_aspect_ratio(idc)
        };
    }

    if reader.get()? {
        reader.skip_n(1)?; // overscan_appropriate_flag
    }

    if reader.get()? {
        reader.skip_n(3)?; // video_format
        vui.video_full_range = reader.get()?;
        if reader.get()? {
            vui.colour_description = Some(ColourDescription {
                colour_primaries: reader.get_n(8)?,
                transfer_characteristics: reader.get_n(8)?,
                matrix_coefficients: reader.get_n(8)?,
            });
        }
    }

    if reader.get()? {
        reader.get_ue()?;
        reader.get_ue()?;
    }

    if reader.get()? {
        vui.timing = Some(VuiTiming {
            num_units_in_tick: reader.get_n(32)?,
            time_scale: reader.get_n(32)?,
        });
        vui.fixed_frame_rate = reader.get()?;
    }

    Ok(vui)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pps {
    pub id: u32,
    pub sps_id: u32,
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
    pub num_slice_groups: u32,
    pub slice_group_map_type: u32,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
}

impl Pps {
    pub fn decode(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(8)?;

        let mut pps = Self {
            id: check_range("pic_parameter_set_id", reader.get_ue()?, 255)?,
            sps_id: check_range("seq_parameter_set_id", reader.get_ue()?, 31)?,
            entropy_coding_mode: reader.get()?,
            bottom_field_pic_order_in_frame_present: reader.get()?,
            num_slice_groups: check_range("num_slice_groups_minus1", reader.get_ue()?, 7)? + 1,
            ..Default::default()
        };

        if pps.num_slice_groups > 1 {
            pps.slice_group_map_type = check_range("slice_group_map_type", reader.get_ue()?, 6)?;
            match pps.slice_group_map_type {
                0 => {
                    for _ in 0..pps.num_slice_groups {
                        reader.get_ue()?; // run_length_minus1
                    }
                }
                2 => {
                    for _ in 1..pps.num_slice_groups {
                        reader.get_ue()?; // top_left
                        reader.get_ue()?; // bottom_right
                    }
                }
                3..=5 => {
                    reader.skip_n(1)?; // slice_group_change_direction_flag
                    reader.get_ue()?; // slice_group_change_rate_minus1
                }
                6 => {
                    let map_units = reader.get_ue()? + 1;
                    let bits = ceil_log2(pps.num_slice_groups);
                    for _ in 0..map_units {
                        reader.skip_n(bits)?;
                    }
                }
                _ => {}
            }
        }

        pps.num_ref_idx_l0_default_active =
            check_range("num_ref_idx_l0_default_active_minus1", reader.get_ue()?, 31)? + 1;
        pps.num_ref_idx_l1_default_active =
            check_range("num_ref_idx_l1_default_active_minus1", reader.get_ue()?, 31)? + 1;
        pps.weighted_pred = reader.get()?;
        pps.weighted_bipred_idc = check_range("weighted_bipred_idc", reader.get_n(2)?, 2)?;
        pps.pic_init_qp_minus26 = reader.get_se()?;
        reader.get_se()?; // pic_init_qs_minus26
        reader.get_se()?; // chroma_qp_index_offset
        pps.deblocking_filter_control_present = reader.get()?;
        pps.constrained_intra_pred = reader.get()?;
        pps.redundant_pic_cnt_present = reader.get()?;

        trace!("PPS {} -> SPS {}", pps.id, pps.sps_id);

        Ok(pps)
    }
}

/// Slice header fields up to and including `dec_ref_pic_marking()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub nal_unit_type: u8,
    pub nal_ref_idc: u8,
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pps_id: u32,
    pub sps_id: u32,
    pub frame_num: u32,
    pub field_pic: bool,
    pub bottom_field: bool,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pub redundant_pic_cnt: u32,
    pub no_output_of_prior_pics: bool,
    pub long_term_reference: bool,
    /// `memory_management_control_operation` 5 is present.
    pub mmco5: bool,
}

impl SliceHeader {
    /// Reads `first_mb_in_slice`, `slice_type` and `pic_parameter_set_id`.
    pub fn decode_prefix(rbsp: &[u8]) -> Result<(u32, SliceType, u32)> {
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(8)?;

        Ok((
            reader.get_ue()?,
            SliceType::from_avc(reader.get_ue()?)?,
            check_range("pic_parameter_set_id", reader.get_ue()?, 255)?,
        ))
    }

    pub fn decode(
        rbsp: &[u8],
        spss: &ParameterSetStore<Sps>,
        ppss: &ParameterSetStore<Pps>,
    ) -> Result<Self> {
        let nal = NalHeader::decode(rbsp)?;
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(8)?;

        let mut slice = Self {
            nal_unit_type: nal.nal_unit_type,
            nal_ref_idc: nal.nal_ref_idc,
            first_mb_in_slice: reader.get_ue()?,
            slice_type: SliceType::from_avc(reader.get_ue()?)?,
            pps_id: check_range("pic_parameter_set_id", reader.get_ue()?, 255)?,
            ..Default::default()
        };

        let pps = ppss.require(slice.pps_id)?;
        let sps = spss.require(pps.sps_id)?;
        slice.sps_id = pps.sps_id;

        if sps.separate_colour_plane {
            reader.skip_n(2)?; // colour_plane_id
        }

        slice.frame_num = reader.get_n(sps.log2_max_frame_num)?;
        if !sps.frame_mbs_only {
            slice.field_pic = reader.get()?;
            if slice.field_pic {
                slice.bottom_field = reader.get()?;
            }
        }

        if nal.is_idr() {
            slice.idr_pic_id = check_range("idr_pic_id", reader.get_ue()?, 65535)?;
        }

        let bottom_delta_present = pps.bottom_field_pic_order_in_frame_present && !slice.field_pic;
        if sps.pic_order_cnt_type == 0 {
            slice.pic_order_cnt_lsb = reader.get_n(sps.log2_max_pic_order_cnt_lsb)?;
            if bottom_delta_present {
                slice.delta_pic_order_cnt_bottom = reader.get_se()?;
            }
        }
        if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero {
            slice.delta_pic_order_cnt[0] = reader.get_se()?;
            if bottom_delta_present {
                slice.delta_pic_order_cnt[1] = reader.get_se()?;
            }
        }

        if pps.redundant_pic_cnt_present {
            slice.redundant_pic_cnt = check_range("redundant_pic_cnt", reader.get_ue()?, 127)?;
        }

        let is_b = slice.slice_type == SliceType::B;
        let is_p = matches!(slice.slice_type, SliceType::P | SliceType::Sp);

        if is_b {
            reader.skip_n(1)?; // direct_spatial_mv_pred_flag
        }

        let mut num_ref_idx_active = [
            pps.num_ref_idx_l0_default_active,
            pps.num_ref_idx_l1_default_active,
        ];
        if (is_p || is_b) && reader.get()? {
            num_ref_idx_active[0] =
                check_range("num_ref_idx_l0_active_minus1", reader.get_ue()?, 31)? + 1;
            if is_b {
                num_ref_idx_active[1] =
                    check_range("num_ref_idx_l1_active_minus1", reader.get_ue()?, 31)? + 1;
            }
        }

        if !slice.slice_type.is_intra() {
            skip_ref_pic_list_modification(&mut reader)?;
            if is_b {
                skip_ref_pic_list_modification(&mut reader)?;
            }
        }

        if (pps.weighted_pred && is_p) || (pps.weighted_bipred_idc == 1 && is_b) {
            let lists = if is_b { 2 } else { 1 };
            skip_pred_weight_table(
                &mut reader,
                sps.chroma_array_type(),
                &num_ref_idx_active[..lists],
            )?;
        }

        if slice.nal_ref_idc != 0 {
            slice.read_dec_ref_pic_marking(&mut reader, nal.is_idr())?;
        }

        Ok(slice)
    }

    fn read_dec_ref_pic_marking(&mut self, reader: &mut BsIoSliceReader, idr: bool) -> Result<()> {
        if idr {
            self.no_output_of_prior_pics = reader.get()?;
            self.long_term_reference = reader.get()?;
            return Ok(());
        }

        if !reader.get()? {
            return Ok(());
        }

        // Bounded by the number of reference frames and long term indices.
        for _ in 0..66 {
            match reader.get_ue()? {
                0 => return Ok(()),
                1 => {
                    reader.get_ue()?;
                }
                2 => {
                    reader.get_ue()?;
                }
                3 => {
                    reader.get_ue()?;
                    reader.get_ue()?;
                }
                4 => {
                    reader.get_ue()?;
                }
                5 => self.mmco5 = true,
                6 => {
                    reader.get_ue()?;
                }
                mmco => bail!(NalError::ValueOutOfRange {
                    field: "memory_management_control_operation",
                    value: mmco as i64
                }),
            }
        }

        bail!(NalError::ValueOutOfRange {
            field: "memory_management_control_operation count",
            value: 66
        })
    }

    pub fn is_idr(&self) -> bool {
        self.nal_unit_type == NAL_IDR_SLICE
    }

    /// H.264 7.4.1.2.4: does this slice start a new primary coded picture
    /// compared to the previous slice `prev`?
    pub fn starts_new_picture(&self, prev: &SliceHeader, sps: &Sps) -> bool {
        self.frame_num != prev.frame_num
            || self.pps_id != prev.pps_id
            || self.field_pic != prev.field_pic
            || (self.field_pic && self.bottom_field != prev.bottom_field)
            || (self.nal_ref_idc != prev.nal_ref_idc
                && (self.nal_ref_idc == 0 || prev.nal_ref_idc == 0))
            || (sps.pic_order_cnt_type == 0
                && (self.pic_order_cnt_lsb != prev.pic_order_cnt_lsb
                    || self.delta_pic_order_cnt_bottom != prev.delta_pic_order_cnt_bottom))
            || (sps.pic_order_cnt_type == 1 && self.delta_pic_order_cnt != prev.delta_pic_order_cnt)
            || self.is_idr() != prev.is_idr()
            || (self.is_idr() && prev.is_idr() && self.idr_pic_id != prev.idr_pic_id)
    }
}

fn skip_ref_pic_list_modification(reader: &mut BsIoSliceReader) -> Result<()> {
    if !reader.get()? {
        return Ok(());
    }

    for _ in 0..=32 {
        match reader.get_ue()? {
            0..=2 => {
                reader.get_ue()?;
            }
            3 => return Ok(()),
            idc => bail!(NalError::ValueOutOfRange {
                field: "modification_of_pic_nums_idc",
                value: idc as i64
            }),
        }
    }

    bail!(NalError::ValueOutOfRange {
        field: "ref_pic_list_modification count",
        value: 33
    })
}

fn skip_pred_weight_table(
    reader: &mut BsIoSliceReader,
    chroma_array_type: u32,
    num_ref_idx_active: &[u32],
) -> Result<()> {
    reader.get_ue()?; // luma_log2_weight_denom
    if chroma_array_type != 0 {
        reader.get_ue()?; // chroma_log2_weight_denom
    }

    for &count in num_ref_idx_active {
        for _ in 0..count {
            if reader.get()? {
                reader.get_se()?;
                reader.get_se()?;
            }
            if chroma_array_type != 0 && reader.get()? {
                for _ in 0..4 {
                    reader.get_se()?;
                }
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_nals::*;
    use super::*;

    fn stores(frame_mbs_only: bool) -> Result<(ParameterSetStore<Sps>, ParameterSetStore<Pps>)> {
        let mut spss = ParameterSetStore::new("SPS");
        let mut ppss = ParameterSetStore::new("PPS");
        let raw = sps(0, frame_mbs_only);
        spss.insert(0, &raw, Sps::decode(&raw)?);
        let raw = pps(0, 0);
        ppss.insert(0, &raw, Pps::decode(&raw)?);
        Ok((spss, ppss))
    }

    #[test]
    fn sps_dimensions_and_timing() -> Result<()> {
        let progressive = Sps::decode(&sps(0, true))?;
        assert_eq!(progressive.profile_idc, 100);
        assert_eq!(progressive.level_idc, 40);
        assert_eq!((progressive.width(), progressive.height()), (1920, 1080));
        assert_eq!(progressive.log2_max_frame_num, 4);
        assert_eq!(progressive.log2_max_pic_order_cnt_lsb, 6);
        assert_eq!(
            progressive.vui.as_ref().and_then(|v| v.sample_aspect_ratio),
            Some((1, 1))
        );
        assert_eq!(progressive.frame_duration_ns(), Some(40_000_000));

        let interlaced = Sps::decode(&sps(1, false))?;
        assert!(!interlaced.frame_mbs_only);
        assert_eq!((interlaced.width(), interlaced.height()), (1920, 1080));
        Ok(())
    }

    #[test]
    fn pps_fields() -> Result<()> {
        let pps = Pps::decode(&pps(3, 1))?;
        assert_eq!((pps.id, pps.sps_id), (3, 1));
        assert!(pps.entropy_coding_mode);
        assert_eq!(pps.num_ref_idx_l0_default_active, 1);
        assert!(pps.deblocking_filter_control_present);
        Ok(())
    }

    #[test]
    fn slice_header_fields() -> Result<()> {
        let (spss, ppss) = stores(true)?;

        let idr = SliceHeader::decode(&slice(true, 3, 7, 0, 0), &spss, &ppss)?;
        assert!(idr.is_idr());
        assert_eq!(idr.slice_type, SliceType::I);

        let b = SliceHeader::decode(&slice(false, 0, 1, 1, 4), &spss, &ppss)?;
        assert_eq!(b.slice_type, SliceType::B);
        assert_eq!((b.frame_num, b.pic_order_cnt_lsb), (1, 4));

        let mmco5 = SliceHeader::decode(&mmco5_slice(2, 8), &spss, &ppss)?;
        assert!(mmco5.mmco5);
        assert_eq!(mmco5.slice_type, SliceType::P);

        let sps = spss.require(0)?;
        assert!(b.starts_new_picture(&idr, sps));
        assert!(!b.starts_new_picture(&b.clone(), sps));
        Ok(())
    }

    #[test]
    fn missing_parameter_set() -> Result<()> {
        let spss = ParameterSetStore::new("SPS");
        let ppss = ParameterSetStore::new("PPS");
        let err = SliceHeader::decode(&slice(true, 3, 7, 0, 0), &spss, &ppss).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NalError>(),
            Some(NalError::MissingParameterSet { kind: "PPS", id: 0 })
        ));
        Ok(())
    }
}
