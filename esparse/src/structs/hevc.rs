//! H.265 / HEVC NAL unit headers, parameter sets and slice segment headers.

use anyhow::{Result, bail};
use log::trace;

use crate::structs::nal::{
    ColourDescription, EXTENDED_SAR, ParameterSetStore, SliceType, VuiTiming, ceil_log2,
    check_range, sample_aspect_ratio,
};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::NalError;

pub const NAL_TRAIL_N: u8 = 0;
pub const NAL_TRAIL_R: u8 = 1;
pub const NAL_RADL_N: u8 = 6;
pub const NAL_RADL_R: u8 = 7;
pub const NAL_RASL_N: u8 = 8;
pub const NAL_RASL_R: u8 = 9;
pub const NAL_BLA_W_LP: u8 = 16;
pub const NAL_BLA_W_RADL: u8 = 17;
pub const NAL_BLA_N_LP: u8 = 18;
pub const NAL_IDR_W_RADL: u8 = 19;
pub const NAL_IDR_N_LP: u8 = 20;
pub const NAL_CRA: u8 = 21;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;
pub const NAL_EOS: u8 = 36;
pub const NAL_EOB: u8 = 37;
pub const NAL_FD: u8 = 38;
pub const NAL_PREFIX_SEI: u8 = 39;
pub const NAL_SUFFIX_SEI: u8 = 40;
/// Dolby Vision reference processing unit.
pub const NAL_UNSPEC62: u8 = 62;
/// Dolby Vision enhancement layer NAL unit wrapper.
pub const NAL_UNSPEC63: u8 = 63;

const MAX_SHORT_TERM_REF_PIC_SETS: u32 = 64;
const MAX_DELTA_POCS: u32 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_unit_type: u8,
    pub nuh_layer_id: u8,
    pub temporal_id: u8,
}

impl NalHeader {
    pub fn decode(nal: &[u8]) -> Result<Self> {
        let [first, second, ..] = *nal else {
            bail!(NalError::TruncatedHeader);
        };
        if first & 0x80 != 0 {
            bail!(NalError::ForbiddenZeroBit);
        }

        let temporal_id_plus1 = second & 0x07;
        if temporal_id_plus1 == 0 {
            bail!(NalError::ValueOutOfRange {
                field: "nuh_temporal_id_plus1",
                value: 0
            });
        }

        Ok(Self {
            nal_unit_type: (first >> 1) & 0x3F,
            nuh_layer_id: ((first & 0x01) << 5) | (second >> 3),
            temporal_id: temporal_id_plus1 - 1,
        })
    }

    pub fn encode(&self) -> [u8; 2] {
        [
            (self.nal_unit_type << 1) | (self.nuh_layer_id >> 5),
            ((self.nuh_layer_id & 0x1F) << 3) | (self.temporal_id + 1),
        ]
    }

    pub fn is_vcl(&self) -> bool {
        self.nal_unit_type < NAL_VPS
    }

    pub fn is_irap(&self) -> bool {
        (NAL_BLA_W_LP..=23).contains(&self.nal_unit_type)
    }

    pub fn is_idr(&self) -> bool {
        matches!(self.nal_unit_type, NAL_IDR_W_RADL | NAL_IDR_N_LP)
    }

    pub fn is_bla(&self) -> bool {
        (NAL_BLA_W_LP..=NAL_BLA_N_LP).contains(&self.nal_unit_type)
    }

    pub fn is_rasl(&self) -> bool {
        matches!(self.nal_unit_type, NAL_RASL_N | NAL_RASL_R)
    }

    pub fn is_radl(&self) -> bool {
        matches!(self.nal_unit_type, NAL_RADL_N | NAL_RADL_R)
    }

    /// Sub-layer non-reference picture.
    pub fn is_sub_layer_non_reference(&self) -> bool {
        self.nal_unit_type <= 14 && self.nal_unit_type % 2 == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileTierLevel {
    pub profile_space: u8,
    pub tier: bool,
    pub profile_idc: u8,
    pub compatibility_flags: u32,
    pub progressive_source: bool,
    pub interlaced_source: bool,
    pub level_idc: u8,
}

impl ProfileTierLevel {
    pub fn read(reader: &mut BsIoSliceReader, max_sub_layers_minus1: u8) -> Result<Self> {
        let ptl = Self {
            profile_space: reader.get_n(2)?,
            tier: reader.get()?,
            profile_idc: reader.get_n(5)?,
            compatibility_flags: reader.get_n(32)?,
            progressive_source: reader.get()?,
            interlaced_source: reader.get()?,
            ..Default::default()
        };

        // non_packed, frame_only, 43 bits of constraint flags, inbld/reserved
        reader.skip_n(46)?;
        let ptl = Self {
            level_idc: reader.get_n(8)?,
            ..ptl
        };

        let mut present = [(false, false); 8];
        for entry in present.iter_mut().take(max_sub_layers_minus1 as usize) {
            *entry = (reader.get()?, reader.get()?);
        }
        if max_sub_layers_minus1 > 0 {
            reader.skip_n(2 * (8 - max_sub_layers_minus1 as u32))?;
        }
        for &(profile_present, level_present) in present.iter().take(max_sub_layers_minus1 as usize)
        {
            if profile_present {
                reader.skip_n(88)?;
            }
            if level_present {
                reader.skip_n(8)?;
            }
        }

        Ok(ptl)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vps {
    pub id: u8,
    pub max_layers: u8,
    pub max_sub_layers: u8,
    pub temporal_id_nesting: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub timing: Option<VuiTiming>,
    pub poc_proportional_to_timing: bool,
}

impl Vps {
    pub fn decode(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(16)?;

        let id: u8 = reader.get_n(4)?;
        reader.skip_n(2)?; // base layer internal / available
        let max_layers = reader.get_n::<u8>(6)? + 1;
        let max_sub_layers_minus1: u8 = check_range("vps_max_sub_layers_minus1", reader.get_n(3)?, 6)?;
        let temporal_id_nesting = reader.get()?;
        reader.skip_n(16)?; // vps_reserved_0xffff_16bits

        let mut vps = Self {
            id,
            max_layers,
            max_sub_layers: max_sub_layers_minus1 + 1,
            temporal_id_nesting,
            profile_tier_level: ProfileTierLevel::read(&mut reader, max_sub_layers_minus1)?,
            ..Default::default()
        };

        let ordering_info_present = reader.get()?;
        let first = if ordering_info_present { 0 } else { max_sub_layers_minus1 };
        for _ in first..=max_sub_layers_minus1 {
            reader.get_ue()?;
            reader.get_ue()?;
            reader.get_ue()?;
        }

        let max_layer_id: u32 = reader.get_n(6)?;
        let num_layer_sets_minus1 = check_range("vps_num_layer_sets_minus1", reader.get_ue()?, 1023)?;
        for _ in 0..num_layer_sets_minus1 {
            reader.skip_n(max_layer_id + 1)?;
        }

        if reader.get()? {
            vps.timing = Some(VuiTiming {
                num_units_in_tick: reader.get_n(32)?,
                time_scale: reader.get_n(32)?,
            });
            vps.poc_proportional_to_timing = reader.get()?;
        }

        trace!("VPS {}: {} sub layers", vps.id, vps.max_sub_layers);

        Ok(vps)
    }
}

/// Short-term reference picture set, as delta POCs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortTermRps {
    pub delta_poc_s0: Vec<i32>,
    pub used_s0: Vec<bool>,
    pub delta_poc_s1: Vec<i32>,
    pub used_s1: Vec<bool>,
}

impl ShortTermRps {
    pub fn num_delta_pocs(&self) -> usize {
        self.delta_poc_s0.len() + self.delta_poc_s1.len()
    }

    /// `st_ref_pic_set(idx)`. `sets` are the sets decoded so far in the SPS;
    /// `idx == sets.len()` for a set coded in a slice header.
    pub fn read(
        reader: &mut BsIoSliceReader,
        idx: usize,
        sets: &[ShortTermRps],
        in_slice_header: bool,
    ) -> Result<Self> {
        let inter_rps_pred = idx != 0 && reader.get()?;
        if !inter_rps_pred {
            return Self::read_explicit(reader);
        }

        let delta_idx = if in_slice_header {
            check_range("delta_idx_minus1", reader.get_ue()?, idx as u32 - 1)? as usize + 1
        } else {
            1
        };
        let Some(reference) = sets.get(idx - delta_idx) else {
            bail!(NalError::ValueOutOfRange {
                field: "RefRpsIdx",
                value: (idx - delta_idx) as i64
            });
        };

        let sign = reader.get()?;
        let abs = check_range("abs_delta_rps_minus1", reader.get_ue()?, 1 << 15)? as i32 + 1;
        let delta_rps = if sign { -abs } else { abs };

        let count = reference.num_delta_pocs() + 1;
        let mut used_by_curr = Vec::with_capacity(count);
        let mut use_delta = Vec::with_capacity(count);
        for _ in 0..count {
            let used = reader.get()?;
            used_by_curr.push(used);
            use_delta.push(used || reader.get()?);
        }

        Ok(reference.predict(delta_rps, &used_by_curr, &use_delta))
    }

    fn read_explicit(reader: &mut BsIoSliceReader) -> Result<Self> {
        let num_negative = check_range("num_negative_pics", reader.get_ue()?, MAX_DELTA_POCS)?;
        let num_positive = check_range(
            "num_positive_pics",
            reader.get_ue()?,
            MAX_DELTA_POCS - num_negative,
        )?;

        let mut rps = Self::default();
        let mut poc = 0i32;
        for _ in 0..num_negative {
            poc -= check_range("delta_poc_s0_minus1", reader.get_ue()?, 1 << 15)? as i32 + 1;
            rps.delta_poc_s0.push(poc);
            rps.used_s0.push(reader.get()?);
        }

        poc = 0;
        for _ in 0..num_positive {
            poc += check_range("delta_poc_s1_minus1", reader.get_ue()?, 1 << 15)? as i32 + 1;
            rps.delta_poc_s1.push(poc);
            rps.used_s1.push(reader.get()?);
        }

        Ok(rps)
    }

    /// Inter RPS prediction, H.265 equations 7-61 and 7-62.
    fn predict(&self, delta_rps: i32, used_by_curr: &[bool], use_delta: &[bool]) -> Self {
        let num_negative = self.delta_poc_s0.len();
        let num_delta_pocs = self.num_delta_pocs();
        let mut rps = Self::default();

        for j in (0..self.delta_poc_s1.len()).rev() {
            let d_poc = self.delta_poc_s1[j] + delta_rps;
            if d_poc < 0 && use_delta[num_negative + j] {
                rps.delta_poc_s0.push(d_poc);
                rps.used_s0.push(used_by_curr[num_negative + j]);
            }
        }
        if delta_rps < 0 && use_delta[num_delta_pocs] {
            rps.delta_poc_s0.push(delta_rps);
            rps.used_s0.push(used_by_curr[num_delta_pocs]);
        }
        for j in 0..num_negative {
            let d_poc = self.delta_poc_s0[j] + delta_rps;
            if d_poc < 0 && use_delta[j] {
                rps.delta_poc_s0.push(d_poc);
                rps.used_s0.push(used_by_curr[j]);
            }
        }

        for j in (0..num_negative).rev() {
            let d_poc = self.delta_poc_s0[j] + delta_rps;
            if d_poc > 0 && use_delta[j] {
                rps.delta_poc_s1.push(d_poc);
                rps.used_s1.push(used_by_curr[j]);
            }
        }
        if delta_rps > 0 && use_delta[num_delta_pocs] {
            rps.delta_poc_s1.push(delta_rps);
            rps.used_s1.push(used_by_curr[num_delta_pocs]);
        }
        for j in 0..self.delta_poc_s1.len() {
            let d_poc = self.delta_poc_s1[j] + delta_rps;
            if d_poc > 0 && use_delta[num_negative + j] {
                rps.delta_poc_s1.push(d_poc);
                rps.used_s1.push(used_by_curr[num_negative + j]);
            }
        }

        rps
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vui {
    pub sample_aspect_ratio: Option<(u16, u16)>,
    pub video_full_range: bool,
    pub colour_description: Option<ColourDescription>,
    pub field_seq: bool,
    pub timing: Option<VuiTiming>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sps {
    pub vps_id: u8,
    pub max_sub_layers: u8,
    pub profile_tier_level: ProfileTierLevel,
    pub id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    pub pic_width: u32,
    pub pic_height: u32,
    /// Left, right, top and bottom offsets in chroma units.
    pub conformance_window: Option<[u32; 4]>,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub max_num_reorder_pics: u32,
    pub log2_min_luma_coding_block_size: u32,
    pub log2_diff_max_min_luma_coding_block_size: u32,
    pub short_term_ref_pic_sets: Vec<ShortTermRps>,
    pub long_term_ref_pics_present: bool,
    pub num_long_term_ref_pics: u32,
    pub temporal_mvp_enabled: bool,
    pub vui: Option<Vui>,
}

impl Sps {
    pub fn decode(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(16)?;

        let vps_id = reader.get_n(4)?;
        let max_sub_layers_minus1: u8 = check_range("sps_max_sub_layers_minus1", reader.get_n(3)?, 6)?;
        reader.skip_n(1)?; // sps_temporal_id_nesting_flag

        let mut sps = Self {
            vps_id,
            max_sub_layers: max_sub_layers_minus1 + 1,
            profile_tier_level: ProfileTierLevel::read(&mut reader, max_sub_layers_minus1)?,
            id: check_range("sps_seq_parameter_set_id", reader.get_ue()?, 15)?,
            chroma_format_idc: 1,
            ..Default::default()
        };

        sps.chroma_format_idc = check_range("chroma_format_idc", reader.get_ue()?, 3)?;
        if sps.chroma_format_idc == 3 {
            sps.separate_colour_plane = reader.get()?;
        }
        sps.pic_width = check_range("pic_width_in_luma_samples", reader.get_ue()?, 16888)?;
        sps.pic_height = check_range("pic_height_in_luma_samples", reader.get_ue()?, 16888)?;

        if reader.get()? {
            sps.conformance_window = Some([
                reader.get_ue()?,
                reader.get_ue()?,
                reader.get_ue()?,
                reader.get_ue()?,
            ]);
        }

        sps.bit_depth_luma = check_range("bit_depth_luma_minus8", reader.get_ue()?, 8)? + 8;
        sps.bit_depth_chroma = check_range("bit_depth_chroma_minus8", reader.get_ue()?, 8)? + 8;
        sps.log2_max_pic_order_cnt_lsb =
            check_range("log2_max_pic_order_cnt_lsb_minus4", reader.get_ue()?, 12)? + 4;

        let ordering_info_present = reader.get()?;
        let first = if ordering_info_present { 0 } else { max_sub_layers_minus1 };
        for _ in first..=max_sub_layers_minus1 {
            reader.get_ue()?; // max_dec_pic_buffering_minus1
            sps.max_num_reorder_pics = reader.get_ue()?;
            reader.get_ue()?; // max_latency_increase_plus1
        }

        sps.log2_min_luma_coding_block_size =
            check_range("log2_min_luma_coding_block_size_minus3", reader.get_ue()?, 3)? + 3;
        sps.log2_diff_max_min_luma_coding_block_size = check_range(
            "log2_diff_max_min_luma_coding_block_size",
            reader.get_ue()?,
            3,
        )?;
        reader.get_ue()?; // log2_min_luma_transform_block_size_minus2
        reader.get_ue()?; // log2_diff_max_min_luma_transform_block_size
        reader.get_ue()?; // max_transform_hierarchy_depth_inter
        reader.get_ue()?; // max_transform_hierarchy_depth_intra

        if reader.get()? && reader.get()? {
            skip_scaling_list_data(&mut reader)?;
        }

        reader.skip_n(2)?; // amp_enabled_flag, sample_adaptive_offset_enabled_flag
        if reader.get()? {
            reader.skip_n(8)?; // pcm sample bit depths
            reader.get_ue()?;
            reader.get_ue()?;
            reader.skip_n(1)?; // pcm_loop_filter_disabled_flag
        }

        let num_sets = check_range(
            "num_short_term_ref_pic_sets",
            reader.get_ue()?,
            MAX_SHORT_TERM_REF_PIC_SETS,
        )?;
        for idx in 0..num_sets as usize {
            let rps = ShortTermRps::read(&mut reader, idx, &sps.short_term_ref_pic_sets, false)?;
            sps.short_term_ref_pic_sets.push(rps);
        }

        sps.long_term_ref_pics_present = reader.get()?;
        if sps.long_term_ref_pics_present {
            sps.num_long_term_ref_pics = check_range("num_long_term_ref_pics_sps", reader.get_ue()?, 32)?;
            for _ in 0..sps.num_long_term_ref_pics {
                reader.skip_n(sps.log2_max_pic_order_cnt_lsb + 1)?;
            }
        }

        sps.temporal_mvp_enabled = reader.get()?;
        reader.skip_n(1)?; // strong_intra_smoothing_enabled_flag

        if reader.get()? {
            sps.vui = Some(read_vui(&mut reader)?);
        }

        trace!(
            "SPS {}: profile {} level {} {}x{} {} bit, {} short term RPS",
            sps.id,
            sps.profile_tier_level.profile_idc,
            sps.profile_tier_level.level_idc,
            sps.width(),
            sps.height(),
            sps.bit_depth_luma,
            sps.short_term_ref_pic_sets.len()
        );

        Ok(sps)
    }

    fn chroma_units(&self) -> (u32, u32) {
        match (self.separate_colour_plane, self.chroma_format_idc) {
            (false, 1) => (2, 2),
            (false, 2) => (2, 1),
            _ => (1, 1),
        }
    }

    pub fn width(&self) -> u32 {
        let [left, right, _, _] = self.conformance_window.unwrap_or_default();
        let crop = self.chroma_units().0.saturating_mul(left.saturating_add(right));

        self.pic_width.saturating_sub(crop)
    }

    pub fn height(&self) -> u32 {
        let [_, _, top, bottom] = self.conformance_window.unwrap_or_default();
        let crop = self.chroma_units().1.saturating_mul(top.saturating_add(bottom));

        self.pic_height.saturating_sub(crop)
    }

    pub fn pic_size_in_ctbs(&self) -> u32 {
        let ctb_log2 =
            self.log2_min_luma_coding_block_size + self.log2_diff_max_min_luma_coding_block_size;
        let ctb_size = 1u32 << ctb_log2;

        self.pic_width.div_ceil(ctb_size) * self.pic_height.div_ceil(ctb_size)
    }

    pub fn frame_duration_ns(&self) -> Option<i64> {
        let timing = self.vui.as_ref()?.timing?;
        if timing.time_scale == 0 || timing.num_units_in_tick == 0 {
            return None;
        }

        Some(timing.num_units_in_tick as i64 * 1_000_000_000 / timing.time_scale as i64)
    }
}

fn skip_scaling_list_data(reader: &mut BsIoSliceReader) -> Result<()> {
    for size_id in 0..4u32 {
        let step = if size_id == 3 { 3 } else { 1 };
        for _ in (0..6).step_by(step) {
            if !reader.get()? {
                reader.get_ue()?; // scaling_list_pred_matrix_id_delta
                continue;
            }

            let coef_num = 64.min(1 << (4 + (size_id << 1)));
            if size_id > 1 {
                reader.get_se()?; // scaling_list_dc_coef_minus8
            }
            for _ in 0..coef_num {
                reader.get_se()?;
            }
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
        reader.skip_n(1)?;
    }

    if reader.get()? {
        reader.skip_n(3)?;
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

    reader.skip_n(1)?; // neutral_chroma_indication_flag
    vui.field_seq = reader.get()?;
    reader.skip_n(1)?; // frame_field_info_present_flag

    if reader.get()? {
        for _ in 0..4 {
            reader.get_ue()?; // default display window
        }
    }

    if reader.get()? {
        vui.timing = Some(VuiTiming {
            num_units_in_tick: reader.get_n(32)?,
            time_scale: reader.get_n(32)?,
        });
    }

    Ok(vui)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pps {
    pub id: u32,
    pub sps_id: u32,
    pub dependent_slice_segments_enabled: bool,
    pub output_flag_present: bool,
    pub num_extra_slice_header_bits: u32,
    pub cabac_init_present: bool,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred: bool,
    pub tiles_enabled: bool,
    pub entropy_coding_sync_enabled: bool,
}

impl Pps {
    pub fn decode(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(16)?;

        let mut pps = Self {
            id: check_range("pps_pic_parameter_set_id", reader.get_ue()?, 63)?,
            sps_id: check_range("pps_seq_parameter_set_id", reader.get_ue()?, 15)?,
            dependent_slice_segments_enabled: reader.get()?,
            output_flag_present: reader.get()?,
            num_extra_slice_header_bits: reader.get_n(3)?,
            ..Default::default()
        };

        reader.skip_n(1)?; // sign_data_hiding_enabled_flag
        pps.cabac_init_present = reader.get()?;
        pps.num_ref_idx_l0_default_active =
            check_range("num_ref_idx_l0_default_active_minus1", reader.get_ue()?, 14)? + 1;
        pps.num_ref_idx_l1_default_active =
            check_range("num_ref_idx_l1_default_active_minus1", reader.get_ue()?, 14)? + 1;
        reader.get_se()?; // init_qp_minus26
        reader.skip_n(2)?; // constrained_intra_pred_flag, transform_skip_enabled_flag
        if reader.get()? {
            reader.get_ue()?; // diff_cu_qp_delta_depth
        }
        reader.get_se()?; // pps_cb_qp_offset
        reader.get_se()?; // pps_cr_qp_offset
        reader.skip_n(1)?; // pps_slice_chroma_qp_offsets_present_flag
        pps.weighted_pred = reader.get()?;
        pps.weighted_bipred = reader.get()?;
        reader.skip_n(1)?; // transquant_bypass_enabled_flag
        pps.tiles_enabled = reader.get()?;
        pps.entropy_coding_sync_enabled = reader.get()?;

        trace!("PPS {} -> SPS {}", pps.id, pps.sps_id);

        Ok(pps)
    }
}

/// Slice segment header fields up to the short-term RPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub nal: NalHeader,
    pub first_slice_segment_in_pic: bool,
    pub no_output_of_prior_pics: bool,
    pub pps_id: u32,
    pub dependent_slice_segment: bool,
    pub slice_segment_address: u32,
    pub slice_type: SliceType,
    pub pic_output: bool,
    pub pic_order_cnt_lsb: u32,
    pub short_term_ref_pic_set_sps: bool,
    pub short_term_ref_pic_set_idx: u32,
    pub short_term_ref_pic_set: Option<ShortTermRps>,
}

impl SliceHeader {
    /// First bit of the slice segment header.
    pub fn first_slice_segment_in_pic(rbsp: &[u8]) -> Option<bool> {
        rbsp.get(2).map(|byte| byte & 0x80 != 0)
    }

    /// Decodes a slice segment header. Dependent slice segments copy the
    /// slice fields from `previous`.
    pub fn decode(
        rbsp: &[u8],
        spss: &ParameterSetStore<Sps>,
        ppss: &ParameterSetStore<Pps>,
        previous: Option<&SliceHeader>,
    ) -> Result<Self> {
        let nal = NalHeader::decode(rbsp)?;
        let mut reader = BsIoSliceReader::from_slice(rbsp);
        reader.skip_n(16)?;

        let mut slice = Self {
            nal,
            first_slice_segment_in_pic: reader.get()?,
            pic_output: true,
            ..Default::default()
        };

        if nal.is_irap() {
            slice.no_output_of_prior_pics = reader.get()?;
        }
        slice.pps_id = check_range("slice_pic_parameter_set_id", reader.get_ue()?, 63)?;

        let pps = ppss.require(slice.pps_id)?;
        let sps = spss.require(pps.sps_id)?;

        if !slice.first_slice_segment_in_pic {
            if pps.dependent_slice_segments_enabled {
                slice.dependent_slice_segment = reader.get()?;
            }
            slice.slice_segment_address = reader.get_n(ceil_log2(sps.pic_size_in_ctbs()))?;
        }

        if slice.dependent_slice_segment {
            let Some(previous) = previous else {
                bail!(NalError::MissingParameterSet {
                    kind: "independent slice segment",
                    id: slice.slice_segment_address
                });
            };

            return Ok(Self {
                nal,
                first_slice_segment_in_pic: false,
                dependent_slice_segment: true,
                slice_segment_address: slice.slice_segment_address,
                pps_id: slice.pps_id,
                ..previous.clone()
            });
        }

        reader.skip_n(pps.num_extra_slice_header_bits)?;
        slice.slice_type = SliceType::from_hevc(reader.get_ue()?)?;
        if pps.output_flag_present {
            slice.pic_output = reader.get()?;
        }
        if sps.separate_colour_plane {
            reader.skip_n(2)?; // colour_plane_id
        }

        if !nal.is_idr() {
            slice.pic_order_cnt_lsb = reader.get_n(sps.log2_max_pic_order_cnt_lsb)?;
            slice.short_term_ref_pic_set_sps = reader.get()?;

            let num_sets = sps.short_term_ref_pic_sets.len();
            if !slice.short_term_ref_pic_set_sps {
                slice.short_term_ref_pic_set = Some(ShortTermRps::read(
                    &mut reader,
                    num_sets,
                    &sps.short_term_ref_pic_sets,
                    true,
                )?);
            } else if num_sets > 1 {
                slice.short_term_ref_pic_set_idx = reader.get_n(ceil_log2(num_sets as u32))?;
            }
        }

        Ok(slice)
    }

    /// The short-term RPS in effect for this slice.
    pub fn short_term_rps<'a>(&'a self, sps: &'a Sps) -> Option<&'a ShortTermRps> {
        if self.short_term_ref_pic_set_sps {
            sps.short_term_ref_pic_sets
                .get(self.short_term_ref_pic_set_idx as usize)
        } else {
            self.short_term_ref_pic_set.as_ref()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_nals {
    use crate::utils::testing::TestBitWriter;

    fn nal_header(w: &mut TestBitWriter, nal_type: u8, temporal_id: u8) {
        w.bits(1, 0).bits(6, nal_type as u64).bits(6, 0).bits(3, temporal_id as u64 + 1);
    }

    fn profile_tier_level(w: &mut TestBitWriter) {
        w.bits(2, 0).flag(false).bits(5, 1).bits(32, 0x6000_0000);
        w.flag(true).flag(false).bits(46, 0).bits(8, 120);
    }

    pub fn vps() -> Vec<u8> {
        let mut w = TestBitWriter::default();
        nal_header(&mut w, 32, 0);
        w.bits(4, 0).bits(2, 3).bits(6, 0).bits(3, 0).flag(true).bits(16, 0xFFFF);
        profile_tier_level(&mut w);
        w.flag(true).ue(4).ue(2).ue(0);
        w.bits(6, 0).ue(0);
        w.flag(false);
        w.trailing_bits();
        w.finish()
    }

    /// Main profile 1920x1080 (coded 1920x1088), POC lsb 8 bits, two
    /// short-term RPS (the second one inter predicted), 25 fps VUI timing.
    pub fn sps() -> Vec<u8> {
        let mut w = TestBitWriter::default();
        nal_header(&mut w, 33, 0);
        w.bits(4, 0).bits(3, 0).flag(true);
        profile_tier_level(&mut w);
        w.ue(0).ue(1).ue(1920).ue(1088);
        w.flag(true).ue(0).ue(0).ue(0).ue(4);
        w.ue(0).ue(0).ue(4); // 8 bit, log2_max_pic_order_cnt_lsb = 8
        w.flag(true).ue(4).ue(2).ue(0);
        w.ue(0).ue(3).ue(0).ue(3).ue(1).ue(1); // 8x8 min CB, 64x64 CTB
        w.flag(false); // scaling lists
        w.flag(false).flag(true).flag(false); // amp, sao, pcm
        w.ue(2);
        // RPS 0: two negative pictures at -1 and -3
        w.ue(2).ue(0).ue(0).flag(true).ue(1).flag(true);
        // RPS 1: predicted from RPS 0 with delta -1
        w.flag(true).flag(true).ue(0);
        w.flag(true).flag(true).flag(true);
        w.flag(false); // long term refs
        w.flag(true).flag(true); // temporal mvp, strong intra smoothing
        // VUI with 1/25 timing
        w.flag(true);
        w.flag(false).flag(false).flag(false).flag(false);
        w.flag(false).flag(false).flag(false).flag(false);
        w.flag(true).bits(32, 1).bits(32, 25);
        w.trailing_bits();
        w.finish()
    }

    pub fn pps() -> Vec<u8> {
        let mut w = TestBitWriter::default();
        nal_header(&mut w, 34, 0);
        w.ue(0).ue(0).flag(false).flag(false).bits(3, 0);
        w.flag(false).flag(false).ue(0).ue(0).se(0);
        w.flag(false).flag(false).flag(false).se(0).se(0);
        w.flag(false).flag(false).flag(false).flag(false).flag(false).flag(false);
        w.trailing_bits();
        w.finish()
    }

    /// The first slice segment of a picture, referencing SPS RPS 1.
    pub fn slice(nal_type: u8, temporal_id: u8, slice_type: u32, poc_lsb: u32) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        nal_header(&mut w, nal_type, temporal_id);
        w.flag(true);
        if (16..=23).contains(&nal_type) {
            w.flag(false);
        }
        w.ue(0).ue(slice_type);
        if !matches!(nal_type, 19 | 20) {
            w.bits(8, poc_lsb as u64).flag(true).bits(1, 1);
        }
        w.bits(8, 0xA5);
        w.trailing_bits();
        w.finish()
    }

    pub fn eos() -> Vec<u8> {
        let mut w = TestBitWriter::default();
        nal_header(&mut w, 36, 0);
        w.finish()
    }
}
