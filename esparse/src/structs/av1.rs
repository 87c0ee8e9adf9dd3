//! AV1 OBU headers, sequence headers, frame header prefixes and metadata.

use anyhow::{Result, bail};
use log::trace;

use crate::structs::timestamp::{NS_PER_SECOND, Timestamp};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::Av1Error;

pub const OBU_SEQUENCE_HEADER: u8 = 1;
pub const OBU_TEMPORAL_DELIMITER: u8 = 2;
pub const OBU_FRAME_HEADER: u8 = 3;
pub const OBU_TILE_GROUP: u8 = 4;
pub const OBU_METADATA: u8 = 5;
pub const OBU_FRAME: u8 = 6;
pub const OBU_REDUNDANT_FRAME_HEADER: u8 = 7;
pub const OBU_TILE_LIST: u8 = 8;
pub const OBU_PADDING: u8 = 15;

/// Largest OBU payload accepted before the size field is considered corrupt.
pub const MAX_OBU_SIZE: u64 = 64 << 20;

pub const METADATA_TYPE_HDR_CLL: u64 = 1;
pub const METADATA_TYPE_HDR_MDCV: u64 = 2;
pub const METADATA_TYPE_ITUT_T35: u64 = 4;

pub const T35_COUNTRY_CODE_US: u8 = 0xB5;
pub const T35_PROVIDER_CODE_DOLBY: u16 = 0x003B;
pub const T35_PROVIDER_ORIENTED_CODE_DOVI: u32 = 0x0000_0800;

const SELECT_SCREEN_CONTENT_TOOLS: u8 = 2;
const SELECT_INTEGER_MV: u8 = 2;

pub fn obu_type_name(obu_type: u8) -> &'static str {
    match obu_type {
        OBU_SEQUENCE_HEADER => "sequence header",
        OBU_TEMPORAL_DELIMITER => "temporal delimiter",
        OBU_FRAME_HEADER => "frame header",
        OBU_TILE_GROUP => "tile group",
        OBU_METADATA => "metadata",
        OBU_FRAME => "frame",
        OBU_REDUNDANT_FRAME_HEADER => "redundant frame header",
        OBU_TILE_LIST => "tile list",
        OBU_PADDING => "padding",
        _ => "reserved",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: u8,
    pub has_extension: bool,
    pub has_size_field: bool,
    pub temporal_id: u8,
    pub spatial_id: u8,
    /// Header bytes including the extension and the LEB128 size.
    pub header_len: usize,
    pub payload_size: Option<u64>,
}

impl ObuHeader {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some(&first) = data.first() else {
            bail!(Av1Error::Truncated("OBU header"));
        };

        if first & 0x80 != 0 {
            bail!(Av1Error::ForbiddenBit);
        }
        if first & 0x01 != 0 {
            bail!(Av1Error::ReservedBit);
        }

        let obu_type = (first >> 3) & 0x0F;
        if matches!(obu_type, 0 | 9..=14) {
            bail!(Av1Error::ReservedObuType(obu_type));
        }

        let mut header = Self {
            obu_type,
            has_extension: first & 0x04 != 0,
            has_size_field: first & 0x02 != 0,
            header_len: 1,
            ..Default::default()
        };

        if header.has_extension {
            let Some(&ext) = data.get(1) else {
                bail!(Av1Error::Truncated("OBU extension header"));
            };
            header.temporal_id = ext >> 5;
            header.spatial_id = (ext >> 3) & 0x03;
            header.header_len += 1;
        }

        if header.has_size_field {
            let (size, len) = read_leb128(&data[header.header_len..])?;
            if size > MAX_OBU_SIZE {
                bail!(Av1Error::ObuTooLarge(size));
            }
            header.payload_size = Some(size);
            header.header_len += len;
        }

        Ok(header)
    }

    /// Header plus payload, if the size is known.
    pub fn total_size(&self) -> Option<usize> {
        self.payload_size.map(|size| self.header_len + size as usize)
    }
}

/// Byte-oriented `leb128()`, returning the value and its encoded length.
pub fn read_leb128(data: &[u8]) -> Result<(u64, usize)> {
    let mut reader = BsIoSliceReader::from_slice(data);
    match reader.get_leb128() {
        Ok(value) => Ok((value, (reader.position()? >> 3) as usize)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            bail!(Av1Error::Truncated("OBU size"))
        }
        Err(_) => bail!(Av1Error::UnterminatedLeb128),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_display_tick: u32,
    pub time_scale: u32,
    pub equal_picture_interval: bool,
    pub num_ticks_per_picture: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderModelInfo {
    pub buffer_delay_length_minus_1: u8,
    pub num_units_in_decoding_tick: u32,
    pub buffer_removal_time_length_minus_1: u8,
    pub frame_presentation_time_length_minus_1: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperatingPoint {
    pub idc: u16,
    pub seq_level_idx: u8,
    pub seq_tier: u8,
    pub decoder_model_present: bool,
    pub initial_display_delay: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorConfig {
    pub bit_depth: u8,
    pub mono_chrome: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub color_range: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub separate_uv_delta_q: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceHeader {
    pub seq_profile: u8,
    pub still_picture: bool,
    pub reduced_still_picture_header: bool,
    pub timing_info: Option<TimingInfo>,
    pub decoder_model_info: Option<DecoderModelInfo>,
    pub operating_points: Vec<OperatingPoint>,
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub frame_id_numbers_present: bool,
    pub delta_frame_id_length_minus_2: u8,
    pub additional_frame_id_length_minus_1: u8,
    pub use_128x128_superblock: bool,
    pub enable_filter_intra: bool,
    pub enable_intra_edge_filter: bool,
    pub enable_interintra_compound: bool,
    pub enable_masked_compound: bool,
    pub enable_warped_motion: bool,
    pub enable_dual_filter: bool,
    pub enable_order_hint: bool,
    pub enable_jnt_comp: bool,
    pub enable_ref_frame_mvs: bool,
    pub seq_force_screen_content_tools: u8,
    pub seq_force_integer_mv: u8,
    pub order_hint_bits: u8,
    pub enable_superres: bool,
    pub enable_cdef: bool,
    pub enable_restoration: bool,
    pub color_config: ColorConfig,
    pub film_grain_params_present: bool,
}

impl SequenceHeader {
    /// Decodes a sequence header OBU payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(payload);
        let mut seq = Self {
            seq_profile: reader.get_n(3)?,
            still_picture: reader.get()?,
            reduced_still_picture_header: reader.get()?,
            ..Default::default()
        };

        if seq.seq_profile > 2 {
            bail!(Av1Error::InvalidSequenceProfile(seq.seq_profile));
        }

        if seq.reduced_still_picture_header {
            seq.operating_points.push(OperatingPoint {
                seq_level_idx: reader.get_n(5)?,
                ..Default::default()
            });
        } else {
            seq.read_timing_and_operating_points(&mut reader)?;
        }

        let frame_width_bits = reader.get_n::<u32>(4)? + 1;
        let frame_height_bits = reader.get_n::<u32>(4)? + 1;
        seq.max_frame_width = reader.get_n::<u32>(frame_width_bits)? + 1;
        seq.max_frame_height = reader.get_n::<u32>(frame_height_bits)? + 1;

        if !seq.reduced_still_picture_header {
            seq.frame_id_numbers_present = reader.get()?;
        }
        if seq.frame_id_numbers_present {
            seq.delta_frame_id_length_minus_2 = reader.get_n(4)?;
            seq.additional_frame_id_length_minus_1 = reader.get_n(3)?;
        }

        seq.use_128x128_superblock = reader.get()?;
        seq.enable_filter_intra = reader.get()?;
        seq.enable_intra_edge_filter = reader.get()?;

        seq.seq_force_screen_content_tools = SELECT_SCREEN_CONTENT_TOOLS;
        seq.seq_force_integer_mv = SELECT_INTEGER_MV;
        if !seq.reduced_still_picture_header {
            seq.read_inter_tools(&mut reader)?;
        }

        seq.enable_superres = reader.get()?;
        seq.enable_cdef = reader.get()?;
        seq.enable_restoration = reader.get()?;
        seq.color_config = read_color_config(&mut reader, seq.seq_profile)?;
        seq.film_grain_params_present = reader.get()?;

        trace!(
            "AV1 sequence header: profile {} {}x{} {} bit, timing {:?}",
            seq.seq_profile,
            seq.max_frame_width,
            seq.max_frame_height,
            seq.color_config.bit_depth,
            seq.timing_info
        );

        Ok(seq)
    }

    fn read_timing_and_operating_points(&mut self, reader: &mut BsIoSliceReader) -> Result<()> {
        if reader.get()? {
            let mut timing = TimingInfo {
                num_units_in_display_tick: reader.get_n(32)?,
                time_scale: reader.get_n(32)?,
                equal_picture_interval: reader.get()?,
                num_ticks_per_picture: 1,
            };
            if timing.equal_picture_interval {
                timing.num_ticks_per_picture = reader.get_uvlc()? as u64 + 1;
            }
            self.timing_info = Some(timing);

            if reader.get()? {
                self.decoder_model_info = Some(DecoderModelInfo {
                    buffer_delay_length_minus_1: reader.get_n(5)?,
                    num_units_in_decoding_tick: reader.get_n(32)?,
                    buffer_removal_time_length_minus_1: reader.get_n(5)?,
                    frame_presentation_time_length_minus_1: reader.get_n(5)?,
                });
            }
        }

        let initial_display_delay_present = reader.get()?;
        let operating_points_cnt = reader.get_n::<u8>(5)? + 1;

        for _ in 0..operating_points_cnt {
            let mut op = OperatingPoint {
                idc: reader.get_n(12)?,
                seq_level_idx: reader.get_n(5)?,
                ..Default::default()
            };
            if op.seq_level_idx > 7 {
                op.seq_tier = reader.get_n(1)?;
            }

            if let Some(model) = &self.decoder_model_info {
                op.decoder_model_present = reader.get()?;
                if op.decoder_model_present {
                    let n = model.buffer_delay_length_minus_1 as u32 + 1;
                    reader.skip_n(2 * n + 1)?; // decoder/encoder buffer delay, low_delay_mode_flag
                }
            }

            if initial_display_delay_present && reader.get()? {
                op.initial_display_delay = Some(reader.get_n::<u8>(4)? + 1);
            }

            self.operating_points.push(op);
        }

        Ok(())
    }

    fn read_inter_tools(&mut self, reader: &mut BsIoSliceReader) -> Result<()> {
        self.enable_interintra_compound = reader.get()?;
        self.enable_masked_compound = reader.get()?;
        self.enable_warped_motion = reader.get()?;
        self.enable_dual_filter = reader.get()?;
        self.enable_order_hint = reader.get()?;
        if self.enable_order_hint {
            self.enable_jnt_comp = reader.get()?;
            self.enable_ref_frame_mvs = reader.get()?;
        }

        if !reader.get()? {
            self.seq_force_screen_content_tools = reader.get_n(1)?;
        }
        if self.seq_force_screen_content_tools > 0 && !reader.get()? {
            self.seq_force_integer_mv = reader.get_n(1)?;
        }

        if self.enable_order_hint {
            self.order_hint_bits = reader.get_n::<u8>(3)? + 1;
        }

        Ok(())
    }

    pub fn equal_picture_interval(&self) -> bool {
        self.timing_info.is_some_and(|t| t.equal_picture_interval)
    }

    fn frame_id_length(&self) -> u32 {
        self.additional_frame_id_length_minus_1 as u32 + self.delta_frame_id_length_minus_2 as u32 + 3
    }

    /// Display duration of one picture derived from the timing info.
    pub fn frame_duration(&self) -> Option<Timestamp> {
        let timing = self.timing_info?;
        if timing.time_scale == 0 {
            return None;
        }

        let ns = timing.num_units_in_display_tick as i128
            * timing.num_ticks_per_picture as i128
            * NS_PER_SECOND as i128
            / timing.time_scale as i128;
        i64::try_from(ns).ok().map(Timestamp::from_ns)
    }
}

fn read_color_config(reader: &mut BsIoSliceReader, seq_profile: u8) -> Result<ColorConfig> {
    let mut cc = ColorConfig {
        color_primaries: 2,
        transfer_characteristics: 2,
        matrix_coefficients: 2,
        ..Default::default()
    };

    let high_bitdepth = reader.get()?;
    cc.bit_depth = match (seq_profile, high_bitdepth) {
        (2, true) if reader.get()? => 12,
        (_, true) => 10,
        (_, false) => 8,
    };

    if seq_profile != 1 {
        cc.mono_chrome = reader.get()?;
    }

    if reader.get()? {
        cc.color_primaries = reader.get_n(8)?;
        cc.transfer_characteristics = reader.get_n(8)?;
        cc.matrix_coefficients = reader.get_n(8)?;
    }

    if cc.mono_chrome {
        cc.color_range = reader.get()?;
        cc.subsampling_x = true;
        cc.subsampling_y = true;
        return Ok(cc);
    }

    // BT.709 primaries, sRGB transfer, identity matrix
    if cc.color_primaries == 1 && cc.transfer_characteristics == 13 && cc.matrix_coefficients == 0
    {
        cc.color_range = true;
    } else {
        cc.color_range = reader.get()?;
        match seq_profile {
            0 => (cc.subsampling_x, cc.subsampling_y) = (true, true),
            1 => {}
            _ if cc.bit_depth == 12 => {
                cc.subsampling_x = reader.get()?;
                if cc.subsampling_x {
                    cc.subsampling_y = reader.get()?;
                }
            }
            _ => cc.subsampling_x = true,
        }

        if cc.subsampling_x && cc.subsampling_y {
            cc.chroma_sample_position = reader.get_n(2)?;
        }
    }

    cc.separate_uv_delta_q = reader.get()?;

    Ok(cc)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameType {
    #[default]
    Key,
    Inter,
    IntraOnly,
    Switch,
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value & 3 {
            0 => Self::Key,
            1 => Self::Inter,
            2 => Self::IntraOnly,
            _ => Self::Switch,
        }
    }
}

/// Leading part of `uncompressed_header()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u8,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub error_resilient_mode: bool,
}

impl FrameHeader {
    pub fn decode(payload: &[u8], seq: &SequenceHeader) -> Result<Self> {
        if seq.reduced_still_picture_header {
            return Ok(Self {
                frame_type: FrameType::Key,
                show_frame: true,
                error_resilient_mode: true,
                ..Default::default()
            });
        }

        let mut reader = BsIoSliceReader::from_slice(payload);
        let mut header = Self {
            show_existing_frame: reader.get()?,
            ..Default::default()
        };

        let temporal_point_info = seq
            .decoder_model_info
            .filter(|_| !seq.equal_picture_interval())
            .map(|model| model.frame_presentation_time_length_minus_1 as u32 + 1);

        if header.show_existing_frame {
            header.frame_to_show_map_idx = reader.get_n(3)?;
            header.show_frame = true;
            if let Some(len) = temporal_point_info {
                reader.skip_n(len)?;
            }
            if seq.frame_id_numbers_present {
                reader.skip_n(seq.frame_id_length())?;
            }

            return Ok(header);
        }

        header.frame_type = reader.get_n::<u8>(2)?.into();
        header.show_frame = reader.get()?;
        if header.show_frame {
            if let Some(len) = temporal_point_info {
                reader.skip_n(len)?;
            }
        }

        header.showable_frame = if header.show_frame {
            header.frame_type != FrameType::Key
        } else {
            reader.get()?
        };

        header.error_resilient_mode = header.frame_type == FrameType::Switch
            || (header.frame_type == FrameType::Key && header.show_frame)
            || reader.get()?;

        Ok(header)
    }

    /// A shown key frame, i.e. a random access point.
    pub fn is_keyframe(&self) -> bool {
        !self.show_existing_frame && self.frame_type == FrameType::Key && self.show_frame
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    ContentLightLevel {
        max_cll: u16,
        max_fall: u16,
    },
    MasteringDisplay {
        /// (x, y) for R, G and B in 0.16 fixed point.
        primaries: [(u16, u16); 3],
        white_point: (u16, u16),
        /// 24.8 fixed point candela per square metre.
        luminance_max: u32,
        /// 18.14 fixed point candela per square metre.
        luminance_min: u32,
    },
    ItuTT35 {
        country_code: u8,
        country_code_extension: Option<u8>,
        payload: Vec<u8>,
    },
    Other(u64),
}

impl Metadata {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (metadata_type, len) = read_leb128(payload)?;
        let mut reader = BsIoSliceReader::from_slice(&payload[len..]);

        let metadata = match metadata_type {
            METADATA_TYPE_HDR_CLL => Self::ContentLightLevel {
                max_cll: reader.get_n(16)?,
                max_fall: reader.get_n(16)?,
            },
            METADATA_TYPE_HDR_MDCV => {
                let mut primaries = [(0u16, 0u16); 3];
                for primary in &mut primaries {
                    *primary = (reader.get_n(16)?, reader.get_n(16)?);
                }
                Self::MasteringDisplay {
                    primaries,
                    white_point: (reader.get_n(16)?, reader.get_n(16)?),
                    luminance_max: reader.get_n(32)?,
                    luminance_min: reader.get_n(32)?,
                }
            }
            METADATA_TYPE_ITUT_T35 => {
                let body = &payload[len..];
                let Some(&country_code) = body.first() else {
                    bail!(Av1Error::Truncated("ITU-T T.35 metadata"));
                };
                let (country_code_extension, start) = if country_code == 0xFF {
                    match body.get(1) {
                        Some(&ext) => (Some(ext), 2),
                        None => bail!(Av1Error::Truncated("ITU-T T.35 metadata")),
                    }
                } else {
                    (None, 1)
                };

                Self::ItuTT35 {
                    country_code,
                    country_code_extension,
                    payload: body[start..].to_vec(),
                }
            }
            other => Self::Other(other),
        };

        Ok(metadata)
    }

    /// ITU-T T.35 payload carrying a Dolby Vision RPU.
    pub fn is_dolby_vision_rpu(&self) -> bool {
        let Self::ItuTT35 {
            country_code,
            payload,
            ..
        } = self
        else {
            return false;
        };

        *country_code == T35_COUNTRY_CODE_US
            && payload.len() >= 6
            && u16::from_be_bytes([payload[0], payload[1]]) == T35_PROVIDER_CODE_DOLBY
            && u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]])
                == T35_PROVIDER_ORIENTED_CODE_DOVI
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obu_header_fields() -> Result<()> {
        let header = ObuHeader::decode(&[0x0A, 0x0B])?;
        assert_eq!(header.obu_type, OBU_SEQUENCE_HEADER);
        assert_eq!(header.payload_size, Some(11));
        assert_eq!(header.total_size(), Some(13));

        let header = ObuHeader::decode(&[0x36, 0x48, 0x80, 0x01])?;
        assert_eq!(header.obu_type, OBU_FRAME);
        assert_eq!((header.temporal_id, header.spatial_id), (2, 1));
        assert_eq!(header.header_len, 4);
        assert_eq!(header.payload_size, Some(128));

        let header = ObuHeader::decode(&[0x30])?;
        assert!(!header.has_size_field);
        assert_eq!(header.total_size(), None);

        let err = ObuHeader::decode(&[0x92, 0x00]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Av1Error>(),
            Some(Av1Error::ForbiddenBit)
        ));
        for reserved in [0x02, 0x4A, 0x72] {
            let err = ObuHeader::decode(&[reserved, 0x00]).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Av1Error>(),
                Some(Av1Error::ReservedObuType(_))
            ));
        }
        let err = ObuHeader::decode(&[0x0B, 0x00]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Av1Error>(),
            Some(Av1Error::ReservedBit)
        ));

        let err = ObuHeader::decode(&[0x32, 0x80]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Av1Error>(),
            Some(Av1Error::Truncated(_))
        ));
        Ok(())
    }

    #[test]
    fn leb128_sizes() -> Result<()> {
        assert_eq!(read_leb128(&[0xE5, 0x8E, 0x26, 0xFF])?, (624_485, 3));
        assert_eq!(read_leb128(&[0x00])?, (0, 1));

        let err = read_leb128(&[0x80, 0x80]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Av1Error>(),
            Some(Av1Error::Truncated(_))
        ));
        let err = read_leb128(&[0xFF; 9]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Av1Error>(),
            Some(Av1Error::UnterminatedLeb128)
        ));
        Ok(())
    }

    #[test]
    fn sequence_header_fields() -> Result<()> {
        let seq = SequenceHeader::decode(&test_obus::sequence_header_payload())?;

        assert_eq!(seq.seq_profile, 0);
        assert_eq!((seq.max_frame_width, seq.max_frame_height), (1920, 1080));
        assert_eq!(seq.operating_points.len(), 1);
        assert_eq!(seq.operating_points[0].seq_level_idx, 8);
        assert_eq!(seq.order_hint_bits, 7);
        assert_eq!(seq.seq_force_screen_content_tools, 2);
        assert_eq!(seq.seq_force_integer_mv, 2);
        assert!(seq.enable_cdef);
        assert!(!seq.enable_superres);
        assert_eq!(seq.color_config.bit_depth, 8);
        assert_eq!(seq.color_config.transfer_characteristics, 16);
        assert!(seq.color_config.subsampling_x && seq.color_config.subsampling_y);
        assert!(!seq.film_grain_params_present);
        assert_eq!(seq.frame_duration(), Some(Timestamp::from_ns(41_708_333)));
        Ok(())
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let err = SequenceHeader::decode(&[0xE0, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Av1Error>(),
            Some(Av1Error::InvalidSequenceProfile(7))
        ));
    }

    #[test]
    fn frame_header_prefix() -> Result<()> {
        use super::test_obus::*;

        let seq = SequenceHeader::decode(&sequence_header_payload())?;

        let key = FrameHeader::decode(&frame_payload(0, true), &seq)?;
        assert!(key.is_keyframe());
        assert!(!key.showable_frame);
        assert!(key.error_resilient_mode);

        let hidden_key = FrameHeader::decode(&frame_payload(0, false), &seq)?;
        assert!(!hidden_key.is_keyframe());
        assert!(hidden_key.showable_frame);

        let inter = FrameHeader::decode(&frame_payload(1, true), &seq)?;
        assert_eq!(inter.frame_type, FrameType::Inter);
        assert!(!inter.error_resilient_mode);

        let existing = FrameHeader::decode(&show_existing_frame_payload(5), &seq)?;
        assert!(existing.show_existing_frame);
        assert_eq!(existing.frame_to_show_map_idx, 5);
        assert!(!existing.is_keyframe());
        Ok(())
    }

    #[test]
    fn metadata_payloads() -> Result<()> {
        let cll = Metadata::decode(&[0x01, 0x03, 0xE8, 0x01, 0x90])?;
        assert_eq!(
            cll,
            Metadata::ContentLightLevel {
                max_cll: 1000,
                max_fall: 400
            }
        );

        let mut mdcv = vec![0x02];
        for value in [
            34000u16, 16000, 13250, 34500, 7500, 3000, 15635, 16450,
        ] {
            mdcv.extend_from_slice(&value.to_be_bytes());
        }
        mdcv.extend_from_slice(&(1000u32 << 8).to_be_bytes());
        mdcv.extend_from_slice(&50u32.to_be_bytes());
        let Metadata::MasteringDisplay {
            primaries,
            white_point,
            luminance_max,
            ..
        } = Metadata::decode(&mdcv)?
        else {
            panic!("expected mastering display metadata");
        };
        assert_eq!(primaries[1], (13250, 34500));
        assert_eq!(white_point, (15635, 16450));
        assert_eq!(luminance_max >> 8, 1000);

        let dovi = Metadata::decode(&test_obus::dovi_t35_payload())?;
        assert!(dovi.is_dolby_vision_rpu());

        let mut other = test_obus::dovi_t35_payload();
        other[3] = 0x3C;
        assert!(!Metadata::decode(&other)?.is_dolby_vision_rpu());
        assert_eq!(Metadata::decode(&[0x06])?, Metadata::Other(6));
        Ok(())
    }
}
