//! VC-1 advanced profile sequence, entry point and picture headers.

use std::fmt::{Display, Formatter};

use anyhow::{Result, bail};
use log::trace;

use crate::structs::nal::SAMPLE_ASPECT_RATIOS;
use crate::structs::timestamp::NS_PER_SECOND;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::Vc1Error;

pub const SC_END_OF_SEQUENCE: u8 = 0x0A;
pub const SC_SLICE: u8 = 0x0B;
pub const SC_FIELD: u8 = 0x0C;
pub const SC_FRAME: u8 = 0x0D;
pub const SC_ENTRY_POINT: u8 = 0x0E;
pub const SC_SEQUENCE_HEADER: u8 = 0x0F;
pub const SC_SLICE_USER_DATA: u8 = 0x1B;
pub const SC_FIELD_USER_DATA: u8 = 0x1C;
pub const SC_FRAME_USER_DATA: u8 = 0x1D;
pub const SC_ENTRY_POINT_USER_DATA: u8 = 0x1E;
pub const SC_SEQUENCE_USER_DATA: u8 = 0x1F;

pub const PROFILE_ADVANCED: u8 = 3;
const MAX_LEVEL: u8 = 4;

const FRAME_RATE_NR: [u32; 7] = [24, 25, 30, 50, 60, 48, 72];

pub fn start_code_name(code: u8) -> &'static str {
    match code {
        SC_END_OF_SEQUENCE => "end of sequence",
        SC_SLICE => "slice",
        SC_FIELD => "field",
        SC_FRAME => "frame",
        SC_ENTRY_POINT => "entry point",
        SC_SEQUENCE_HEADER => "sequence header",
        SC_SLICE_USER_DATA..=SC_SEQUENCE_USER_DATA => "user data",
        _ => "reserved",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRate {
    /// `FRAMERATENR` / `FRAMERATEDR` pair, as frames per second numerator
    /// and denominator.
    Ratio { numerator: u32, denominator: u32 },
    /// `FRAMERATEEXP`, frames per second times 32 minus one.
    Explicit(u16),
}

impl FrameRate {
    pub fn frame_duration_ns(&self) -> i64 {
        match *self {
            Self::Ratio {
                numerator,
                denominator,
            } => NS_PER_SECOND * denominator as i64 / numerator as i64,
            Self::Explicit(exp) => NS_PER_SECOND * 32 / (exp as i64 + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorFormat {
    pub color_prim: u8,
    pub transfer_char: u8,
    pub matrix_coef: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayExtension {
    pub display_width: u16,
    pub display_height: u16,
    /// Sample aspect ratio.
    pub aspect_ratio: Option<(u16, u16)>,
    pub frame_rate: Option<FrameRate>,
    pub color_format: Option<ColorFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HrdParameters {
    pub bit_rate_exponent: u8,
    pub buffer_size_exponent: u8,
    /// `(HRD_RATE, HRD_BUFFER)` per leaky bucket.
    pub buckets: Vec<(u16, u16)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceHeader {
    pub profile: u8,
    pub level: u8,
    pub colordiff_format: u8,
    pub frmrtq_postproc: u8,
    pub bitrtq_postproc: u8,
    pub postproc_flag: bool,
    pub max_coded_width: u16,
    pub max_coded_height: u16,
    pub pulldown: bool,
    pub interlace: bool,
    pub tfcntr_flag: bool,
    pub finterp_flag: bool,
    pub psf: bool,
    pub display_extension: Option<DisplayExtension>,
    pub hrd: Option<HrdParameters>,
}

impl SequenceHeader {
    /// Decodes the payload following the `0x0F` start code suffix.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 6 {
            bail!(Vc1Error::Truncated);
        }

        let mut reader = BsIoSliceReader::from_slice(payload);
        let profile = reader.get_n(2)?;
        if profile != PROFILE_ADVANCED {
            bail!(Vc1Error::NotAdvancedProfile(profile));
        }

        let level = reader.get_n(3)?;
        if level > MAX_LEVEL {
            bail!(Vc1Error::InvalidLevel(level));
        }

        let mut seq = Self {
            profile,
            level,
            colordiff_format: reader.get_n(2)?,
            frmrtq_postproc: reader.get_n(3)?,
            bitrtq_postproc: reader.get_n(5)?,
            postproc_flag: reader.get()?,
            max_coded_width: (reader.get_n::<u16>(12)? + 1) * 2,
            max_coded_height: (reader.get_n::<u16>(12)? + 1) * 2,
            pulldown: reader.get()?,
            interlace: reader.get()?,
            tfcntr_flag: reader.get()?,
            finterp_flag: reader.get()?,
            ..Default::default()
        };

        reader.skip_n(1)?;
        seq.psf = reader.get()?;

        if reader.get()? {
            seq.display_extension = Some(read_display_extension(&mut reader)?);
        }

        if reader.get()? {
            let bucket_count = reader.get_n::<u8>(5)?;
            let mut hrd = HrdParameters {
                bit_rate_exponent: reader.get_n(4)?,
                buffer_size_exponent: reader.get_n(4)?,
                buckets: Vec::with_capacity(bucket_count as usize),
            };
            for _ in 0..bucket_count {
                hrd.buckets.push((reader.get_n(16)?, reader.get_n(16)?));
            }
            seq.hrd = Some(hrd);
        }

        trace!(
            "VC-1 sequence header: level {} {}x{}{}",
            seq.level,
            seq.max_coded_width,
            seq.max_coded_height,
            if seq.interlace { " interlaced" } else { "" }
        );

        Ok(seq)
    }

    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.display_extension.as_ref()?.frame_rate
    }

    pub fn frame_duration_ns(&self) -> Option<i64> {
        self.frame_rate().map(|rate| rate.frame_duration_ns())
    }

    fn hrd_bucket_count(&self) -> usize {
        self.hrd.as_ref().map_or(0, |hrd| hrd.buckets.len())
    }
}

fn read_display_extension(reader: &mut BsIoSliceReader) -> Result<DisplayExtension> {
    let mut ext = DisplayExtension {
        display_width: reader.get_n::<u16>(14)? + 1,
        display_height: reader.get_n::<u16>(14)? + 1,
        ..Default::default()
    };

    if reader.get()? {
        let aspect_ratio = reader.get_n::<u8>(4)?;
        ext.aspect_ratio = match aspect_ratio {
            1..=13 => Some(SAMPLE_ASPECT_RATIOS[aspect_ratio as usize - 1]),
            15 => Some((reader.get_n(8)?, reader.get_n(8)?)),
            _ => None,
        };
    }

    if reader.get()? {
        ext.frame_rate = if reader.get()? {
            Some(FrameRate::Explicit(reader.get_n(16)?))
        } else {
            let nr = reader.get_n::<u8>(8)?;
            let dr = reader.get_n::<u8>(4)?;
            match (nr, dr) {
                (1..=7, 1 | 2) => Some(FrameRate::Ratio {
                    numerator: FRAME_RATE_NR[nr as usize - 1] * 1000,
                    denominator: if dr == 1 { 1000 } else { 1001 },
                }),
                _ => None,
            }
        };
    }

    if reader.get()? {
        ext.color_format = Some(ColorFormat {
            color_prim: reader.get_n(8)?,
            transfer_char: reader.get_n(8)?,
            matrix_coef: reader.get_n(8)?,
        });
    }

    Ok(ext)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoint {
    pub broken_link: bool,
    pub closed_entry: bool,
    pub panscan_flag: bool,
    pub refdist_flag: bool,
    pub loopfilter: bool,
    pub fastuvmc: bool,
    pub extended_mv: bool,
    pub dquant: u8,
    pub vstransform: bool,
    pub overlap: bool,
    pub quantizer: u8,
    pub hrd_full: Vec<u8>,
    pub coded_size: Option<(u16, u16)>,
    pub extended_dmv: bool,
    pub range_mapy: Option<u8>,
    pub range_mapuv: Option<u8>,
}

impl EntryPoint {
    pub fn decode(payload: &[u8], seq: &SequenceHeader) -> Result<Self> {
        if payload.len() < 2 {
            bail!(Vc1Error::Truncated);
        }

        let mut reader = BsIoSliceReader::from_slice(payload);
        let mut entry = Self {
            broken_link: reader.get()?,
            closed_entry: reader.get()?,
            panscan_flag: reader.get()?,
            refdist_flag: reader.get()?,
            loopfilter: reader.get()?,
            fastuvmc: reader.get()?,
            extended_mv: reader.get()?,
            dquant: reader.get_n(2)?,
            vstransform: reader.get()?,
            overlap: reader.get()?,
            quantizer: reader.get_n(2)?,
            ..Default::default()
        };

        for _ in 0..seq.hrd_bucket_count() {
            entry.hrd_full.push(reader.get_n(8)?);
        }

        if reader.get()? {
            let width = (reader.get_n::<u16>(12)? + 1) * 2;
            let height = (reader.get_n::<u16>(12)? + 1) * 2;
            entry.coded_size = Some((width, height));
        }

        if entry.extended_mv {
            entry.extended_dmv = reader.get()?;
        }
        if reader.get()? {
            entry.range_mapy = Some(reader.get_n(3)?);
        }
        if reader.get()? {
            entry.range_mapuv = Some(reader.get_n(3)?);
        }

        Ok(entry)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PictureType {
    #[default]
    I,
    P,
    B,
    Bi,
    /// Skipped P picture, repeats the previous anchor.
    Skipped,
}

impl PictureType {
    /// I, P and skipped pictures can be referenced and are shown delayed.
    pub fn is_anchor(&self) -> bool {
        matches!(self, Self::I | Self::P | Self::Skipped)
    }
}

impl Display for PictureType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::I => "I",
            Self::P => "P",
            Self::B => "B",
            Self::Bi => "BI",
            Self::Skipped => "skipped",
        })
    }
}

/// `FPTYPE` field picture type pairs.
const FIELD_PICTURE_TYPES: [(PictureType, PictureType); 8] = [
    (PictureType::I, PictureType::I),
    (PictureType::I, PictureType::P),
    (PictureType::P, PictureType::I),
    (PictureType::P, PictureType::P),
    (PictureType::B, PictureType::B),
    (PictureType::B, PictureType::Bi),
    (PictureType::Bi, PictureType::B),
    (PictureType::Bi, PictureType::Bi),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameCodingMode {
    #[default]
    Progressive,
    FrameInterlace,
    FieldInterlace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub fcm: FrameCodingMode,
    /// Type of the frame, or of the first field of a field pair.
    pub picture_type: PictureType,
    pub second_field_type: Option<PictureType>,
    pub tfcntr: Option<u8>,
    pub repeat_frame: u8,
    pub top_field_first: bool,
    pub repeat_first_field: bool,
}

impl FrameHeader {
    /// Decodes the start of the picture layer following a `0x0D` start code
    /// suffix.
    pub fn decode(payload: &[u8], seq: &SequenceHeader) -> Result<Self> {
        if payload.is_empty() {
            bail!(Vc1Error::Truncated);
        }

        let mut reader = BsIoSliceReader::from_slice(payload);
        let mut header = Self {
            top_field_first: true,
            ..Default::default()
        };

        if seq.interlace {
            header.fcm = if !reader.get()? {
                FrameCodingMode::Progressive
            } else if !reader.get()? {
                FrameCodingMode::FrameInterlace
            } else {
                FrameCodingMode::FieldInterlace
            };
        }

        if header.fcm == FrameCodingMode::FieldInterlace {
            let (first, second) = FIELD_PICTURE_TYPES[reader.get_n::<u8>(3)? as usize];
            header.picture_type = first;
            header.second_field_type = Some(second);
        } else {
            header.picture_type = read_picture_type(&mut reader)?;
        }

        if seq.tfcntr_flag {
            header.tfcntr = Some(reader.get_n(8)?);
        }

        if seq.pulldown {
            if !seq.interlace || seq.psf {
                header.repeat_frame = reader.get_n(2)?;
            } else {
                header.top_field_first = reader.get()?;
                header.repeat_first_field = reader.get()?;
            }
        }

        Ok(header)
    }

    pub fn is_keyframe(&self) -> bool {
        self.picture_type == PictureType::I
    }

    /// Displayed fields, two per frame plus repeats.
    pub fn field_count(&self) -> u32 {
        2 + 2 * self.repeat_frame as u32 + self.repeat_first_field as u32
    }
}

/// `PTYPE`: 0 P, 10 B, 110 I, 1110 BI, 1111 skipped.
fn read_picture_type(reader: &mut BsIoSliceReader) -> Result<PictureType> {
    const TYPES: [PictureType; 4] = [
        PictureType::P,
        PictureType::B,
        PictureType::I,
        PictureType::Bi,
    ];

    for picture_type in TYPES {
        if !reader.get()? {
            return Ok(picture_type);
        }
    }
    Ok(PictureType::Skipped)
}

#[cfg(test)]
pub(crate) mod test_units {
    use super::*;
    use crate::utils::testing::TestBitWriter;

    /// 1920x1080 sequence header at 24000/1001 fps with one HRD bucket.
    pub fn sequence_header(interlace: bool, pulldown: bool) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(8, SC_SEQUENCE_HEADER as u64)
            .bits(2, PROFILE_ADVANCED as u64)
            .bits(3, 3)
            .bits(2, 1)
            .bits(3, 7)
            .bits(5, 31)
            .flag(false)
            .bits(12, 959)
            .bits(12, 539)
            .flag(pulldown)
            .flag(interlace)
            .flag(true)
            .flag(false)
            .flag(true)
            .flag(false);

        // Display extension
        w.flag(true)
            .bits(14, 1919)
            .bits(14, 1079)
            .flag(true)
            .bits(4, 1)
            .flag(true)
            .flag(false)
            .bits(8, 1)
            .bits(4, 2)
            .flag(true)
            .bits(8, 1)
            .bits(8, 1)
            .bits(8, 1);

        // HRD
        w.flag(true).bits(5, 1).bits(4, 5).bits(4, 6).bits(16, 0x1234).bits(16, 0x5678);
        w.trailing_bits().finish()
    }

    pub fn entry_point(closed: bool) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(8, SC_ENTRY_POINT as u64)
            .flag(false)
            .flag(closed)
            .flag(false)
            .flag(true)
            .flag(true)
            .flag(true)
            .flag(true)
            .bits(2, 0)
            .flag(true)
            .flag(false)
            .bits(2, 1)
            .bits(8, 0x80)
            .flag(false)
            .flag(true)
            .flag(true)
            .bits(3, 4)
            .flag(false);
        w.trailing_bits().finish()
    }

    fn picture_type_code(w: &mut TestBitWriter, picture_type: PictureType) {
        match picture_type {
            PictureType::P => w.bits(1, 0b0),
            PictureType::B => w.bits(2, 0b10),
            PictureType::I => w.bits(3, 0b110),
            PictureType::Bi => w.bits(4, 0b1110),
            PictureType::Skipped => w.bits(4, 0b1111),
        };
    }

    /// Progressive frame for a sequence without interlace and pulldown.
    pub fn frame(picture_type: PictureType, tfcntr: u8) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(8, SC_FRAME as u64);
        picture_type_code(&mut w, picture_type);
        w.bits(8, tfcntr as u64).bits(8, 0xA5);
        w.trailing_bits().finish()
    }

    /// Frame interlaced picture for a sequence with interlace and pulldown.
    pub fn interlaced_frame(picture_type: PictureType, rff: bool) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(8, SC_FRAME as u64).bits(2, 0b10);
        picture_type_code(&mut w, picture_type);
        w.bits(8, 0).flag(true).flag(rff).bits(8, 0xA5);
        w.trailing_bits().finish()
    }

    /// Field pair picture for a sequence with interlace and pulldown.
    pub fn field_pair_frame(fptype: u8) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(8, SC_FRAME as u64)
            .bits(2, 0b11)
            .bits(3, fptype as u64)
            .bits(8, 0)
            .flag(false)
            .flag(false)
            .bits(8, 0xA5);
        w.trailing_bits().finish()
    }

    pub fn field() -> Vec<u8> {
        vec![SC_FIELD, 0x5A, 0xA5, 0x80]
    }

    pub fn end_of_sequence() -> Vec<u8> {
        vec![SC_END_OF_SEQUENCE]
    }
}
