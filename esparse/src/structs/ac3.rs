//! AC-3 and E-AC-3 sync frame headers.
//!
//! ## Bitstream ids
//!
//! - `bsid <= 8`: AC-3 (A/52 Annex A), 9 and 10 are the half and quarter
//!   sample rate variants.
//! - `bsid == 16`: Enhanced AC-3 (A/52 Annex E).
//! - Anything else is rejected.
//!
//! Dependent E-AC-3 substreams and additional independent substreams are
//! attached to the preceding independent frame by the parser, see
//! [`Ac3Header::dependent_frames`].

use anyhow::{Result, bail};
use log::trace;

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::{
    AC3_CRC_POLY_FULL, AC3_CRC_POLY_INVERSE, CRC_AC3_ALG, Crc16, mul_poly, pow_poly,
};
use crate::utils::errors::Ac3Error;

pub const AC3_SYNC_WORD: u16 = 0x0B77;

/// Bytes needed to size a frame and decode the fields used for multiplexing.
pub const AC3_HEADER_SIZE: usize = 18;

pub const AC3_SAMPLES_PER_FRAME: u32 = 1536;

pub const EAC3_BSID: u8 = 16;

pub const SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];
pub const REDUCED_SAMPLE_RATES: [u32; 3] = [24000, 22050, 16000];
pub const EAC3_BLOCKS: [u8; 4] = [1, 2, 3, 6];

/// Nominal bit rates in kbit/s indexed by `frmsizecod >> 1`.
pub const BIT_RATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

/// Channel locations, laid out like the E-AC-3 `chanmap` field.
pub mod location {
    pub const L: u16 = 1 << 15;
    pub const C: u16 = 1 << 14;
    pub const R: u16 = 1 << 13;
    pub const LS: u16 = 1 << 12;
    pub const RS: u16 = 1 << 11;
    pub const LC_RC: u16 = 1 << 10;
    pub const LRS_RRS: u16 = 1 << 9;
    pub const CS: u16 = 1 << 8;
    pub const TS: u16 = 1 << 7;
    pub const LSD_RSD: u16 = 1 << 6;
    pub const LW_RW: u16 = 1 << 5;
    pub const LVH_RVH: u16 = 1 << 4;
    pub const CVH: u16 = 1 << 3;
    pub const RESERVED: u16 = 1 << 2;
    pub const LFE2: u16 = 1 << 1;
    pub const LFE: u16 = 1;

    /// Locations that stand for a pair of channels.
    pub const PAIRS: u16 = LC_RC | LRS_RRS | LSD_RSD | LW_RW | LVH_RVH;
}

static CRC_AC3: Crc16 = Crc16::new(&CRC_AC3_ALG);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ac3FrameType {
    #[default]
    Independent,
    Dependent,
    Ac3Convert,
}

/// Location and value of a `dialnorm` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialNorm {
    pub value: u8,
    /// Bit offset from the first byte of the sync frame.
    pub bit_position: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ac3Header {
    pub bsid: u8,
    pub bsmod: u8,
    pub frame_type: Ac3FrameType,
    pub substream_id: u8,
    pub sample_rate: u32,
    /// Bits per second, derived from the frame size for E-AC-3.
    pub bit_rate: u32,
    pub frame_size: usize,
    pub audio_blocks: u8,
    pub samples: u32,
    pub acmod: u8,
    pub lfeon: bool,
    pub channels: u8,
    pub channel_layout: u16,
    pub chanmap: Option<u16>,
    pub dialnorm: Vec<DialNorm>,
    pub dependent_frames: Vec<Ac3Header>,
}

impl Ac3Header {
    pub fn is_eac3(&self) -> bool {
        self.bsid == EAC3_BSID
    }

    /// Reads the header of the sync frame at the start of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            bail!(Ac3Error::HeaderTooShort(data.len()));
        }

        let sync = u16::from_be_bytes([data[0], data[1]]);
        if sync != AC3_SYNC_WORD {
            bail!(Ac3Error::InvalidSyncWord(sync));
        }

        let bsid = data[5] >> 3;
        let header = match bsid {
            EAC3_BSID => Self::decode_eac3(data),
            0..=10 => Self::decode_ac3(data),
            _ => bail!(Ac3Error::UnsupportedBsid(bsid)),
        };

        header.map_err(|e| {
            let eof = e
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::UnexpectedEof);
            if eof {
                Ac3Error::HeaderTooShort(data.len()).into()
            } else {
                e
            }
        })
    }

    fn decode_ac3(data: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(data);
        reader.skip_n(32)?;

        let fscod: u8 = reader.get_n(2)?;
        let frmsizecod: u8 = reader.get_n(6)?;
        if fscod == 3 {
            bail!(Ac3Error::InvalidSampleRateCode(fscod));
        }
        if frmsizecod > 37 {
            bail!(Ac3Error::InvalidFrameSizeCode(frmsizecod));
        }

        let bsid: u8 = reader.get_n(5)?;
        let shift = bsid.saturating_sub(8);
        let kbps = BIT_RATES[(frmsizecod >> 1) as usize];
        let words = match fscod {
            0 => kbps * 2,
            1 => kbps * 320 / 147 + (frmsizecod & 1) as u32,
            _ => kbps * 3,
        };

        let mut header = Self {
            bsid,
            bsmod: reader.get_n(3)?,
            acmod: reader.get_n(3)?,
            sample_rate: SAMPLE_RATES[fscod as usize] >> shift,
            bit_rate: (kbps * 1000) >> shift,
            frame_size: words as usize * 2,
            audio_blocks: 6,
            samples: AC3_SAMPLES_PER_FRAME,
            ..Default::default()
        };

        let acmod = header.acmod;
        if acmod & 1 != 0 && acmod != 1 {
            reader.skip_n(2)?; // cmixlev
        }
        if acmod & 4 != 0 {
            reader.skip_n(2)?; // surmixlev
        }
        if acmod == 2 {
            reader.skip_n(2)?; // dsurmod
        }
        header.lfeon = reader.get()?;

        header.read_dialnorm(&mut reader)?;
        Self::skip_optional(&mut reader, 8)?; // compr
        Self::skip_optional(&mut reader, 8)?; // langcod
        Self::skip_optional(&mut reader, 7)?; // mixlevel, roomtyp

        if acmod == 0 {
            header.read_dialnorm(&mut reader)?;
            Self::skip_optional(&mut reader, 8)?; // compr2
            Self::skip_optional(&mut reader, 8)?; // langcod2
            Self::skip_optional(&mut reader, 7)?; // mixlevel2, roomtyp2
        }

        header.finish_channels();

        trace!(
            "AC-3 header: bsid {} {} Hz {} bit/s {} bytes acmod {} lfe {}",
            header.bsid,
            header.sample_rate,
            header.bit_rate,
            header.frame_size,
            header.acmod,
            header.lfeon
        );

        Ok(header)
    }

    fn decode_eac3(data: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(data);
        reader.skip_n(16)?;

        let frame_type = match reader.get_n::<u8>(2)? {
            0 => Ac3FrameType::Independent,
            1 => Ac3FrameType::Dependent,
            2 => Ac3FrameType::Ac3Convert,
            _ => bail!(Ac3Error::ReservedStreamType),
        };

        let substream_id: u8 = reader.get_n(3)?;
        let frmsiz: u16 = reader.get_n(11)?;
        let fscod: u8 = reader.get_n(2)?;

        let (sample_rate, audio_blocks) = if fscod == 3 {
            let fscod2: u8 = reader.get_n(2)?;
            if fscod2 == 3 {
                bail!(Ac3Error::InvalidSampleRateCode(fscod2));
            }
            (REDUCED_SAMPLE_RATES[fscod2 as usize], 6)
        } else {
            let numblkscod: u8 = reader.get_n(2)?;
            (SAMPLE_RATES[fscod as usize], EAC3_BLOCKS[numblkscod as usize])
        };

        let frame_size = (frmsiz as usize + 1) * 2;
        let samples = audio_blocks as u32 * 256;

        let mut header = Self {
            frame_type,
            substream_id,
            sample_rate,
            frame_size,
            audio_blocks,
            samples,
            bit_rate: (frame_size as u64 * 8 * sample_rate as u64 / samples as u64) as u32,
            acmod: reader.get_n(3)?,
            lfeon: reader.get()?,
            bsid: reader.get_n(5)?,
            ..Default::default()
        };

        header.read_dialnorm(&mut reader)?;
        Self::skip_optional(&mut reader, 8)?; // compr
        if header.acmod == 0 {
            header.read_dialnorm(&mut reader)?;
            Self::skip_optional(&mut reader, 8)?; // compr2
        }

        if frame_type == Ac3FrameType::Dependent && reader.get()? {
            header.chanmap = Some(reader.get_n(16)?);
        }

        header.finish_channels();

        trace!(
            "E-AC-3 header: {:?} substream {} {} Hz {} bytes {} blocks acmod {} lfe {} chanmap {:?}",
            header.frame_type,
            header.substream_id,
            header.sample_rate,
            header.frame_size,
            header.audio_blocks,
            header.acmod,
            header.lfeon,
            header.chanmap
        );

        Ok(header)
    }

    fn read_dialnorm(&mut self, reader: &mut BsIoSliceReader) -> Result<()> {
        let bit_position = reader.position()? as usize;
        let value = reader.get_n(5)?;
        self.dialnorm.push(DialNorm {
            value,
            bit_position,
        });

        Ok(())
    }

    fn skip_optional(reader: &mut BsIoSliceReader, bits: u32) -> Result<()> {
        if reader.get()? {
            reader.skip_n(bits)?;
        }

        Ok(())
    }

    fn finish_channels(&mut self) {
        self.channel_layout = match self.chanmap {
            Some(chanmap) => chanmap,
            None => acmod_layout(self.acmod, self.lfeon),
        };
        self.channels = channel_count(self.channel_layout);
    }

    /// Channels of this frame combined with all attached substreams.
    pub fn effective_channels(&self) -> u8 {
        if self.dependent_frames.is_empty() {
            return self.channels;
        }

        let layout = self
            .dependent_frames
            .iter()
            .fold(self.channel_layout, |layout, dep| layout | dep.channel_layout);

        channel_count(layout)
    }
}

/// Channel locations of an `acmod`/`lfeon` combination.
pub fn acmod_layout(acmod: u8, lfeon: bool) -> u16 {
    use location::*;

    let layout = match acmod {
        0 => L | R,
        1 => C,
        2 => L | R,
        3 => L | C | R,
        4 => L | R | CS,
        5 => L | C | R | CS,
        6 => L | R | LS | RS,
        _ => L | C | R | LS | RS,
    };

    if lfeon { layout | LFE } else { layout }
}

pub fn channel_count(layout: u16) -> u8 {
    let layout = layout & !location::RESERVED;
    (layout.count_ones() + (layout & location::PAIRS).count_ones()) as u8
}

/// Returns the offset of the first frame that starts a chain of `n`
/// consecutive valid headers with matching sample rates.
pub fn find_consecutive_frames(buffer: &[u8], n: usize) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&base| {
        matches!(check_consecutive_frames(buffer, base, n, false), FrameChain::Complete)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameChain {
    Complete,
    Broken,
    /// The buffer ended before `n` headers could be checked.
    Incomplete,
}

/// Follows the frame chain starting at `base`. With `partial_ok` a chain that
/// runs into the end of the buffer counts as complete.
pub fn check_consecutive_frames(
    buffer: &[u8],
    base: usize,
    n: usize,
    partial_ok: bool,
) -> FrameChain {
    let mut offset = base;
    let mut sample_rate = None;

    for _ in 0..n.max(1) {
        let Some(data) = buffer.get(offset..) else {
            return if partial_ok {
                FrameChain::Complete
            } else {
                FrameChain::Incomplete
            };
        };
        if data.is_empty() && partial_ok && offset > base {
            return FrameChain::Complete;
        }

        let header = match Ac3Header::decode(data) {
            Ok(header) => header,
            Err(e) => {
                return match e.downcast_ref::<Ac3Error>() {
                    Some(Ac3Error::HeaderTooShort(_)) if partial_ok && offset > base => {
                        FrameChain::Complete
                    }
                    Some(Ac3Error::HeaderTooShort(_)) => FrameChain::Incomplete,
                    _ => FrameChain::Broken,
                };
            }
        };

        if *sample_rate.get_or_insert(header.sample_rate) != header.sample_rate {
            return FrameChain::Broken;
        }

        offset += header.frame_size;
    }

    FrameChain::Complete
}

/// Number of bytes covered by AC-3 `crc1`.
pub fn frame_size_58(frame_size: usize) -> usize {
    ((frame_size >> 2) + (frame_size >> 4)) << 1
}

/// Recomputes `crc1` (AC-3 only) and `crc2` of a single sync frame.
pub fn write_checksums(frame: &mut [u8], header: &Ac3Header) -> Result<()> {
    let size = header.frame_size;
    if frame.len() < size || size < 6 {
        bail!(Ac3Error::FrameTooShort {
            needed: size,
            available: frame.len(),
        });
    }

    if !header.is_eac3() {
        let len_58 = frame_size_58(size);
        let crc = CRC_AC3.checksum(&frame[4..len_58]) as u32;
        let crc_inv = pow_poly(
            AC3_CRC_POLY_INVERSE,
            (8 * len_58 - 16) as u32,
            AC3_CRC_POLY_FULL,
        );
        let crc1 = mul_poly(crc_inv, crc, AC3_CRC_POLY_FULL) as u16;
        frame[2..4].copy_from_slice(&crc1.to_be_bytes());
    }

    let crc2 = CRC_AC3.checksum(&frame[2..size - 2]);
    frame[size - 2..size].copy_from_slice(&crc2.to_be_bytes());

    Ok(())
}

/// Validates `crc1` (AC-3 only) and `crc2` of a single sync frame.
pub fn verify_checksums(frame: &[u8], header: &Ac3Header) -> bool {
    let size = header.frame_size;
    if frame.len() < size || size < 6 {
        return false;
    }

    if !header.is_eac3() && CRC_AC3.checksum(&frame[2..frame_size_58(size)]) != 0 {
        return false;
    }

    CRC_AC3.checksum(&frame[2..size]) == 0
}

/// Sets every `dialnorm` field of a single sync frame to 31 (0 dB
/// attenuation) and recomputes the checksums. Returns false if the frame
/// already carried 0 dB everywhere.
pub fn remove_dialog_normalization_gain(frame: &mut [u8], header: &Ac3Header) -> Result<bool> {
    if header.dialnorm.iter().all(|d| d.value == 31) {
        return Ok(false);
    }

    for dialnorm in &header.dialnorm {
        write_bits(frame, dialnorm.bit_position, 5, 31)?;
    }

    write_checksums(frame, header)?;
    Ok(true)
}

fn write_bits(data: &mut [u8], bit_position: usize, bits: u32, value: u32) -> Result<()> {
    let end = bit_position + bits as usize;
    if end > data.len() * 8 {
        bail!(Ac3Error::FrameTooShort {
            needed: end.div_ceil(8),
            available: data.len(),
        });
    }

    for i in 0..bits as usize {
        let bit = (value >> (bits as usize - 1 - i)) & 1;
        let pos = bit_position + i;
        let mask = 0x80u8 >> (pos & 7);
        if bit != 0 {
            data[pos >> 3] |= mask;
        } else {
            data[pos >> 3] &= !mask;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_frames {
    use super::*;
    use crate::utils::testing::TestBitWriter;

    /// Builds a valid AC-3 sync frame with zeroed audio blocks.
    pub fn ac3_frame(fscod: u8, frmsizecod: u8, acmod: u8, lfeon: bool, dialnorm: u8) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(16, AC3_SYNC_WORD as u64)
            .bits(16, 0)
            .bits(2, fscod as u64)
            .bits(6, frmsizecod as u64)
            .bits(5, 8)
            .bits(3, 0)
            .bits(3, acmod as u64);
        if acmod & 1 != 0 && acmod != 1 {
            w.bits(2, 0);
        }
        if acmod & 4 != 0 {
            w.bits(2, 0);
        }
        if acmod == 2 {
            w.bits(2, 0);
        }
        w.flag(lfeon).bits(5, dialnorm as u64).bits(3, 0);
        if acmod == 0 {
            w.bits(5, dialnorm as u64).bits(3, 0);
        }
        w.bits(2, 0b11).bits(3, 0);

        let mut frame = w.finish();
        let header = Ac3Header::decode(&frame).expect("valid header");
        frame.resize(header.frame_size, 0);
        write_checksums(&mut frame, &header).expect("checksums");
        frame
    }

    /// Builds a valid E-AC-3 sync frame of `frame_size` bytes.
    pub fn eac3_frame(
        dependent: bool,
        substream_id: u8,
        frame_size: usize,
        acmod: u8,
        lfeon: bool,
        chanmap: Option<u16>,
    ) -> Vec<u8> {
        let mut w = TestBitWriter::default();
        w.bits(16, AC3_SYNC_WORD as u64)
            .bits(2, dependent as u64)
            .bits(3, substream_id as u64)
            .bits(11, (frame_size / 2 - 1) as u64)
            .bits(2, 0)
            .bits(2, 3)
            .bits(3, acmod as u64)
            .flag(lfeon)
            .bits(5, EAC3_BSID as u64)
            .bits(5, 27)
            .flag(false);
        if acmod == 0 {
            w.bits(5, 27).flag(false);
        }
        if dependent {
            match chanmap {
                Some(chanmap) => w.flag(true).bits(16, chanmap as u64),
                None => w.flag(false),
            };
        }

        let mut frame = w.finish();
        frame.resize(frame_size, 0);
        let header = Ac3Header::decode(&frame).expect("valid header");
        write_checksums(&mut frame, &header).expect("checksums");
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ac3_48khz() -> Result<()> {
        let frame = test_frames::ac3_frame(0, 0, 7, true, 27);
        let header = Ac3Header::decode(&frame)?;

        assert_eq!(header.sample_rate, 48000);
        assert_eq!(header.samples, 1536);
        assert_eq!(header.frame_type, Ac3FrameType::Independent);
        assert_eq!(header.frame_size, 128);
        assert_eq!(header.bit_rate, 32_000);
        assert_eq!(header.channels, 6);
        assert_eq!(header.dialnorm.len(), 1);
        assert_eq!(header.dialnorm[0].value, 27);
        assert!(verify_checksums(&frame, &header));
        Ok(())
    }

    #[test]
    fn reduced_rate_and_reserved_bsids() -> Result<()> {
        let with_bsid = |bsid: u8| {
            let mut frame = test_frames::ac3_frame(0, 8, 2, false, 31);
            frame[5] = (frame[5] & 0x07) | (bsid << 3);
            frame
        };

        let header = Ac3Header::decode(&with_bsid(10))?;
        assert_eq!(header.sample_rate, 12000);

        for bsid in [11, 12, 15] {
            let err = Ac3Header::decode(&with_bsid(bsid)).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Ac3Error>(),
                Some(Ac3Error::UnsupportedBsid(b)) if *b == bsid
            ));
        }
        Ok(())
    }

    #[test]
    fn ac3_frame_sizes() -> Result<()> {
        // 44.1 kHz, 448 kbit/s, odd frmsizecod carries the extra word
        let frame = test_frames::ac3_frame(1, 31, 2, false, 31);
        let header = Ac3Header::decode(&frame)?;
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.frame_size, (448 * 320 / 147 + 1) * 2);
        assert_eq!(header.channels, 2);

        let frame = test_frames::ac3_frame(2, 36, 1, false, 31);
        let header = Ac3Header::decode(&frame)?;
        assert_eq!(header.sample_rate, 32000);
        assert_eq!(header.frame_size, 640 * 3 * 2);
        assert_eq!(header.channels, 1);
        Ok(())
    }

    #[test]
    fn reject_invalid_headers() {
        let mut frame = test_frames::ac3_frame(0, 10, 2, false, 31);

        frame[4] = 0xC0 | 10;
        assert!(Ac3Header::decode(&frame).is_err(), "fscod 3");

        frame[4] = 38;
        assert!(Ac3Header::decode(&frame).is_err(), "frmsizecod 38");

        frame[4] = 10;
        frame[5] = (12 << 3) | (frame[5] & 7);
        assert!(Ac3Header::decode(&frame).is_err(), "bsid 12");

        frame[0] = 0x77;
        assert!(Ac3Header::decode(&frame).is_err(), "sync word");
    }

    #[test]
    fn decode_eac3_with_dependent_chanmap() -> Result<()> {
        let frame = test_frames::eac3_frame(false, 0, 512, 7, true, None);
        let independent = Ac3Header::decode(&frame)?;
        assert_eq!(independent.frame_type, Ac3FrameType::Independent);
        assert_eq!(independent.frame_size, 512);
        assert_eq!(independent.samples, 1536);
        assert_eq!(independent.channels, 6);
        assert_eq!(independent.bit_rate, 128_000);
        assert!(verify_checksums(&frame, &independent));

        let frame = test_frames::eac3_frame(true, 0, 256, 2, false, Some(location::LRS_RRS));
        let dependent = Ac3Header::decode(&frame)?;
        assert_eq!(dependent.frame_type, Ac3FrameType::Dependent);
        assert_eq!(dependent.chanmap, Some(location::LRS_RRS));
        assert_eq!(dependent.channels, 2);

        let mut combined = independent.clone();
        combined.dependent_frames.push(dependent);
        assert_eq!(combined.effective_channels(), 8);
        Ok(())
    }

    #[test]
    fn consecutive_frames() {
        let frame = test_frames::ac3_frame(0, 0, 2, false, 31);
        let mut buffer = Vec::new();
        for _ in 0..5 {
            buffer.extend_from_slice(&frame);
        }
        assert_eq!(find_consecutive_frames(&buffer, 4), Some(0));

        let mut shifted = vec![0x0B, 0x77, 0x00];
        shifted.extend_from_slice(&buffer);
        assert_eq!(find_consecutive_frames(&shifted, 4), Some(3));

        assert_eq!(find_consecutive_frames(&buffer[..frame.len() * 2], 4), None);
    }

    #[test]
    fn dialnorm_removal_keeps_frame_valid() -> Result<()> {
        for mut frame in [
            test_frames::ac3_frame(0, 8, 0, false, 20),
            test_frames::ac3_frame(1, 17, 7, true, 4),
            test_frames::eac3_frame(false, 0, 768, 2, false, None),
        ] {
            let header = Ac3Header::decode(&frame)?;
            assert!(remove_dialog_normalization_gain(&mut frame, &header)?);
            assert!(verify_checksums(&frame, &header));

            let header = Ac3Header::decode(&frame)?;
            assert!(header.dialnorm.iter().all(|d| d.value == 31));
            assert!(!remove_dialog_normalization_gain(&mut frame, &header)?);
        }
        Ok(())
    }
}
