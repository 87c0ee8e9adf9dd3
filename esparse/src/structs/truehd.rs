//! TrueHD / MLP access unit headers.
//!
//! ## Sync Patterns
//!
//! **Major Sync** (0xF8726FBA / 0xF8726FBB at byte 4): stream configuration.
//! **Minor Sync**: 4-byte access unit header with check nibble, length and
//! input timing, followed by the substream directory.
//!
//! ## Format Types
//!
//! - **FBA Format** (0xF8726FBA): Dolby TrueHD
//! - **FBB Format** (0xF8726FBB): Meridian Lossless Packing
//!
//! Access units carry 40 samples per 48 kHz (or 44.1 kHz) multiple.

use anyhow::{Result, bail};
use log::trace;

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::{CRC_MAJOR_SYNC_INFO_ALG, Crc16};
use crate::utils::errors::TrueHdError;

/// Major sync pattern for FBA (Dolby) format streams.
pub const MAJOR_SYNC_FBA: u32 = 0xF8_72_6F_BA;

/// Major sync pattern for FBB (Meridian) format streams.
pub const MAJOR_SYNC_FBB: u32 = 0xF8_72_6F_BB;

pub const MAJOR_SYNC_SIGNATURE: u16 = 0xB752;

/// Base sampling rate for CD-family rates (44.1kHz, 88.2kHz, 176.4kHz).
pub const BASE_SAMPLING_RATE_CD: u32 = 44100;

/// Base sampling rate for DVD-family rates (48kHz, 96kHz, 192kHz).
pub const BASE_SAMPLING_RATE_DVD: u32 = 48000;

/// Base number of samples per access unit at 48kHz.
pub const BASE_SAMPLES_PER_AU: u32 = 40;

/// Bytes up to and including the substream count of a major sync.
pub const MAJOR_SYNC_MIN_LEN: usize = 32;

/// Channels per bit of the TrueHD 6ch/8ch presentation channel assignment.
pub const TRUEHD_CHANNEL_COUNT: [u8; 13] = [2, 1, 1, 2, 2, 2, 2, 1, 1, 2, 2, 1, 1];

/// Channels per MLP channel arrangement.
pub const MLP_CHANNELS: [u8; 32] = [
    1, 2, 3, 4, 3, 4, 5, 3, 4, 5, 4, 5, 6, 4, 5, 4, 5, 6, 5, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

static CRC_MAJOR_SYNC: Crc16 = Crc16::new(&CRC_MAJOR_SYNC_INFO_ALG);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrueHdFormat {
    #[default]
    TrueHd,
    Mlp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrueHdHeader {
    pub format: TrueHdFormat,
    /// This access unit carries a major sync. Minor access units inherit
    /// every stream parameter from the last major sync.
    pub major_sync: bool,
    pub size: usize,
    pub input_timing: u16,
    pub sample_rate: u32,
    pub samples_per_frame: u32,
    pub channels: u8,
    pub channel_assignment: u16,
    /// Quantisation word length, MLP only.
    pub bit_depth: Option<u8>,
    pub variable_rate: bool,
    pub peak_data_rate: u16,
    pub substreams: u8,
    pub extended_substream_info: u8,
    pub substream_info: u8,
    /// A 16-channel presentation (Dolby Atmos) is present.
    pub atmos: bool,
}

/// Returns the major sync word at byte 4 of `data`, if any.
pub fn major_sync_word(data: &[u8]) -> Option<u32> {
    let word = u32::from_be_bytes(data.get(4..8)?.try_into().ok()?);
    matches!(word, MAJOR_SYNC_FBA | MAJOR_SYNC_FBB).then_some(word)
}

/// Access unit length in bytes from the first two header bytes.
pub fn access_unit_length(data: &[u8]) -> Option<usize> {
    let word = u16::from_be_bytes([*data.first()?, *data.get(1)?]);
    Some(((word & 0xFFF) as usize) << 1)
}

/// Length of `major_sync_info` starting at `format_sync`, without the CRC.
pub fn major_sync_info_len(data: &[u8]) -> Option<usize> {
    let len = if data.get(29)? & 0x01 == 0 {
        26
    } else {
        28 + ((data.get(30)? >> 3) & 0x1E) as usize
    };

    Some(len)
}

pub fn sampling_frequency(value: u8) -> Result<u32> {
    match value {
        0..=2 => Ok(BASE_SAMPLING_RATE_DVD << value),
        8..=10 => Ok(BASE_SAMPLING_RATE_CD << (value - 8)),
        _ => bail!(TrueHdError::InvalidSampleRate(value)),
    }
}

pub fn truehd_channels(channel_assignment: u16) -> u8 {
    TRUEHD_CHANNEL_COUNT
        .iter()
        .enumerate()
        .filter(|&(bit, _)| channel_assignment & (1 << bit) != 0)
        .map(|(_, &count)| count)
        .sum()
}

/// Runs the nibble parity check over the access unit header and the
/// substream directory. Returns `Ok(None)` if `data` is too short.
pub fn check_parity(
    data: &[u8],
    substreams: u8,
    major_sync_len: Option<usize>,
) -> Result<Option<usize>> {
    let Some(header) = data.get(..4) else {
        return Ok(None);
    };

    let mut parity = header.iter().fold(0u8, |p, b| p ^ b);
    let mut offset = 4 + major_sync_len.map_or(0, |len| len + 2);

    for _ in 0..substreams {
        let Some(&first) = data.get(offset) else {
            return Ok(None);
        };
        let len = if first >> 7 != 0 { 4 } else { 2 };
        let Some(entry) = data.get(offset..offset + len) else {
            return Ok(None);
        };

        parity = entry.iter().fold(parity, |p, b| p ^ b);
        offset += len;
    }

    let check = ((parity >> 4) ^ parity) & 0xF;
    if check != 0xF {
        bail!(TrueHdError::ParityCheckFailed(check));
    }

    Ok(Some(offset))
}

impl TrueHdHeader {
    /// Decodes an access unit that starts with a major sync.
    pub fn decode_major_sync(data: &[u8]) -> Result<Self> {
        let Some(ms_len) = major_sync_info_len(data) else {
            bail!(TrueHdError::HeaderTooShort(data.len()));
        };
        if data.len() < 4 + ms_len + 2 {
            bail!(TrueHdError::HeaderTooShort(data.len()));
        }

        let calculated = CRC_MAJOR_SYNC.update(CRC_MAJOR_SYNC.init, &data[4..4 + ms_len]);
        let read = u16::from_be_bytes([data[4 + ms_len], data[5 + ms_len]]);
        if calculated != read {
            bail!(TrueHdError::MajorSyncCrcMismatch { calculated, read });
        }

        let mut reader = BsIoSliceReader::from_slice(data);
        reader.skip_n(4)?;

        let size = (reader.get_n::<u16>(12)? as usize) << 1;
        let mut header = Self {
            major_sync: true,
            size,
            input_timing: reader.get_n(16)?,
            ..Default::default()
        };

        let format_sync: u32 = reader.get_n(32)?;
        match format_sync {
            MAJOR_SYNC_FBA => header.read_fba_format_info(&mut reader)?,
            MAJOR_SYNC_FBB => header.read_fbb_format_info(&mut reader)?,
            _ => bail!(TrueHdError::InvalidFormatSync(format_sync)),
        }

        let signature: u16 = reader.get_n(16)?;
        if signature != MAJOR_SYNC_SIGNATURE {
            bail!(TrueHdError::InvalidSignature(signature));
        }

        reader.skip_n(32)?; // flags, reserved
        header.variable_rate = reader.get()?;
        header.peak_data_rate = reader.get_n(15)?;
        header.substreams = reader.get_n(4)?;
        header.extended_substream_info = reader.get_n(4)?;
        header.substream_info = reader.get_n(8)?;
        header.atmos = header.format == TrueHdFormat::TrueHd && header.substream_info & 0x80 != 0;

        if header.size < 4 + ms_len + 2 {
            bail!(TrueHdError::InvalidAccessUnitLength(header.size));
        }

        trace!(
            "{:?} major sync: {} Hz {} channels {} substreams, atmos {}, {} bytes",
            header.format,
            header.sample_rate,
            header.channels,
            header.substreams,
            header.atmos,
            header.size
        );

        Ok(header)
    }

    fn read_fba_format_info(&mut self, reader: &mut BsIoSliceReader) -> Result<()> {
        self.format = TrueHdFormat::TrueHd;
        self.set_sampling_frequency(reader.get_n(4)?)?;

        reader.skip_n(8)?; // multichannel types, reserved, 2ch/6ch modifiers
        let sixch_assignment: u16 = reader.get_n(5)?;
        reader.skip_n(2)?;
        let eightch_assignment: u16 = reader.get_n(13)?;

        self.channel_assignment = if eightch_assignment != 0 {
            eightch_assignment
        } else {
            sixch_assignment
        };
        self.channels = truehd_channels(self.channel_assignment);

        Ok(())
    }

    fn read_fbb_format_info(&mut self, reader: &mut BsIoSliceReader) -> Result<()> {
        self.format = TrueHdFormat::Mlp;

        let quantization_word_length: u8 = reader.get_n(4)?;
        reader.skip_n(4)?;
        self.set_sampling_frequency(reader.get_n(4)?)?;
        reader.skip_n(15)?;
        self.channel_assignment = reader.get_n(5)?;

        self.bit_depth = match quantization_word_length {
            0..=2 => Some(16 + (quantization_word_length << 2)),
            _ => None,
        };
        self.channels = MLP_CHANNELS[self.channel_assignment as usize];

        Ok(())
    }

    fn set_sampling_frequency(&mut self, value: u8) -> Result<()> {
        self.sample_rate = sampling_frequency(value)?;
        self.samples_per_frame = BASE_SAMPLES_PER_AU << (value & 7);

        Ok(())
    }

    /// A minor access unit with the stream parameters of `major`.
    pub fn minor(major: &TrueHdHeader, data: &[u8]) -> Option<Self> {
        Some(Self {
            major_sync: false,
            size: access_unit_length(data)?,
            input_timing: u16::from_be_bytes([*data.get(2)?, *data.get(3)?]),
            ..major.clone()
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_major_sync() -> Result<()> {
        use super::test_frames::*;

        let au = &TRUEHD_STREAM[MAJOR_AU];
        let header = TrueHdHeader::decode_major_sync(au)?;

        assert_eq!(header.format, TrueHdFormat::TrueHd);
        assert_eq!(header.size, 84);
        assert_eq!(header.sample_rate, 48000);
        assert_eq!(header.samples_per_frame, 40);
        assert_eq!(header.channels, 2);
        assert_eq!(header.substreams, 1);
        assert!(header.variable_rate);
        assert!(!header.atmos);
        assert_eq!(check_parity(au, 1, major_sync_info_len(au))?, Some(36));

        let minor_au = &TRUEHD_STREAM[MINOR_AU];
        assert_eq!(check_parity(minor_au, 1, None)?, Some(6));
        let minor = TrueHdHeader::minor(&header, minor_au).expect("minor header");
        assert_eq!(minor.size, 20);
        assert!(!minor.major_sync);
        assert_eq!(minor.channels, 2);
        Ok(())
    }

    #[test]
    fn corrupted_major_sync_is_rejected() {
        use super::test_frames::*;

        let mut au = TRUEHD_STREAM[MAJOR_AU].to_vec();
        au[21] ^= 0x01;
        let err = TrueHdHeader::decode_major_sync(&au).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrueHdError>(),
            Some(TrueHdError::MajorSyncCrcMismatch { .. })
        ));

        let mut au = TRUEHD_STREAM[MINOR_AU].to_vec();
        au[4] ^= 0x10;
        assert!(check_parity(&au, 1, None).is_err());
    }

    #[test]
    fn synthetic_mlp_and_atmos() -> Result<()> {
        use super::test_frames::*;

        // 24 bit, 96 kHz, arrangement 12 (6 channels)
        let mlp = major_sync_frame(MAJOR_SYNC_FBB, 0x2010_000C, 0x00, 64);
        let header = TrueHdHeader::decode_major_sync(&mlp)?;
        assert_eq!(header.format, TrueHdFormat::Mlp);
        assert_eq!(header.sample_rate, 96000);
        assert_eq!(header.samples_per_frame, 80);
        assert_eq!(header.bit_depth, Some(24));
        assert_eq!(header.channels, 6);
        assert!(check_parity(&mlp, 1, major_sync_info_len(&mlp))?.is_some());

        // 8ch assignment L/R, C, LFE, Ls/Rs, Lrs/Rrs
        let thd = major_sync_frame(MAJOR_SYNC_FBA, 0x0000_004F, 0x80, 64);
        let header = TrueHdHeader::decode_major_sync(&thd)?;
        assert_eq!(header.channels, 8);
        assert!(header.atmos);

        let minor = minor_frame(24);
        assert!(check_parity(&minor, 1, None)?.is_some());
        Ok(())
    }

    #[test]
    fn channel_counts() {
        assert_eq!(truehd_channels(0b1), 2);
        assert_eq!(truehd_channels(0b1111), 6);
        assert_eq!(truehd_channels(0b1_0000_0000_0000), 1);
        assert_eq!(sampling_frequency(9).ok(), Some(88200));
        assert!(sampling_frequency(0xF).is_err());
    }
}
