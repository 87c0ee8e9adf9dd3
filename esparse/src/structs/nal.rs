//! Types shared by the AVC and HEVC NAL unit decoders.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use anyhow::{Result, bail};
use log::debug;

use crate::utils::crc::{CRC_PARAMETER_SET_ALG, Crc32};
use crate::utils::errors::NalError;

static CRC_PARAMETER_SET: Crc32 = Crc32::new(&CRC_PARAMETER_SET_ALG);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SliceType {
    P,
    B,
    #[default]
    I,
    Sp,
    Si,
}

impl SliceType {
    /// AVC `slice_type`, values 5 to 9 mean all slices of the picture share the type.
    pub fn from_avc(slice_type: u32) -> Result<Self> {
        check_range("slice_type", slice_type, 9)?;

        Ok(match slice_type % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        })
    }

    pub fn from_hevc(slice_type: u32) -> Result<Self> {
        Ok(match slice_type {
            0 => Self::B,
            1 => Self::P,
            2 => Self::I,
            _ => bail!(NalError::ValueOutOfRange {
                field: "slice_type",
                value: slice_type as i64
            }),
        })
    }

    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    /// Picture type of a picture made of slices of type `self` and `other`.
    pub fn combine(self, other: Self) -> Self {
        let weight = |t: Self| match t {
            Self::I | Self::Si => 0,
            Self::P | Self::Sp => 1,
            Self::B => 2,
        };

        if weight(other) > weight(self) {
            other
        } else {
            self
        }
    }
}

impl Display for SliceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::P => "P",
            Self::B => "B",
            Self::I => "I",
            Self::Sp => "SP",
            Self::Si => "SI",
        })
    }
}

/// Header of one assembled access unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessUnit {
    pub slice_type: SliceType,
    pub poc: i32,
    /// Position in decode order, starting at 0.
    pub decode_index: u64,
    pub nal_unit_types: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSetUpdate {
    New,
    Changed,
    Duplicate,
}

#[derive(Debug, Clone)]
struct StoredParameterSet<T> {
    checksum: u32,
    raw: Vec<u8>,
    value: T,
}

/// Parameter sets keyed by id. Repeated in-band copies are recognised by
/// the CRC-32 of their NAL unit bytes.
#[derive(Debug, Clone)]
pub struct ParameterSetStore<T> {
    kind: &'static str,
    entries: BTreeMap<u32, StoredParameterSet<T>>,
}

impl<T> ParameterSetStore<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: u32, raw: &[u8], value: T) -> ParameterSetUpdate {
        let checksum = CRC_PARAMETER_SET.checksum(raw);

        let update = match self.entries.get(&id) {
            Some(stored) if stored.checksum == checksum && stored.raw == raw => {
                return ParameterSetUpdate::Duplicate;
            }
            Some(_) => ParameterSetUpdate::Changed,
            None => ParameterSetUpdate::New,
        };

        debug!("{} {id}: {update:?}", self.kind);
        self.entries.insert(
            id,
            StoredParameterSet {
                checksum,
                raw: raw.to_vec(),
                value,
            },
        );

        update
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id).map(|stored| &stored.value)
    }

    /// Like [`get`](Self::get) but reports a missing id as [`NalError::MissingParameterSet`].
    pub fn require(&self, id: u32) -> Result<&T> {
        match self.get(id) {
            Some(value) => Ok(value),
            None => bail!(NalError::MissingParameterSet {
                kind: self.kind,
                id
            }),
        }
    }

    pub fn checksum(&self, id: u32) -> Option<u32> {
        self.entries.get(&id).map(|stored| stored.checksum)
    }

    /// Raw NAL units ordered by id.
    pub fn raw(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.values().map(|stored| stored.raw.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks a decoded value against an inclusive upper bound.
pub fn check_range<T>(field: &'static str, value: T, max: T) -> Result<T>
where
    T: PartialOrd + Copy + Into<i64>,
{
    if value > max {
        bail!(NalError::ValueOutOfRange {
            field,
            value: value.into()
        });
    }

    Ok(value)
}

/// Sample aspect ratios for `aspect_ratio_idc` 1 to 16, shared by AVC and HEVC.
pub const SAMPLE_ASPECT_RATIOS: [(u16, u16); 16] = [
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

pub const EXTENDED_SAR: u8 = 255;

pub fn sample_aspect_ratio(idc: u8) -> Option<(u16, u16)> {
    SAMPLE_ASPECT_RATIOS.get((idc as usize).checked_sub(1)?).copied()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VuiTiming {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
}

/// Number of bits needed to code values in `0..n`, `Ceil(Log2(n))`.
pub fn ceil_log2(n: u32) -> u32 {
    if n <= 1 { 0 } else { 32 - (n - 1).leading_zeros() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_set_dedup() {
        let mut store = ParameterSetStore::new("SPS");

        assert_eq!(store.insert(0, &[0x67, 0x64, 0x00], 1), ParameterSetUpdate::New);
        assert_eq!(
            store.insert(0, &[0x67, 0x64, 0x00], 1),
            ParameterSetUpdate::Duplicate
        );
        assert_eq!(store.insert(0, &[0x67, 0x4D, 0x00], 2), ParameterSetUpdate::Changed);
        assert_eq!(store.insert(3, &[0x67, 0x4D, 0x00], 3), ParameterSetUpdate::New);

        assert_eq!(store.get(0), Some(&2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.raw().count(), 2);
        assert!(store.require(1).is_err());
    }

    #[test]
    fn slice_types() -> Result<()> {
        assert_eq!(SliceType::from_avc(7)?, SliceType::I);
        assert_eq!(SliceType::from_avc(5)?, SliceType::P);
        assert_eq!(SliceType::from_avc(9)?, SliceType::Si);
        assert!(SliceType::from_avc(10).is_err());
        assert_eq!(SliceType::from_hevc(0)?, SliceType::B);
        assert!(SliceType::from_hevc(3).is_err());
        assert_eq!(SliceType::I.combine(SliceType::B), SliceType::B);
        assert_eq!(SliceType::P.combine(SliceType::I), SliceType::P);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(sample_aspect_ratio(14), Some((4, 3)));
        assert_eq!(sample_aspect_ratio(0), None);
        Ok(())
    }
}
