use anyhow::Result;
use log::{debug, trace};

use crate::process::nal::{NalCodec, NalKind, NalParser, SliceInfo};
use crate::structs::hevc::{
    NAL_AUD, NAL_EOB, NAL_EOS, NAL_FD, NAL_PPS, NAL_PREFIX_SEI, NAL_SPS, NAL_SUFFIX_SEI,
    NAL_VPS, NalHeader, Pps, SliceHeader, Sps, Vps,
};
use crate::structs::nal::ParameterSetStore;
use crate::structs::timestamp::Timestamp;

/// HEVC Annex B elementary stream parser.
pub type HevcParser = NalParser<HevcCodec>;

#[derive(Debug)]
pub struct HevcCodec {
    vpss: ParameterSetStore<Vps>,
    spss: ParameterSetStore<Sps>,
    ppss: ParameterSetStore<Pps>,
    active_sps: Option<u32>,
    prev_slice: Option<SliceHeader>,
    /// Picture order count of `prevTid0Pic`.
    prev_tid0_poc: i32,
    current_poc: i32,
    /// The next IRAP picture gets `NoRaslOutputFlag` set.
    first_picture: bool,
}

impl Default for HevcCodec {
    fn default() -> Self {
        Self {
            vpss: ParameterSetStore::new("VPS"),
            spss: ParameterSetStore::new("SPS"),
            ppss: ParameterSetStore::new("PPS"),
            active_sps: None,
            prev_slice: None,
            prev_tid0_poc: 0,
            current_poc: 0,
            first_picture: true,
        }
    }
}

impl HevcCodec {
    pub fn vps(&self, id: u32) -> Option<&Vps> {
        self.vpss.get(id)
    }

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

    fn handle_slice(&mut self, nal: NalHeader, rbsp: &[u8]) -> Result<NalKind> {
        let slice = SliceHeader::decode(rbsp, &self.spss, &self.ppss, self.prev_slice.as_ref())?;
        let sps_id = self.ppss.require(slice.pps_id)?.sps_id;
        let sps = self.spss.require(sps_id)?;
        self.active_sps = Some(sps_id);

        if !slice.first_slice_segment_in_pic {
            let info = SliceInfo {
                slice_type: slice.slice_type,
                poc: self.current_poc,
                ..Default::default()
            };
            self.prev_slice = Some(slice);
            return Ok(NalKind::Slice(info));
        }

        let irap = nal.is_irap();
        let no_rasl_output = irap && (nal.is_idr() || nal.is_bla() || self.first_picture);

        // H.265 8.3.1
        let max_lsb = 1i32 << sps.log2_max_pic_order_cnt_lsb;
        let lsb = slice.pic_order_cnt_lsb as i32;
        let msb = if no_rasl_output {
            0
        } else {
            let prev_lsb = self.prev_tid0_poc & (max_lsb - 1);
            let prev_msb = self.prev_tid0_poc - prev_lsb;

            if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
                prev_msb + max_lsb
            } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
                prev_msb - max_lsb
            } else {
                prev_msb
            }
        };
        let poc = msb + lsb;

        if nal.temporal_id == 0
            && !nal.is_rasl()
            && !nal.is_radl()
            && !nal.is_sub_layer_non_reference()
        {
            self.prev_tid0_poc = poc;
        }

        trace!(
            "HEVC picture type {} POC {poc}{}",
            nal.nal_unit_type,
            if no_rasl_output { " (NoRaslOutputFlag)" } else { "" }
        );

        self.first_picture = false;
        self.current_poc = poc;

        let info = SliceInfo {
            first_slice: true,
            second_field: false,
            slice_type: slice.slice_type,
            poc,
            keyframe: irap,
            poc_reset: no_rasl_output,
            incomplete: false,
        };
        self.prev_slice = Some(slice);

        Ok(NalKind::Slice(info))
    }
}

impl NalCodec for HevcCodec {
    const NAME: &'static str = "HEVC";

    fn nal_unit_type(nal: &[u8]) -> u8 {
        nal.first().map_or(0, |byte| (byte >> 1) & 0x3F)
    }

    fn is_vcl(nal: &[u8]) -> bool {
        Self::nal_unit_type(nal) < NAL_VPS
    }

    fn handle_nal(&mut self, nal: &[u8], rbsp: &[u8]) -> Result<NalKind> {
        let header = NalHeader::decode(rbsp)?;

        // Units of other layers travel with the base layer access unit
        if header.nuh_layer_id > 0 {
            return Ok(NalKind::Suffix);
        }

        Ok(match header.nal_unit_type {
            0..=9 | 16..=21 => self.handle_slice(header, rbsp)?,
            NAL_VPS => {
                let vps = Vps::decode(rbsp)?;
                self.vpss.insert(vps.id as u32, nal, vps);
                NalKind::ParameterSet
            }
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
            NAL_AUD => NalKind::Delimiter,
            NAL_EOS | NAL_EOB => {
                debug!("HEVC end of sequence");
                self.first_picture = true;
                NalKind::Suffix
            }
            NAL_FD => NalKind::Discard,
            NAL_PREFIX_SEI | 41..=44 | 48..=55 => NalKind::Prefix,
            NAL_SUFFIX_SEI => NalKind::Suffix,
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
        self.vpss
            .raw()
            .chain(self.spss.raw())
            .chain(self.ppss.raw())
            .map(<[u8]>::to_vec)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EsParser;
    use crate::structs::hevc::test_nals::*;
    use crate::structs::hevc::{NAL_CRA, NAL_IDR_W_RADL, NAL_RASL_N, NAL_TRAIL_N, NAL_TRAIL_R};
    use crate::structs::nal::SliceType;
    use crate::utils::testing::annex_b;

    #[test]
    fn picture_order_and_random_access() -> Result<()> {
        let data = annex_b(&[
            vps(),
            sps(),
            pps(),
            slice(NAL_IDR_W_RADL, 0, 2, 0),
            vec![0x02, 0x09, 0xAA],
            slice(NAL_TRAIL_R, 0, 1, 4),
            slice(NAL_TRAIL_N, 0, 0, 2),
            slice(NAL_CRA, 0, 2, 8),
            slice(NAL_RASL_N, 0, 0, 6),
            eos(),
            slice(NAL_CRA, 0, 2, 0),
        ]);

        let mut parser = HevcParser::default();
        for chunk in data.chunks(5) {
            parser.add_bytes(chunk)?;
        }
        parser.flush()?;
        let frames: Vec<_> = parser.frames().collect();

        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].header.nal_unit_types, vec![32, 33, 34, 19, 1]);
        assert_eq!(frames[4].header.nal_unit_types, vec![8, 36]);

        let pocs: Vec<i32> = frames.iter().map(|f| f.header.poc).collect();
        assert_eq!(pocs, vec![0, 4, 2, 8, 6, 0]);

        let keyframes: Vec<bool> = frames.iter().map(|f| f.keyframe).collect();
        assert_eq!(keyframes, vec![true, false, false, true, false, true]);
        assert_eq!(frames[2].header.slice_type, SliceType::B);

        let pts: Vec<i64> = frames
            .iter()
            .map(|f| f.timestamp.map_or(-1, |t| t.ns() / 1_000_000))
            .collect();
        assert_eq!(pts, vec![0, 80, 40, 160, 120, 200]);

        let codec = parser.codec();
        assert_eq!(codec.active_sps().map(|sps| (sps.width(), sps.height())), Some((1920, 1080)));
        assert_eq!(codec.parameter_sets().len(), 3);
        assert!(codec.vps(0).is_some());
        Ok(())
    }

    #[test]
    fn poc_msb_wraps() -> Result<()> {
        // POC lsb is 8 bits wide
        let mut nals = vec![vps(), sps(), pps(), slice(NAL_IDR_W_RADL, 0, 2, 0)];
        for lsb in [100, 200, 44, 144] {
            nals.push(slice(NAL_TRAIL_R, 0, 1, lsb));
        }

        let mut parser = HevcParser::default();
        parser.add_bytes(&annex_b(&nals))?;
        parser.flush()?;

        let pocs: Vec<i32> = parser.frames().map(|f| f.header.poc).collect();
        assert_eq!(pocs, vec![0, 100, 200, 300, 400]);
        Ok(())
    }

    #[test]
    fn parameter_sets_only_yield_no_frames() -> Result<()> {
        let mut parser = HevcParser::default();
        parser.add_bytes(&annex_b(&[vps(), sps(), pps()]))?;
        parser.flush()?;

        assert_eq!(parser.frame_available(), 0);
        assert_eq!(parser.frame_duration(), Timestamp::from_ms(40));
        Ok(())
    }
}
