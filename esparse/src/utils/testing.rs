//! Bit writer used by the unit tests to synthesise headers.

use bitstream_io::{BigEndian, BitWrite, BitWriter};

pub struct TestBitWriter {
    bw: BitWriter<Vec<u8>, BigEndian>,
}

impl Default for TestBitWriter {
    fn default() -> Self {
        Self {
            bw: BitWriter::endian(Vec::new(), BigEndian),
        }
    }
}

impl TestBitWriter {
    pub fn bits(&mut self, n: u32, value: u64) -> &mut Self {
        if n > 0 {
            self.bw
                .write_unsigned_var::<u64>(n, value)
                .expect("value does not fit the bit count");
        }
        self
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.bw.write_bit(value).expect("write to Vec");
        self
    }

    pub fn ue(&mut self, value: u32) -> &mut Self {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros();
        self.bits(len - 1, 0).bits(len, code)
    }

    pub fn se(&mut self, value: i32) -> &mut Self {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            (-value) as u32 * 2
        };
        self.ue(code)
    }

    pub fn uvlc(&mut self, value: u32) -> &mut Self {
        self.ue(value)
    }

    pub fn leb128(&mut self, mut value: u64) -> &mut Self {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                return self.bits(8, byte as u64);
            }
            self.bits(8, (byte | 0x80) as u64);
        }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.bits(8, byte as u64);
        }
        self
    }

    /// Writes a stop bit followed by zero bits up to the next byte boundary.
    pub fn trailing_bits(&mut self) -> &mut Self {
        self.flag(true);
        self.byte_align()
    }

    pub fn byte_align(&mut self) -> &mut Self {
        self.bw.byte_align().expect("write to Vec");
        self
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bw.byte_align().expect("write to Vec");
        self.bw.into_writer()
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(self).into_bytes()
    }
}

/// Inserts emulation prevention bytes into a NAL unit.
pub fn escape_nal(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len() + nal.len() / 2);
    let mut zeros = 0;

    for &byte in nal {
        if zeros >= 2 && byte <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }

    out
}

/// Annex B byte stream of escaped NAL units with four byte start codes.
pub fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
    nals.iter()
        .flat_map(|nal| [&[0u8, 0, 0, 1][..], &escape_nal(nal)].concat())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaped_nal_units_round_trip() {
        let nal = [0x67, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05];
        let escaped = escape_nal(&nal);
        assert_eq!(
            escaped,
            vec![0x67, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x05]
        );
        assert_eq!(crate::utils::rbsp::remove_emulation_prevention(&escaped), nal);
    }
}
