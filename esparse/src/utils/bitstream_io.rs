//! Bit-level reading for header decoding.
//!
//! Wraps a big-endian [`bitstream_io::BitReader`] with bounds-checked reads
//! and the variable length codes used by the supported formats: Exp-Golomb
//! (AVC, HEVC), LEB128 / UVLC / `su(n)` / `ns(n)` (AV1) and a little-endian
//! 32-bit helper.

use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, UnsignedInteger};

/// Longest Exp-Golomb prefix accepted before the code is treated as corrupt.
pub const MAX_EXP_GOLOMB_LEADING_ZEROS: u32 = 32;

/// AV1 limits LEB128 values to eight bytes.
pub const MAX_LEB128_BYTES: u32 = 8;

/// Longest UVLC prefix accepted before the code is treated as corrupt.
pub const MAX_UVLC_LEADING_ZEROS: u32 = 32;

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

fn out_of_bounds(what: &str, n: u32, position: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{what}({n}): out of bounds bits at {position}"),
    )
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger + Default>(&mut self, n: u32) -> io::Result<I> {
        if n == 0 {
            return Ok(I::default());
        }

        if n <= 32 {
            match self.bs.read_unsigned_var(n) {
                Ok(val) => Ok(val),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(out_of_bounds(
                    "get_n",
                    n,
                    self.bs.position_in_bits().unwrap_or(0),
                )),
                Err(e) => Err(e),
            }
        } else {
            let avail = self.available()?;
            if n as u64 > avail {
                Err(out_of_bounds("get_n", n, self.position()?))
            } else {
                self.bs.read_unsigned_var(n)
            }
        }
    }

    /// Reads a flag and returns it as `0` or `1`.
    #[inline(always)]
    pub fn get_flag_u8(&mut self) -> io::Result<u8> {
        self.get().map(u8::from)
    }

    /// Unsigned Exp-Golomb code, `ue(v)`.
    pub fn get_ue(&mut self) -> io::Result<u32> {
        let mut leading_zeros = 0;
        while !self.get()? {
            leading_zeros += 1;
            if leading_zeros > MAX_EXP_GOLOMB_LEADING_ZEROS {
                return Err(invalid(format!(
                    "ue(v): more than {MAX_EXP_GOLOMB_LEADING_ZEROS} leading zero bits at {}",
                    self.position()?
                )));
            }
        }

        let suffix: u64 = self.get_n(leading_zeros)?;
        let value = (1u64 << leading_zeros) - 1 + suffix;

        u32::try_from(value).map_err(|_| invalid(format!("ue(v): value {value} exceeds 32 bits")))
    }

    /// Signed Exp-Golomb code, `se(v)`.
    pub fn get_se(&mut self) -> io::Result<i32> {
        let code = self.get_ue()? as i64;
        let value = if code & 1 == 1 {
            (code + 1) >> 1
        } else {
            -(code >> 1)
        };

        Ok(value as i32)
    }

    /// AV1 `leb128()`.
    pub fn get_leb128(&mut self) -> io::Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_LEB128_BYTES {
            let byte: u8 = self.get_n(8)?;
            value |= ((byte & 0x7F) as u64) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }

        Err(invalid(format!(
            "leb128(): no terminating byte within {MAX_LEB128_BYTES} bytes"
        )))
    }

    /// AV1 `uvlc()`.
    pub fn get_uvlc(&mut self) -> io::Result<u32> {
        let mut leading_zeros = 0;
        while !self.get()? {
            leading_zeros += 1;
            if leading_zeros >= MAX_UVLC_LEADING_ZEROS {
                return Err(invalid(format!(
                    "uvlc(): {leading_zeros} leading zero bits at {}",
                    self.position()?
                )));
            }
        }

        let suffix: u32 = self.get_n(leading_zeros)?;
        Ok(suffix + ((1u64 << leading_zeros) - 1) as u32)
    }

    /// AV1 `su(n)`.
    pub fn get_su(&mut self, n: u32) -> io::Result<i32> {
        let value: u32 = self.get_n(n)?;
        let sign_mask = 1i64 << (n - 1);
        let value = value as i64;

        Ok(if value & sign_mask != 0 {
            value - 2 * sign_mask
        } else {
            value
        } as i32)
    }

    /// AV1 `ns(n)`, a non-symmetric unsigned value in `0..n`.
    pub fn get_ns(&mut self, n: u32) -> io::Result<u32> {
        if n <= 1 {
            return Ok(0);
        }

        let w = 32 - n.leading_zeros();
        let m = (1u32 << w) - n;
        let v: u32 = self.get_n(w - 1)?;
        if v < m {
            return Ok(v);
        }

        let extra_bit = self.get_flag_u8()? as u32;
        Ok((v << 1) - m + extra_bit)
    }

    /// Reads four bytes as a little-endian 32-bit value.
    pub fn get_u32_le(&mut self) -> io::Result<u32> {
        if !self.bs.byte_aligned() {
            let b0: u8 = self.get_n(8)?;
            let b1: u8 = self.get_n(8)?;
            let b2: u8 = self.get_n(8)?;
            let b3: u8 = self.get_n(8)?;
            return Ok(u32::from_le_bytes([b0, b1, b2, b3]));
        }

        if self.available()? < 32 {
            return Err(out_of_bounds("get_u32_le", 32, self.position()?));
        }

        let mut buf = [0u8; 4];
        self.bs.read_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    #[inline(always)]
    pub fn byte_align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }

        let avail = self.available()?;
        if n as u64 > avail {
            return Err(out_of_bounds("skip_n", n, self.position()?));
        }

        self.bs.skip(n)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}
