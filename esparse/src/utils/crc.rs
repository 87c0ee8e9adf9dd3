//! Table driven CRC helpers.
//!
//! Three flavours are needed by the parsers:
//!
//! - CRC-16 in the augmented form used by the MLP major sync check.
//! - Plain MSB-first CRC-16 (poly 0x8005, init 0) protecting AC-3 and
//!   E-AC-3 frames, together with the GF(2) helpers needed to compute the
//!   AC-3 `crc1` word backwards.
//! - CRC-32 (poly 0x04C11DB7) used to fingerprint parameter sets.

/// CRC algorithm specification with polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-16 algorithm for major sync information validation.
pub const CRC_MAJOR_SYNC_INFO_ALG: Algorithm<u16> = Algorithm {
    poly: 0x2d,
    init: 0x00,
};

/// CRC-16 algorithm protecting AC-3 and E-AC-3 frames.
pub const CRC_AC3_ALG: Algorithm<u16> = Algorithm {
    poly: 0x8005,
    init: 0x0000,
};

/// CRC-32 algorithm used for parameter set fingerprints.
pub const CRC_PARAMETER_SET_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04C1_1DB7,
    init: 0xFFFF_FFFF,
};

/// AC-3 generator polynomial including the x^16 term.
pub const AC3_CRC_POLY_FULL: u32 = 0x1_8005;

/// `x^-1` modulo [`AC3_CRC_POLY_FULL`].
pub const AC3_CRC_POLY_INVERSE: u32 = AC3_CRC_POLY_FULL >> 1;

/// Computes CRC-16 checksum using specified polynomial.
#[inline(always)]
pub const fn crc16(poly: u16, mut value: u16, len: usize) -> u16 {
    value <<= 8;

    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 15) & 1) * poly);
        i += 1;
    }

    value
}

/// Computes CRC-32 checksum using specified polynomial.
#[inline(always)]
pub const fn crc32(poly: u32, mut value: u32, len: usize) -> u32 {
    value <<= 24;

    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 31) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc16(poly, i as u16, 8);
        i += 1;
    }

    table
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, i as u32, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc16 {
    pub poly: u16,
    pub init: u16,
    table: [u16; 256],
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

impl Crc16 {
    pub const fn new(algorithm: &Algorithm<u16>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc16_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u16) -> u16 {
        self.table[(index & 0xFF) as usize]
    }

    /// Augmented update: the data byte enters at the bottom of the register.
    #[inline(always)]
    pub const fn update(&self, mut crc: u16, bytes: &[u8]) -> u16 {
        let mut i = 0;

        while i < bytes.len() {
            crc = self.table_entry(crc >> 8) ^ (crc << 8) ^ bytes[i] as u16;
            i += 1;
        }

        crc
    }

    /// Direct MSB-first update: the data byte is folded into the top of the
    /// register before the table lookup.
    #[inline(always)]
    pub const fn update_direct(&self, mut crc: u16, bytes: &[u8]) -> u16 {
        let mut i = 0;

        while i < bytes.len() {
            crc = self.table_entry((crc >> 8) ^ bytes[i] as u16) ^ (crc << 8);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u16 {
        self.update_direct(self.init, bytes)
    }
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = self.table[(((crc >> 24) ^ bytes[i] as u32) & 0xFF) as usize] ^ (crc << 8);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        !self.update(self.init, bytes)
    }
}

/// Multiplies two polynomials modulo `poly` over GF(2).
pub const fn mul_poly(mut a: u32, mut b: u32, poly: u32) -> u32 {
    let mut c = 0;
    while a != 0 {
        if a & 1 != 0 {
            c ^= b;
        }
        a >>= 1;
        b <<= 1;
        if b & (1 << 16) != 0 {
            b ^= poly;
        }
    }

    c
}

/// Raises `a` to the power `n` modulo `poly` over GF(2).
pub const fn pow_poly(mut a: u32, mut n: u32, poly: u32) -> u32 {
    let mut r = 1;
    while n != 0 {
        if n & 1 != 0 {
            r = mul_poly(r, a, poly);
        }
        a = mul_poly(a, a, poly);
        n >>= 1;
    }

    r
}
