//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, the accumulation buffer, CRC validation, Annex B
//! helpers and error types shared by every parser.

pub mod bitstream_io;
pub mod byte_buffer;
pub mod crc;
pub mod errors;
pub mod rbsp;

#[cfg(test)]
pub mod testing;
