#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Every parser shares one shape: bytes are appended to an accumulation
//! buffer, a sync scanner cuts candidate units out of it, a header decoder
//! validates them and complete frames are queued for the caller.
//!
//! ### Resynchronisation
//!
//! A unit that fails validation costs exactly one byte of progress. Skipped
//! bytes are reported as garbage, see [`process::EsParser::garbage_size`].
//!
//! ### Supported Formats
//!
//! | Format | Parser | Sync |
//! |--------|--------|------|
//! | AC-3 / E-AC-3 | [`process::ac3::Ac3Parser`] | `0x0B77` |
//! | TrueHD / MLP | [`process::truehd::TrueHdParser`] | major sync `0xF8726FBA` / `0xF8726FBB` |
//! | AV1 | [`process::av1::Av1Parser`] | OBU headers |
//! | AVC | [`process::avc::AvcParser`] | Annex B start codes |
//! | HEVC | [`process::hevc::HevcParser`] | Annex B start codes |
//! | HEVC + Dolby Vision EL | [`process::dovi::DoviParser`] | Annex B start codes |
//! | VC-1 | [`process::vc1::Vc1Parser`] | SMPTE 421M start codes |
//!
//! ### Timestamps
//!
//! Audio parsers interpolate from caller provided timestamps with
//! [`process::timestamp::TimestampCalculator`]. Video parsers derive the
//! presentation order from the bitstream itself.

/// Incremental parsers and the infrastructure they share.
///
/// 1. **Scanning** ([`process::scanner`]): Sync search and unit cutting.
/// 2. **Parsing** ([`process::EsParser`]): Per-codec frame assembly.
/// 3. **Timing** ([`process::timestamp`]): Gap-free timelines.
pub mod process;

/// Bitstream structures.
///
/// - **AC-3** ([`structs::ac3`]): BSI and frame size tables
/// - **TrueHD** ([`structs::truehd`]): Major sync and access unit headers
/// - **AV1** ([`structs::av1`]): OBU, sequence and frame headers
/// - **NAL** ([`structs::nal`], [`structs::avc`], [`structs::hevc`]): Parameter sets and slice headers
/// - **VC-1** ([`structs::vc1`]): Sequence, entry point and picture headers
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **Buffering** ([`utils::byte_buffer`]): Append-only accumulation buffer
/// - **CRC Validation** ([`utils::crc`]): Error detection
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
