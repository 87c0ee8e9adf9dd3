//! Data structures representing bitstream components.
//!
//! Header layouts decoded bit-exactly from the codec specifications, plus
//! the timestamp and timecode types shared by the parsers.

pub mod ac3;
pub mod av1;
pub mod avc;
pub mod hevc;
pub mod nal;
pub mod timecode;
pub mod timestamp;
pub mod truehd;
pub mod vc1;
