use anyhow::Result;

use crate::structs::timestamp::Timestamp;

/// Generic sync/resync scanner over the accumulation buffer.
pub mod scanner;

/// Timeline reconstruction from provided timestamps and sample counts.
pub mod timestamp;

/// AC-3 and E-AC-3 frame parser.
pub mod ac3;

/// TrueHD / MLP parser with embedded AC-3 splitting.
pub mod truehd;

/// AV1 OBU stream parser assembling temporal units.
pub mod av1;

/// Annex B NAL unit framework shared by AVC and HEVC.
pub mod nal;

/// AVC (H.264) access unit assembly and picture order.
pub mod avc;

/// HEVC (H.265) access unit assembly and picture order.
pub mod hevc;

/// HEVC Dolby Vision base and enhancement layer combiner.
pub mod dovi;

/// VC-1 advanced profile parser.
pub mod vc1;

/// Video frame duration used when neither the stream nor the caller provides one.
pub const FALLBACK_FRAME_DURATION: Timestamp = Timestamp::from_ms(40);

/// A complete, validated unit emitted by a parser.
#[derive(Debug, Clone)]
pub struct Frame<H> {
    pub header: H,
    pub data: Vec<u8>,
    /// Byte offset of the first payload byte in the input stream.
    pub stream_position: u64,
    /// Bytes skipped during resynchronisation right before this frame.
    pub garbage_before: u64,
    pub keyframe: bool,
    /// Frame of a dependent stream (AC-3 embedded in TrueHD), or a base
    /// layer frame carrying Dolby Vision enhancement layer data.
    pub dependent: bool,
    /// Some referenced information was missing while assembling the frame.
    pub incomplete: bool,
    pub timestamp: Option<Timestamp>,
    pub duration: Option<Timestamp>,
}

impl<H> Frame<H> {
    pub fn new(header: H, data: Vec<u8>, stream_position: u64) -> Self {
        Self {
            header,
            data,
            stream_position,
            garbage_before: 0,
            keyframe: false,
            dependent: false,
            incomplete: false,
            timestamp: None,
            duration: None,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl<H> AsRef<[u8]> for Frame<H> {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Incremental elementary stream parser.
///
/// Bytes are appended with [`add_bytes`](EsParser::add_bytes) and completed
/// frames are pulled in input order with [`get_frame`](EsParser::get_frame).
/// [`flush`](EsParser::flush) signals the end of the stream so that pending
/// units are finalised.
pub trait EsParser {
    type Header;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Number of frames ready to be pulled.
    fn frame_available(&self) -> usize;

    fn get_frame(&mut self) -> Option<Frame<Self::Header>>;

    /// Bytes that ended up in emitted or pending frames plus skipped garbage.
    fn parsed_stream_position(&self) -> u64;

    /// Bytes handed to the parser so far.
    fn total_stream_position(&self) -> u64;

    /// Bytes skipped while searching for sync.
    fn garbage_size(&self) -> u64;

    fn frames(&mut self) -> Frames<'_, Self>
    where
        Self: Sized,
    {
        Frames { parser: self }
    }
}

/// Draining iterator over the frames currently available in a parser.
pub struct Frames<'a, P: EsParser> {
    parser: &'a mut P,
}

impl<P: EsParser> Iterator for Frames<'_, P> {
    type Item = Frame<P::Header>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.get_frame()
    }
}
