use anyhow::Result;
use serde::Serialize;

use esparse::process::ac3::Ac3Parser;
use esparse::process::av1::{Av1Parser, TemporalUnit};
use esparse::process::avc::AvcParser;
use esparse::process::dovi::DoviParser;
use esparse::process::hevc::HevcParser;
use esparse::process::truehd::TrueHdAc3Splitter;
use esparse::process::vc1::{Vc1Parser, Vc1Picture};
use esparse::process::{EsParser, Frame};
use esparse::structs::ac3::Ac3Header;
use esparse::structs::nal::AccessUnit;
use esparse::structs::timestamp::Timestamp;
use esparse::structs::truehd::{TrueHdFormat, TrueHdHeader};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, Codec, InputArgs};
use crate::input::{CHUNK_SIZE, InputReader};

/// One line of `frames` output.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub index: usize,
    pub stream: &'static str,
    pub position: u64,
    pub size: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub keyframe: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dependent: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub garbage_before: u64,
    #[serde(skip)]
    pub start: Option<Timestamp>,
    #[serde(skip)]
    pub end: Option<Timestamp>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl FrameRecord {
    pub fn from_frame<H: FrameKind>(frame: &Frame<H>, stream: &'static str) -> Self {
        Self {
            index: 0,
            stream,
            position: frame.stream_position,
            size: frame.size(),
            kind: frame.header.kind(),
            keyframe: frame.keyframe,
            dependent: frame.dependent,
            incomplete: frame.incomplete,
            timestamp: frame.timestamp.map(|t| t.to_string()),
            duration: frame.duration.map(|d| d.to_string()),
            garbage_before: frame.garbage_before,
            start: frame.timestamp,
            end: frame
                .timestamp
                .map(|t| t + frame.duration.unwrap_or(Timestamp::ZERO)),
        }
    }
}

/// Short frame type description.
pub trait FrameKind {
    fn kind(&self) -> String;
}

impl FrameKind for Ac3Header {
    fn kind(&self) -> String {
        let format = if self.is_eac3() { "E-AC-3" } else { "AC-3" };
        match self.dependent_frames.len() {
            0 => format!("{format} {}ch", self.channels),
            n => format!("{format} {}ch +{n}", self.effective_channels()),
        }
    }
}

impl FrameKind for TrueHdHeader {
    fn kind(&self) -> String {
        let format = match self.format {
            TrueHdFormat::TrueHd => "TrueHD",
            TrueHdFormat::Mlp => "MLP",
        };
        if self.major_sync {
            format!("{format} major sync")
        } else {
            format.to_string()
        }
    }
}

impl FrameKind for TemporalUnit {
    fn kind(&self) -> String {
        let types: Vec<String> = self
            .frame_headers
            .iter()
            .map(|header| {
                if header.show_existing_frame {
                    "ShowExisting".to_string()
                } else {
                    format!("{:?}", header.frame_type)
                }
            })
            .collect();
        if types.is_empty() {
            "-".to_string()
        } else {
            types.join("+")
        }
    }
}

impl FrameKind for AccessUnit {
    fn kind(&self) -> String {
        format!("{} poc {}", self.slice_type, self.poc)
    }
}

impl FrameKind for Vc1Picture {
    fn kind(&self) -> String {
        let header = &self.frame_header;
        match header.second_field_type {
            Some(second) => format!("{}/{second}", header.picture_type),
            None => header.picture_type.to_string(),
        }
    }
}

/// Stream level parameters of a parser, printed by `info`.
pub trait StreamParameters: EsParser {
    fn parameters(&self, first: Option<&Self::Header>) -> Vec<(&'static str, String)>;
}

impl StreamParameters for Ac3Parser {
    fn parameters(&self, first: Option<&Ac3Header>) -> Vec<(&'static str, String)> {
        let Some(header) = first else {
            return Vec::new();
        };

        let mut params = vec![
            ("Format", if header.is_eac3() { "E-AC-3" } else { "AC-3" }.to_string()),
            ("Sampling rate", format!("{} Hz", header.sample_rate)),
            ("Channels", header.effective_channels().to_string()),
            ("LFE", header.lfeon.to_string()),
            ("Samples per frame", header.samples.to_string()),
            ("Bitstream id", header.bsid.to_string()),
        ];
        if header.bit_rate > 0 {
            params.push(("Bit rate", format!("{} kbps", header.bit_rate / 1000)));
        }
        params
    }
}

impl StreamParameters for Av1Parser {
    fn parameters(&self, _: Option<&TemporalUnit>) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(seq) = self.sequence_header() {
            params.push(("Profile", seq.seq_profile.to_string()));
            params.push((
                "Maximum size",
                format!("{}x{}", seq.max_frame_width, seq.max_frame_height),
            ));
            params.push(("Bit depth", seq.color_config.bit_depth.to_string()));
        }
        if let Some(duration) = self.frame_duration() {
            params.push(("Frame duration", duration.to_string()));
        }
        if self.dropped_obus() > 0 {
            params.push(("Dropped OBUs", self.dropped_obus().to_string()));
        }
        params
    }
}

impl StreamParameters for AvcParser {
    fn parameters(&self, _: Option<&AccessUnit>) -> Vec<(&'static str, String)> {
        let Some(sps) = self.codec().active_sps() else {
            return Vec::new();
        };

        vec![
            ("Profile", sps.profile_idc.to_string()),
            ("Level", sps.level_idc.to_string()),
            ("Size", format!("{}x{}", sps.width(), sps.height())),
            ("Bit depth", sps.bit_depth_luma.to_string()),
            ("Frame duration", self.frame_duration().to_string()),
        ]
    }
}

impl StreamParameters for HevcParser {
    fn parameters(&self, _: Option<&AccessUnit>) -> Vec<(&'static str, String)> {
        let Some(sps) = self.codec().active_sps() else {
            return Vec::new();
        };

        vec![
            ("Profile", sps.profile_tier_level.profile_idc.to_string()),
            ("Level", sps.profile_tier_level.level_idc.to_string()),
            ("Size", format!("{}x{}", sps.width(), sps.height())),
            ("Bit depth", sps.bit_depth_luma.to_string()),
            ("Frame duration", self.frame_duration().to_string()),
        ]
    }
}

impl StreamParameters for DoviParser {
    fn parameters(&self, first: Option<&AccessUnit>) -> Vec<(&'static str, String)> {
        let mut params = self.base_layer().parameters(first);
        let combiner = self.combiner();
        params.push(("Combined frames", combiner.combined_frames().to_string()));
        params.push((
            "Unmatched base layer frames",
            combiner.unmatched_base_layer_frames().to_string(),
        ));
        params.push((
            "Dropped enhancement layer frames",
            combiner.dropped_enhancement_layer_frames().to_string(),
        ));
        params
    }
}

impl StreamParameters for Vc1Parser {
    fn parameters(&self, _: Option<&Vc1Picture>) -> Vec<(&'static str, String)> {
        let Some(seq) = self.sequence_header() else {
            return Vec::new();
        };

        let mut params = vec![
            ("Level", seq.level.to_string()),
            (
                "Coded size",
                format!("{}x{}", seq.max_coded_width, seq.max_coded_height),
            ),
            ("Interlaced", seq.interlace.to_string()),
            ("Pulldown", seq.pulldown.to_string()),
            ("Frame duration", self.frame_duration().to_string()),
        ];
        if let Some(ext) = &seq.display_extension {
            params.push((
                "Display size",
                format!("{}x{}", ext.display_width, ext.display_height),
            ));
        }
        params
    }
}

/// Codec independent view of a parser used by the commands.
pub trait StreamDriver {
    fn add_bytes(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Moves every ready frame into `records`.
    fn drain(&mut self, records: &mut Vec<FrameRecord>) -> Result<()>;

    fn parameters(&self) -> Vec<(&'static str, String)>;

    fn garbage_size(&self) -> u64;
}

struct EsDriver<P: EsParser> {
    parser: P,
    stream: &'static str,
    first: Option<P::Header>,
}

impl<P: EsParser> EsDriver<P> {
    fn new(parser: P, stream: &'static str) -> Self {
        Self {
            parser,
            stream,
            first: None,
        }
    }
}

impl<P> StreamDriver for EsDriver<P>
where
    P: StreamParameters,
    P::Header: FrameKind + Clone,
{
    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.parser.add_bytes(data)
    }

    fn flush(&mut self) -> Result<()> {
        self.parser.flush()
    }

    fn drain(&mut self, records: &mut Vec<FrameRecord>) -> Result<()> {
        while let Some(frame) = self.parser.get_frame() {
            if self.first.is_none() {
                self.first = Some(frame.header.clone());
            }
            records.push(FrameRecord::from_frame(&frame, self.stream));
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        self.parser.parameters(self.first.as_ref())
    }

    fn garbage_size(&self) -> u64 {
        self.parser.garbage_size()
    }
}

#[derive(Default)]
struct TrueHdDriver {
    splitter: TrueHdAc3Splitter,
    first_ac3: Option<Ac3Header>,
}

impl StreamDriver for TrueHdDriver {
    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.splitter.add_bytes(data)
    }

    fn flush(&mut self) -> Result<()> {
        self.splitter.flush()
    }

    fn drain(&mut self, records: &mut Vec<FrameRecord>) -> Result<()> {
        while let Some(frame) = self.splitter.get_truehd_frame()? {
            records.push(FrameRecord::from_frame(&frame, "truehd"));
        }
        while let Some(frame) = self.splitter.get_ac3_frame()? {
            if self.first_ac3.is_none() {
                self.first_ac3 = Some(frame.header.clone());
            }
            records.push(FrameRecord::from_frame(&frame, "ac3"));
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let parser = self.splitter.parser();
        let mut params = Vec::new();

        if let Some(header) = parser.stream_header() {
            let format = match header.format {
                TrueHdFormat::TrueHd => "TrueHD",
                TrueHdFormat::Mlp => "MLP",
            };
            params.push(("Format", format.to_string()));
            params.push(("Sampling rate", format!("{} Hz", header.sample_rate)));
            params.push(("Channels", header.channels.to_string()));
            params.push(("Samples per frame", header.samples_per_frame.to_string()));
            params.push(("Variable rate", header.variable_rate.to_string()));
            params.push(("Substreams", header.substreams.to_string()));
            params.push(("Dolby Atmos", header.atmos.to_string()));
        }
        if let Some(timecode) = parser.timecode() {
            params.push(("SMPTE timecode", timecode.to_string()));
        }
        if let Some(ac3) = &self.first_ac3 {
            params.push((
                "Embedded AC-3",
                format!("{} Hz, {} channels", ac3.sample_rate, ac3.effective_channels()),
            ));
        }
        params
    }

    fn garbage_size(&self) -> u64 {
        self.splitter.parser().garbage_size()
    }
}

/// HEVC base layer with an enhancement layer read from a second input in
/// step with the base layer.
struct DoviDriver {
    driver: EsDriver<DoviParser>,
    enhancement: InputReader,
    buffer: Vec<u8>,
}

impl DoviDriver {
    fn feed_enhancement_layer(&mut self, len: usize) -> Result<()> {
        self.buffer.resize(len, 0);
        let read = self.enhancement.read_chunk(&mut self.buffer)?;
        self.driver
            .parser
            .add_enhancement_layer_bytes(&self.buffer[..read])
    }
}

impl StreamDriver for DoviDriver {
    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.feed_enhancement_layer(data.len())?;
        self.driver.add_bytes(data)
    }

    fn flush(&mut self) -> Result<()> {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = self.enhancement.read_chunk(&mut buffer)?;
            if read == 0 {
                break;
            }
            self.driver
                .parser
                .add_enhancement_layer_bytes(&buffer[..read])?;
        }

        self.driver.flush()
    }

    fn drain(&mut self, records: &mut Vec<FrameRecord>) -> Result<()> {
        self.driver.drain(records)
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        self.driver.parameters()
    }

    fn garbage_size(&self) -> u64 {
        self.driver.garbage_size()
    }
}

/// Builds the parser for `args`, configured from the command line.
pub fn open_driver(args: &InputArgs) -> Result<Box<dyn StreamDriver>> {
    let codec = args.codec()?;
    let default_duration = args
        .default_duration
        .map(|ms| Timestamp::from_ns((ms * 1_000_000.0).round() as i64));

    if args.enhancement_layer.is_some() && codec != Codec::Hevc {
        anyhow::bail!("--enhancement-layer requires an HEVC base layer");
    }

    Ok(match codec {
        Codec::Ac3 => {
            let mut parser = Ac3Parser::default();
            parser.set_byte_swapped(args.byte_swapped);
            Box::new(EsDriver::new(parser, "ac3"))
        }
        Codec::Truehd => Box::new(TrueHdDriver::default()),
        Codec::Av1 => {
            let mut parser = Av1Parser::default();
            if let Some(duration) = default_duration {
                parser.set_default_duration(duration);
            }
            Box::new(EsDriver::new(parser, "av1"))
        }
        Codec::Avc => {
            let mut parser = AvcParser::default();
            parser.set_nalu_size_length(args.nalu_size_length)?;
            if let Some(duration) = default_duration {
                parser.set_default_duration(duration);
            }
            Box::new(EsDriver::new(parser, "avc"))
        }
        Codec::Hevc => match &args.enhancement_layer {
            Some(path) => {
                let mut parser = DoviParser::default();
                parser.set_nalu_size_length(args.nalu_size_length)?;
                Box::new(DoviDriver {
                    driver: EsDriver::new(parser, "hevc"),
                    enhancement: InputReader::new(path)?,
                    buffer: Vec::new(),
                })
            }
            None => {
                let mut parser = HevcParser::default();
                parser.set_nalu_size_length(args.nalu_size_length)?;
                if let Some(duration) = default_duration {
                    parser.set_default_duration(duration);
                }
                Box::new(EsDriver::new(parser, "hevc"))
            }
        },
        Codec::Vc1 => {
            let mut parser = Vc1Parser::default();
            if let Some(duration) = default_duration {
                parser.set_default_duration(duration);
            }
            Box::new(EsDriver::new(parser, "vc1"))
        }
    })
}

/// Feeds the whole input through the parser selected by `args`.
///
/// `on_records` sees every batch of frames as soon as the parser releases
/// them and returns `false` to stop reading early. Returns the driver for
/// stream level queries.
pub fn process_stream<F>(
    args: &InputArgs,
    cli: &Cli,
    multi: Option<&MultiProgress>,
    mut on_records: F,
) -> Result<Box<dyn StreamDriver>>
where
    F: FnMut(&[FrameRecord]) -> Result<bool>,
{
    let mut input_reader = InputReader::new(&args.input)?;
    let mut driver = open_driver(args)?;

    let pb = match multi {
        Some(multi) => {
            let pb = match input_reader.size() {
                Some(size) => {
                    let pb = multi.add(ProgressBar::new(size));
                    pb.set_style(ProgressStyle::with_template(
                        "{spinner:.green} {msg} [{bar:30}] {bytes}/{total_bytes}",
                    )?);
                    pb
                }
                None => {
                    let pb = multi.add(ProgressBar::new_spinner());
                    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg} {bytes}")?);
                    pb
                }
            };
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Parsing frames...");
            Some(pb)
        }
        None => None,
    };

    let mut records = Vec::new();
    let mut next_index = 0;
    let mut stopped = false;

    let mut handle = |driver: &mut Box<dyn StreamDriver>| -> Result<bool> {
        records.clear();
        driver.drain(&mut records)?;
        for record in records.iter_mut() {
            record.index = next_index;
            next_index += 1;

            if cli.strict && record.incomplete {
                anyhow::bail!(
                    "Frame {} at stream position {} is incomplete",
                    record.index,
                    record.position
                );
            }
        }
        on_records(&records)
    };

    input_reader.process_chunks(CHUNK_SIZE, |chunk| {
        driver.add_bytes(chunk)?;
        if let Some(ref pb) = pb {
            pb.inc(chunk.len() as u64);
        }

        let more = handle(&mut driver)?;
        stopped = !more;
        Ok(more)
    })?;

    if !stopped {
        driver.flush()?;
        handle(&mut driver)?;
    }

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_skip_empty_fields() -> Result<()> {
        let mut frame = Frame::new(Vc1Picture::default(), vec![0; 12], 4);
        frame.keyframe = true;
        frame.timestamp = Some(Timestamp::from_ms(40));

        let record = FrameRecord::from_frame(&frame, "vc1");
        assert_eq!(record.kind, "I");
        assert_eq!(record.end, Some(Timestamp::from_ms(40)));

        let yaml = serde_yaml_ng::to_string(&record)?;
        assert!(yaml.contains("type: I"));
        assert!(yaml.contains("00:00:00.040000000"));
        assert!(!yaml.contains("incomplete"));
        assert!(!yaml.contains("duration"));
        Ok(())
    }
}
