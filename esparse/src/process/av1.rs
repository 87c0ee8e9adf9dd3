use std::collections::VecDeque;

use anyhow::{Result, bail};
use log::{debug, trace, warn};

use crate::process::scanner::{Probe, ScanState, SyncScanner, Unit};
use crate::process::timestamp::TimestampCalculator;
use crate::process::{EsParser, Frame};
use crate::structs::av1::{
    FrameHeader, Metadata, OBU_FRAME, OBU_FRAME_HEADER, OBU_METADATA, OBU_PADDING,
    OBU_SEQUENCE_HEADER, OBU_TEMPORAL_DELIMITER, ObuHeader, SequenceHeader, obu_type_name,
};
use crate::structs::timestamp::{NS_PER_SECOND, Timestamp};
use crate::utils::errors::Av1Error;

const TEMPORAL_DELIMITER: [u8; 2] = [0x12, 0x00];

/// Summary of one temporal unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemporalUnit {
    pub frame_headers: Vec<FrameHeader>,
    pub metadata: Vec<Metadata>,
    pub has_sequence_header: bool,
    pub dolby_vision_rpu: bool,
}

#[derive(Debug, Default)]
struct ObuSync {
    started: bool,
    pending: Option<ObuHeader>,
}

impl ObuSync {
    fn probe(&mut self, data: &[u8], state: ScanState) -> Probe {
        // After losing sync only a temporal delimiter is trusted.
        if self.started && !state.synced && !data.starts_with(&TEMPORAL_DELIMITER) {
            if data.len() < TEMPORAL_DELIMITER.len() {
                return Probe::NeedMore;
            }

            return match data.windows(2).position(|w| w == TEMPORAL_DELIMITER) {
                Some(pos) => Probe::Skip(pos),
                None if data.last() == Some(&TEMPORAL_DELIMITER[0]) => {
                    Probe::Skip(data.len() - 1)
                }
                None => Probe::Skip(data.len()),
            };
        }

        let header = match ObuHeader::decode(data) {
            Ok(header) => header,
            Err(e) => {
                return match e.downcast_ref::<Av1Error>() {
                    Some(Av1Error::Truncated(_)) if !state.eos => Probe::NeedMore,
                    _ => {
                        debug!("Invalid OBU header: {e}");
                        Probe::Invalid
                    }
                };
            }
        };

        // The stream has to open with a temporal delimiter
        if !self.started && header.obu_type != OBU_TEMPORAL_DELIMITER {
            return Probe::Invalid;
        }

        let Some(size) = header.total_size() else {
            self.pending = Some(header);
            return Probe::Found(header.header_len);
        };

        if data.len() < size {
            return if state.eos {
                Probe::Invalid
            } else {
                Probe::NeedMore
            };
        }

        self.started = true;
        self.pending = Some(header);
        Probe::Found(size)
    }
}

/// AV1 low overhead bitstream parser emitting one frame per temporal unit.
///
/// Temporal delimiters and padding OBUs are dropped from the output, every
/// other OBU is kept in input order.
///
/// ```rust
/// use esparse::process::EsParser;
/// use esparse::process::av1::Av1Parser;
///
/// let mut parser = Av1Parser::default();
/// parser.add_bytes(&[0x12, 0x00, 0x7A, 0x01, 0x00])?;
/// parser.flush()?;
///
/// assert!(parser.sequence_header().is_none());
/// assert_eq!(parser.frame_available(), 0);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Av1Parser {
    scanner: SyncScanner,
    sync: ObuSync,
    frames: VecDeque<Frame<TemporalUnit>>,
    current: Option<Frame<TemporalUnit>>,
    sequence_header: Option<SequenceHeader>,
    config_obus: Vec<u8>,
    parse_sequence_header_obus_only: bool,
    default_duration: Option<Timestamp>,
    timestamps: TimestampCalculator,
    dropped_obus: u64,
    dropped_bytes: u64,
    aborted: bool,
}

impl Default for Av1Parser {
    fn default() -> Self {
        Self {
            scanner: SyncScanner::default(),
            sync: ObuSync::default(),
            frames: VecDeque::new(),
            current: None,
            sequence_header: None,
            config_obus: Vec::new(),
            parse_sequence_header_obus_only: false,
            default_duration: None,
            timestamps: TimestampCalculator::new(NS_PER_SECOND as u64),
            dropped_obus: 0,
            dropped_bytes: 0,
            aborted: false,
        }
    }
}

impl Av1Parser {
    /// Only decode sequence headers. No frames are produced, used for probing.
    pub fn set_parse_sequence_header_obus_only(&mut self, only: bool) {
        self.parse_sequence_header_obus_only = only;
    }

    /// Frame duration used when the sequence header carries no timing info.
    pub fn set_default_duration(&mut self, duration: Timestamp) {
        self.default_duration = Some(duration);
    }

    /// Queues a timestamp taking precedence over extrapolated ones.
    pub fn add_timestamp(&mut self, timestamp: Timestamp, stream_position: Option<u64>) {
        self.timestamps.add_timestamp(timestamp, stream_position);
    }

    pub fn sequence_header(&self) -> Option<&SequenceHeader> {
        self.sequence_header.as_ref()
    }

    /// The last sequence header OBU, suitable as codec private data.
    pub fn config_obus(&self) -> Option<&[u8]> {
        (!self.config_obus.is_empty()).then_some(self.config_obus.as_slice())
    }

    /// OBUs with a valid header but an undecodable payload. Their bytes are
    /// included in [`garbage_size`](EsParser::garbage_size).
    pub fn dropped_obus(&self) -> u64 {
        self.dropped_obus
    }

    pub fn frame_duration(&self) -> Option<Timestamp> {
        self.sequence_header
            .as_ref()
            .and_then(SequenceHeader::frame_duration)
            .or(self.default_duration)
    }

    fn parse(&mut self) -> Result<()> {
        if self.aborted {
            bail!(Av1Error::Aborted);
        }

        loop {
            let sync = &mut self.sync;
            let Some(unit) = self.scanner.next_unit(|data, state| sync.probe(data, state))? else {
                return Ok(());
            };
            let Some(header) = self.sync.pending.take() else {
                continue;
            };

            if !header.has_size_field {
                self.aborted = true;
                bail!(Av1Error::ObuWithoutSizeField);
            }

            let size = unit.data.len() as u64;
            if let Err(e) = self.handle_obu(unit, header) {
                debug!("Dropping OBU of {size} bytes: {e}");
                self.dropped_obus += 1;
                self.dropped_bytes += size;
                self.scanner.lose_sync();
            }
        }
    }

    fn handle_obu(&mut self, unit: Unit, header: ObuHeader) -> Result<()> {
        let payload = &unit.data[header.header_len..];
        trace!(
            "OBU {} ({} bytes) at {}",
            obu_type_name(header.obu_type),
            unit.data.len(),
            unit.stream_position
        );

        if header.obu_type == OBU_SEQUENCE_HEADER {
            let seq = SequenceHeader::decode(payload)?;
            if self.config_obus != unit.data {
                self.config_obus = unit.data.clone();
            }
            self.sequence_header = Some(seq);
        }

        if self.parse_sequence_header_obus_only {
            return Ok(());
        }

        match header.obu_type {
            OBU_TEMPORAL_DELIMITER => {
                self.emit_current();
                self.current_unit(unit.stream_position, unit.garbage_before);
                return Ok(());
            }
            OBU_PADDING => return Ok(()),
            _ => {}
        }

        let seq = self.sequence_header.clone();
        let current = self.current_unit(unit.stream_position, unit.garbage_before);

        match header.obu_type {
            OBU_SEQUENCE_HEADER => current.header.has_sequence_header = true,
            OBU_FRAME_HEADER | OBU_FRAME => match seq {
                Some(seq) => {
                    let frame_header = FrameHeader::decode(payload, &seq)?;
                    current.keyframe |= frame_header.is_keyframe();
                    current.header.frame_headers.push(frame_header);
                }
                None => {
                    warn!(
                        "Frame header at {} without a preceding sequence header",
                        unit.stream_position
                    );
                    current.incomplete = true;
                }
            },
            OBU_METADATA => match Metadata::decode(payload) {
                Ok(metadata) => {
                    current.header.dolby_vision_rpu |= metadata.is_dolby_vision_rpu();
                    current.header.metadata.push(metadata);
                }
                Err(e) => debug!("Undecodable metadata OBU: {e}"),
            },
            _ => {}
        }

        current.data.extend_from_slice(&unit.data);

        Ok(())
    }

    fn current_unit(
        &mut self,
        stream_position: u64,
        garbage_before: u64,
    ) -> &mut Frame<TemporalUnit> {
        self.current.get_or_insert_with(|| {
            let mut frame = Frame::new(TemporalUnit::default(), Vec::new(), stream_position);
            frame.garbage_before = garbage_before;
            frame
        })
    }

    fn emit_current(&mut self) {
        let Some(mut frame) = self.current.take() else {
            return;
        };
        if frame.data.is_empty() {
            return;
        }

        let duration = self.frame_duration();
        let nanos = duration.map_or(0, |d| d.ns().max(0) as u64);
        frame.timestamp = Some(
            self.timestamps
                .get_next_timestamp(nanos, Some(frame.stream_position)),
        );
        frame.duration = duration;

        self.frames.push_back(frame);
    }
}

impl EsParser for Av1Parser {
    type Header = TemporalUnit;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.scanner.add(data);
        self.parse()
    }

    fn flush(&mut self) -> Result<()> {
        self.scanner.finish();
        self.parse()?;
        self.emit_current();

        Ok(())
    }

    fn frame_available(&self) -> usize {
        self.frames.len()
    }

    fn get_frame(&mut self) -> Option<Frame<TemporalUnit>> {
        self.frames.pop_front()
    }

    fn parsed_stream_position(&self) -> u64 {
        self.scanner.position()
    }

    fn total_stream_position(&self) -> u64 {
        self.scanner.total_added()
    }

    fn garbage_size(&self) -> u64 {
        self.scanner.garbage() + self.dropped_bytes
    }
}
