use std::collections::VecDeque;

use anyhow::Result;
use log::{debug, trace};

use crate::process::scanner::{Probe, ScanState, SyncScanner, Unit};
use crate::process::{EsParser, Frame};
use crate::structs::ac3::{
    AC3_HEADER_SIZE, Ac3FrameType, Ac3Header, FrameChain, check_consecutive_frames,
    remove_dialog_normalization_gain, verify_checksums,
};
use crate::structs::timestamp::Timestamp;
use crate::utils::errors::Ac3Error;

/// Incremental AC-3 / E-AC-3 parser.
///
/// Dependent substreams and additional independent substreams are appended
/// to the frame of the preceding independent substream 0, so one emitted
/// frame covers one complete audio block period.
///
/// ```rust
/// use esparse::process::EsParser;
/// use esparse::process::ac3::Ac3Parser;
///
/// let mut parser = Ac3Parser::default();
/// parser.set_required_consecutive_frames(2);
/// parser.add_bytes(&[0x00, 0x0B, 0x77])?;
/// parser.flush()?;
///
/// assert_eq!(parser.frame_available(), 0);
/// assert_eq!(parser.garbage_size(), 3);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct Ac3Parser {
    scanner: SyncScanner,
    frames: VecDeque<Frame<Ac3Header>>,
    current: Option<Frame<Ac3Header>>,
    required_consecutive_frames: usize,
    byte_swapped: bool,
    swap_remainder: Option<u8>,
    remove_dialnorm: bool,
    total_bytes: u64,
    orphaned_dependent_frames: usize,
}

impl Ac3Parser {
    /// Number of chained headers needed before trusting a sync word while
    /// unsynced. Values below 2 accept the first valid header.
    pub fn set_required_consecutive_frames(&mut self, n: usize) {
        self.required_consecutive_frames = n;
    }

    /// Input consists of 16-bit little-endian words.
    pub fn set_byte_swapped(&mut self, byte_swapped: bool) {
        self.byte_swapped = byte_swapped;
    }

    pub fn set_remove_dialog_normalization_gain(&mut self, remove: bool) {
        self.remove_dialnorm = remove;
    }

    /// Dependent frames dropped because no independent frame preceded them.
    pub fn orphaned_dependent_frames(&self) -> usize {
        self.orphaned_dependent_frames
    }

    fn probe(data: &[u8], state: ScanState, required: usize) -> Probe {
        if data.len() < 2 {
            return Probe::NeedMore;
        }

        if data[0] != 0x0B || data[1] != 0x77 {
            return match data[1..].windows(2).position(|w| w == [0x0B, 0x77]) {
                Some(pos) => Probe::Skip(pos + 1),
                None if data[data.len() - 1] == 0x0B => Probe::Skip(data.len() - 1),
                None => Probe::Skip(data.len()),
            };
        }

        let header = match Ac3Header::decode(data) {
            Ok(header) => header,
            Err(e) => {
                return match e.downcast_ref::<Ac3Error>() {
                    Some(Ac3Error::HeaderTooShort(_)) if data.len() < AC3_HEADER_SIZE => {
                        Probe::NeedMore
                    }
                    _ => Probe::Invalid,
                };
            }
        };

        if !state.synced && required > 1 {
            match check_consecutive_frames(data, 0, required, state.eos) {
                FrameChain::Complete => {}
                FrameChain::Incomplete => return Probe::NeedMore,
                FrameChain::Broken => return Probe::Invalid,
            }
        }

        if data.len() < header.frame_size {
            // A candidate running past the end of the stream is not a frame.
            return if state.eos {
                Probe::Invalid
            } else {
                Probe::NeedMore
            };
        }

        if !verify_checksums(&data[..header.frame_size], &header) {
            trace!("CRC mismatch on AC-3 candidate");
            return Probe::Invalid;
        }

        Probe::Found(header.frame_size)
    }

    fn parse(&mut self) -> Result<()> {
        let required = self.required_consecutive_frames;
        while let Some(unit) = self
            .scanner
            .next_unit(|data, state| Self::probe(data, state, required))?
        {
            self.handle_unit(unit)?;
        }

        Ok(())
    }

    fn handle_unit(&mut self, unit: Unit) -> Result<()> {
        let Unit {
            mut data,
            stream_position,
            garbage_before,
        } = unit;
        let header = Ac3Header::decode(&data)?;

        if self.remove_dialnorm && remove_dialog_normalization_gain(&mut data, &header)? {
            trace!("Removed dialog normalization gain at {stream_position}");
        }

        if header.frame_type == Ac3FrameType::Dependent || header.substream_id > 0 {
            match self.current.as_mut() {
                Some(current) => {
                    current.header.dependent_frames.push(header);
                    current.data.extend_from_slice(&data);
                }
                None => {
                    debug!(
                        "Dropping dependent frame at {stream_position} without independent frame"
                    );
                    self.orphaned_dependent_frames += 1;
                }
            }

            return Ok(());
        }

        self.emit_current();

        let duration = Timestamp::from_samples(header.samples as u64, header.sample_rate as u64);
        let mut frame = Frame::new(header, data, stream_position);
        frame.garbage_before = garbage_before;
        frame.keyframe = true;
        frame.duration = duration;
        self.current = Some(frame);

        Ok(())
    }

    fn emit_current(&mut self) {
        if let Some(frame) = self.current.take() {
            self.frames.push_back(frame);
        }
    }

    fn swap_bytes(&mut self, data: &[u8]) -> Vec<u8> {
        let mut swapped = Vec::with_capacity(data.len() + 1);
        swapped.extend(self.swap_remainder.take());
        swapped.extend_from_slice(data);

        if swapped.len() % 2 == 1 {
            self.swap_remainder = swapped.pop();
        }
        for pair in swapped.chunks_exact_mut(2) {
            pair.swap(0, 1);
        }

        swapped
    }
}

impl EsParser for Ac3Parser {
    type Header = Ac3Header;

    fn add_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.total_bytes += data.len() as u64;

        if self.byte_swapped {
            let swapped = self.swap_bytes(data);
            self.scanner.add(&swapped);
        } else {
            self.scanner.add(data);
        }

        self.parse()
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(byte) = self.swap_remainder.take() {
            self.scanner.add(&[byte]);
        }

        self.scanner.finish();
        self.parse()?;
        self.emit_current();

        Ok(())
    }

    fn frame_available(&self) -> usize {
        self.frames.len()
    }

    fn get_frame(&mut self) -> Option<Frame<Ac3Header>> {
        self.frames.pop_front()
    }

    fn parsed_stream_position(&self) -> u64 {
        self.scanner.position()
    }

    fn total_stream_position(&self) -> u64 {
        self.total_bytes
    }

    fn garbage_size(&self) -> u64 {
        self.scanner.garbage()
    }
}
