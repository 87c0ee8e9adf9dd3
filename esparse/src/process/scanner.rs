use anyhow::Result;
use log::debug;

use crate::utils::byte_buffer::ByteBuffer;
use crate::utils::rbsp::{find_start_code, start_code_len};

/// Verdict of a codec specific probe on the bytes at the read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// A candidate may start here but more bytes are needed to decide.
    NeedMore,
    /// No valid unit starts at the cursor.
    Invalid,
    /// No valid unit starts within the next `n` bytes.
    Skip(usize),
    /// A complete unit of `n` bytes starts at the cursor.
    Found(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanState {
    pub synced: bool,
    pub eos: bool,
}

/// Raw unit cut out of the stream by [`SyncScanner::next_unit`].
#[derive(Debug, Clone)]
pub struct Unit {
    pub data: Vec<u8>,
    pub stream_position: u64,
    pub garbage_before: u64,
}

/// Owns the accumulation buffer of a parser and drives the
/// `unsynced -> synced -> unsynced` cycle.
///
/// Every rejected byte is counted as garbage and consumed, so each failed
/// probe makes forward progress.
#[derive(Debug, Default)]
pub struct SyncScanner {
    buffer: ByteBuffer,
    synced: bool,
    eos: bool,
    garbage: u64,
    pending_garbage: u64,
    sync_losses: u64,
}

impl SyncScanner {
    pub fn add(&mut self, data: &[u8]) {
        self.buffer.add(data);
    }

    /// Marks the end of the stream. Probes see `eos == true` from now on.
    pub fn finish(&mut self) {
        self.eos = true;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_finished(&self) -> bool {
        self.eos
    }

    /// Forgets the current sync, e.g. after a unit failed deeper validation.
    pub fn lose_sync(&mut self) {
        if self.synced {
            debug!("Lost sync at stream position {}", self.buffer.position());
            self.sync_losses += 1;
        }
        self.synced = false;
    }

    /// Unconsumed bytes.
    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    pub fn total_added(&self) -> u64 {
        self.buffer.total_added()
    }

    pub fn garbage(&self) -> u64 {
        self.garbage
    }

    pub fn sync_losses(&self) -> u64 {
        self.sync_losses
    }

    /// Cuts the next unit according to `probe`.
    ///
    /// Returns `Ok(None)` when the buffer is exhausted or the probe needs
    /// more data. At end of stream, bytes the probe cannot use are counted
    /// as garbage and dropped.
    pub fn next_unit<F>(&mut self, mut probe: F) -> Result<Option<Unit>>
    where
        F: FnMut(&[u8], ScanState) -> Probe,
    {
        loop {
            let available = self.buffer.available();
            if available == 0 {
                return Ok(None);
            }

            let state = ScanState {
                synced: self.synced,
                eos: self.eos,
            };

            match probe(self.buffer.data(), state) {
                Probe::NeedMore => {
                    if self.eos {
                        debug!("Discarding {available} trailing bytes at end of stream");
                        self.lose_sync();
                        self.skip(available)?;
                    }
                    return Ok(None);
                }
                Probe::Invalid | Probe::Found(0) => {
                    self.lose_sync();
                    self.skip(1)?;
                }
                Probe::Skip(n) => {
                    self.lose_sync();
                    self.skip(n.clamp(1, available))?;
                }
                Probe::Found(n) => {
                    let n = n.min(available);
                    let unit = Unit {
                        data: self.buffer.data()[..n].to_vec(),
                        stream_position: self.buffer.position(),
                        garbage_before: std::mem::take(&mut self.pending_garbage),
                    };
                    self.buffer.consumed(n)?;
                    self.synced = true;

                    return Ok(Some(unit));
                }
            }
        }
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.buffer.consumed(n)?;
        self.garbage += n as u64;
        self.pending_garbage += n as u64;
        Ok(())
    }
}

/// Probe splitting an Annex B style byte stream at `00 00 01` start codes.
///
/// Units start with their start code and run up to the next one.
#[derive(Debug, Default)]
pub struct StartCodeSplitter {
    search_from: usize,
}

impl StartCodeSplitter {
    pub fn probe(&mut self, data: &[u8], state: ScanState) -> Probe {
        let prefix = start_code_len(data);
        if prefix == 0 {
            self.search_from = 0;
            // Zero bytes right before a start code belong to it
            let end = find_start_code(data, 0).unwrap_or(data.len());
            return match data[..end].iter().rposition(|&b| b != 0) {
                Some(last) => Probe::Skip(last + 1),
                None => Probe::NeedMore,
            };
        }

        match find_start_code(data, self.search_from.max(prefix)) {
            Some(end) => {
                self.search_from = 0;
                Probe::Found(end)
            }
            None if state.eos => {
                self.search_from = 0;
                Probe::Found(data.len())
            }
            None => {
                self.search_from = data.len().saturating_sub(3).max(prefix);
                Probe::NeedMore
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_skipped_with_forward_progress() -> Result<()> {
        // Units are `0xAA len payload...`
        let probe = |data: &[u8], _: ScanState| match data {
            [0xAA, len, ..] if data.len() >= *len as usize + 2 => Probe::Found(*len as usize + 2),
            [0xAA] | [0xAA, _, ..] => Probe::NeedMore,
            _ => Probe::Invalid,
        };

        let mut scanner = SyncScanner::default();
        scanner.add(&[0x00, 0x01, 0xAA, 0x02, 0x10]);
        assert!(scanner.next_unit(probe)?.is_none());
        assert_eq!(scanner.garbage(), 2);

        scanner.add(&[0x11, 0xFF, 0xAA, 0x00]);
        let unit = scanner.next_unit(probe)?.expect("first unit");
        assert_eq!(unit.data, vec![0xAA, 0x02, 0x10, 0x11]);
        assert_eq!(unit.stream_position, 2);
        assert_eq!(unit.garbage_before, 2);
        assert!(scanner.is_synced());

        let unit = scanner.next_unit(probe)?.expect("second unit");
        assert_eq!(unit.stream_position, 7);
        assert_eq!(unit.garbage_before, 1);
        assert_eq!(scanner.sync_losses(), 1);

        scanner.add(&[0xAA, 0x05, 0x00]);
        assert!(scanner.next_unit(probe)?.is_none());
        scanner.finish();
        assert!(scanner.next_unit(probe)?.is_none());
        assert_eq!(scanner.garbage(), 6);
        assert_eq!(scanner.position(), scanner.total_added());
        Ok(())
    }

    #[test]
    fn pure_garbage_terminates() -> Result<()> {
        let mut scanner = SyncScanner::default();
        let garbage: Vec<u8> = (0..10_000u32).map(|i| (i * 37 + 11) as u8).collect();
        scanner.add(&garbage);
        scanner.finish();

        let mut probes = 0;
        let unit = scanner.next_unit(|_, _| {
            probes += 1;
            Probe::Invalid
        })?;
        assert!(unit.is_none());
        assert_eq!(probes, garbage.len());
        assert_eq!(scanner.garbage(), garbage.len() as u64);
        Ok(())
    }

    #[test]
    fn start_code_units() -> Result<()> {
        let mut scanner = SyncScanner::default();
        let mut splitter = StartCodeSplitter::default();
        let data = [0xAB, 0x00, 0x00, 0x00, 0x01, 0x0F, 0x11, 0x00, 0x00, 0x01, 0x0D, 0x22];

        for &byte in &data {
            scanner.add(&[byte]);
        }
        let unit = scanner
            .next_unit(|d, s| splitter.probe(d, s))?
            .expect("first unit");
        assert_eq!(unit.data, vec![0x00, 0x00, 0x00, 0x01, 0x0F, 0x11]);
        assert_eq!(unit.garbage_before, 1);
        assert!(scanner.next_unit(|d, s| splitter.probe(d, s))?.is_none());

        scanner.finish();
        let unit = scanner
            .next_unit(|d, s| splitter.probe(d, s))?
            .expect("last unit");
        assert_eq!(unit.data, vec![0x00, 0x00, 0x01, 0x0D, 0x22]);
        assert_eq!(unit.stream_position, 7);
        Ok(())
    }
}
