use std::collections::VecDeque;

use anyhow::{Result, bail};
use log::trace;

use crate::structs::timestamp::{NS_PER_SECOND, Timestamp};
use crate::utils::errors::TimestampError;

/// Reconstructs a monotonic timeline from sporadic external timestamps and
/// known per-frame sample counts.
///
/// External timestamps are queued with [`add_timestamp`](Self::add_timestamp).
/// [`get_next_timestamp`](Self::get_next_timestamp) hands out the next queued
/// value once the caller has reached its stream position, otherwise it
/// extrapolates from the last reference point.
///
/// ```rust
/// use esparse::process::timestamp::TimestampCalculator;
/// use esparse::structs::timestamp::Timestamp;
///
/// let mut calc = TimestampCalculator::new(48000);
/// calc.add_timestamp(Timestamp::from_secs(10), None);
///
/// assert_eq!(calc.get_next_timestamp(1536, None), Timestamp::from_secs(10));
/// assert_eq!(calc.get_next_timestamp(1536, None), Timestamp::from_ms(10_032));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TimestampCalculator {
    samples_per_second: u64,
    available: VecDeque<(Timestamp, Option<u64>)>,
    reference: Timestamp,
    last_returned: Option<Timestamp>,
    samples_since_reference: u64,
    allow_smaller_timestamps: bool,
}

impl TimestampCalculator {
    pub fn new(samples_per_second: u64) -> Self {
        Self {
            samples_per_second,
            ..Default::default()
        }
    }

    pub fn samples_per_second(&self) -> u64 {
        self.samples_per_second
    }

    pub fn set_allow_smaller_timestamps(&mut self, allow: bool) {
        self.allow_smaller_timestamps = allow;
    }

    /// Queues an externally known timestamp. Values not strictly greater than
    /// both the last returned and the last queued timestamp are dropped.
    pub fn add_timestamp(&mut self, timestamp: Timestamp, stream_position: Option<u64>) {
        if !self.allow_smaller_timestamps {
            if self.last_returned.is_some_and(|last| timestamp <= last) {
                trace!("dropping timestamp {timestamp}: not after the last returned one");
                return;
            }

            if self
                .available
                .back()
                .is_some_and(|&(queued, _)| timestamp <= queued)
            {
                trace!("dropping timestamp {timestamp}: not after the last queued one");
                return;
            }
        }

        self.available.push_back((timestamp, stream_position));
    }

    pub fn queued(&self) -> usize {
        self.available.len()
    }

    pub fn get_next_timestamp(
        &mut self,
        samples_in_frame: u64,
        stream_position: Option<u64>,
    ) -> Timestamp {
        let use_queued = self.available.front().is_some_and(|&(_, queued_pos)| {
            match (queued_pos, stream_position) {
                (Some(queued_pos), Some(pos)) => queued_pos <= pos,
                _ => true,
            }
        });

        if use_queued {
            if let Some((timestamp, _)) = self.available.pop_front() {
                self.reference = timestamp;
                self.samples_since_reference = samples_in_frame;
                self.last_returned = Some(timestamp);

                trace!("using provided timestamp {timestamp}");
                return timestamp;
            }
        }

        let timestamp = self.reference + self.accrued();
        self.samples_since_reference += samples_in_frame;
        self.last_returned = Some(timestamp);

        trace!("extrapolated timestamp {timestamp}");
        timestamp
    }

    pub fn get_duration(&self, samples: u64) -> Result<Timestamp> {
        if self.samples_per_second == 0 {
            bail!(TimestampError::ZeroSampleRate);
        }

        Ok(self.samples_to_duration(samples))
    }

    /// Switches the extrapolation rate. The time accrued under the old rate
    /// moves into the reference point first.
    pub fn set_samples_per_second(&mut self, samples_per_second: u64) {
        if samples_per_second == 0 || samples_per_second == self.samples_per_second {
            return;
        }

        self.reference += self.accrued();
        self.samples_since_reference = 0;
        self.samples_per_second = samples_per_second;
    }

    fn accrued(&self) -> Timestamp {
        self.samples_to_duration(self.samples_since_reference)
    }

    fn samples_to_duration(&self, samples: u64) -> Timestamp {
        if self.samples_per_second == 0 {
            return Timestamp::ZERO;
        }

        let ns = samples as i128 * NS_PER_SECOND as i128 / self.samples_per_second as i128;
        Timestamp::from_ns(ns as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provided_timestamp_then_extrapolation() {
        let mut calc = TimestampCalculator::new(48000);
        calc.add_timestamp(Timestamp::from_secs(10), None);

        assert_eq!(calc.get_next_timestamp(0, None), Timestamp::from_secs(10));
        assert_eq!(calc.get_next_timestamp(48000, None), Timestamp::from_secs(10));
        assert_eq!(calc.get_next_timestamp(48000, None), Timestamp::from_secs(11));
    }

    #[test]
    fn extrapolation_is_exact() {
        let mut calc = TimestampCalculator::new(44100);
        calc.add_timestamp(Timestamp::from_ns(500), None);

        let mut expected_samples = 0u64;
        for k in 0..50u64 {
            let samples = 1000 + k * 7;
            let ts = calc.get_next_timestamp(samples, None);
            let expected = if k == 0 {
                500
            } else {
                500 + (expected_samples as i128 * 1_000_000_000 / 44100) as i64
            };
            assert_eq!(ts.ns(), expected);
            if k > 0 {
                expected_samples += samples;
            } else {
                expected_samples = samples;
            }
        }
    }

    #[test]
    fn timestamps_are_monotonic() {
        let mut calc = TimestampCalculator::new(48000);
        let mut last = Timestamp::from_ns(i64::MIN);

        for i in 0..200i64 {
            if i % 7 == 0 {
                calc.add_timestamp(Timestamp::from_ms(i * 30 - 100), None);
            }
            if i % 11 == 0 {
                calc.add_timestamp(Timestamp::from_ms(i * 35), None);
            }

            let ts = calc.get_next_timestamp(1536, None);
            assert!(ts >= last, "{ts} < {last}");
            last = ts;
        }
    }

    #[test]
    fn duplicates_and_older_timestamps_are_dropped() {
        let mut calc = TimestampCalculator::new(1000);
        calc.add_timestamp(Timestamp::from_ms(100), None);
        calc.add_timestamp(Timestamp::from_ms(100), None);
        calc.add_timestamp(Timestamp::from_ms(50), None);
        assert_eq!(calc.queued(), 1);

        assert_eq!(calc.get_next_timestamp(10, None), Timestamp::from_ms(100));
        calc.add_timestamp(Timestamp::from_ms(90), None);
        assert_eq!(calc.queued(), 0);

        calc.set_allow_smaller_timestamps(true);
        calc.add_timestamp(Timestamp::from_ms(90), None);
        assert_eq!(calc.get_next_timestamp(10, None), Timestamp::from_ms(90));
    }

    #[test]
    fn queued_timestamp_waits_for_stream_position() {
        let mut calc = TimestampCalculator::new(1000);
        calc.add_timestamp(Timestamp::from_ms(0), Some(0));
        calc.add_timestamp(Timestamp::from_ms(500), Some(300));

        assert_eq!(calc.get_next_timestamp(100, Some(0)), Timestamp::from_ms(0));
        assert_eq!(calc.get_next_timestamp(100, Some(100)), Timestamp::from_ms(100));
        assert_eq!(calc.get_next_timestamp(100, Some(200)), Timestamp::from_ms(200));
        assert_eq!(calc.get_next_timestamp(100, Some(300)), Timestamp::from_ms(500));
    }

    #[test]
    fn rate_switch_is_continuous() -> Result<()> {
        let mut calc = TimestampCalculator::new(48000);
        calc.add_timestamp(Timestamp::ZERO, None);

        assert_eq!(calc.get_next_timestamp(48000, None), Timestamp::ZERO);
        assert_eq!(calc.get_next_timestamp(24000, None), Timestamp::from_secs(1));

        calc.set_samples_per_second(96000);
        assert_eq!(calc.get_next_timestamp(96000, None), Timestamp::from_ms(1500));
        assert_eq!(calc.get_next_timestamp(0, None), Timestamp::from_ms(2500));
        assert_eq!(calc.get_duration(48000)?, Timestamp::from_ms(500));
        Ok(())
    }

    #[test]
    fn zero_rate_is_rejected() {
        let calc = TimestampCalculator::new(0);
        let err = calc.get_duration(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TimestampError>(),
            Some(TimestampError::ZeroSampleRate)
        ));
    }
}
