use anyhow::Result;
use indicatif::MultiProgress;

use esparse::structs::timestamp::Timestamp;

use super::command::{Cli, InfoArgs};
use super::stream::{FrameRecord, process_stream};

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing stream: {}", args.input.input.display());

    let mut stats: Vec<StreamStats> = Vec::new();
    let driver = process_stream(&args.input, cli, multi, |records| {
        for record in records {
            match stats.iter_mut().find(|s| s.stream == record.stream) {
                Some(stream_stats) => stream_stats.add(record),
                None => {
                    let mut stream_stats = StreamStats::new(record.stream);
                    stream_stats.add(record);
                    stats.push(stream_stats);
                }
            }
        }
        Ok(true)
    })?;

    if stats.is_empty() {
        println!("No frames found in the input.");
        println!("This doesn't appear to be a valid {:?} stream.", args.input.codec()?);
        return Ok(());
    }

    println!();
    println!("Stream Information");
    println!("==================");
    println!();

    let parameters = driver.parameters();
    if !parameters.is_empty() {
        println!("Stream Parameters");
        for (name, value) in parameters {
            println!("  {name:26}{value}");
        }
        println!();
    }

    for stream_stats in &stats {
        display_stream_stats(stream_stats);
    }

    println!("  Garbage bytes             {}", driver.garbage_size());
    println!();

    Ok(())
}

#[derive(Debug)]
struct StreamStats {
    stream: &'static str,
    frames: usize,
    keyframes: usize,
    incomplete: usize,
    bytes: u64,
    first_timestamp: Option<Timestamp>,
    end: Option<Timestamp>,
}

impl StreamStats {
    fn new(stream: &'static str) -> Self {
        Self {
            stream,
            frames: 0,
            keyframes: 0,
            incomplete: 0,
            bytes: 0,
            first_timestamp: None,
            end: None,
        }
    }

    fn add(&mut self, record: &FrameRecord) {
        self.frames += 1;
        self.keyframes += record.keyframe as usize;
        self.incomplete += record.incomplete as usize;
        self.bytes += record.size as u64;

        if let (Some(start), Some(end)) = (record.start, record.end) {
            self.first_timestamp = Some(self.first_timestamp.map_or(start, |t| t.min(start)));
            self.end = Some(self.end.map_or(end, |e| e.max(end)));
        }
    }

    fn duration(&self) -> Option<Timestamp> {
        Some(self.end? - self.first_timestamp?)
    }
}

fn display_stream_stats(stats: &StreamStats) {
    println!("Analysis Summary ({})", stats.stream);
    println!("  Frames processed          {}", stats.frames);
    println!("  Keyframes                 {}", stats.keyframes);
    if stats.incomplete > 0 {
        println!("  Incomplete frames         {}", stats.incomplete);
    }

    let size_mb = stats.bytes as f64 / 1_000_000.0;
    println!("  Size                      {size_mb:.2} MB ({} bytes)", stats.bytes);

    if let Some(duration) = stats.duration() {
        println!("  Duration                  {duration}");

        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            let avg_data_rate_kbps = (stats.bytes as f64 * 8.0) / (secs * 1000.0);
            println!("  Average data rate         {avg_data_rate_kbps:.1} kbps");
        }
    }

    println!();
}
