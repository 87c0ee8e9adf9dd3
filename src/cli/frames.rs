use std::io::{self, BufWriter, Write};

use anyhow::Result;
use indicatif::MultiProgress;

use super::command::{Cli, FramesArgs, OutputFormat};
use super::stream::{FrameRecord, process_stream};

pub fn cmd_frames(args: &FramesArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Listing frames of {}", args.input.input.display());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let limit = args.limit.unwrap_or(usize::MAX);
    let mut written = 0;

    if args.format == OutputFormat::Plain {
        writeln!(
            out,
            "{:>7} {:6} {:>12} {:>8} {:3} {:18} {:>18} {:>18}",
            "index", "stream", "position", "size", "key", "type", "timestamp", "duration"
        )?;
    }

    let driver = process_stream(&args.input, cli, multi, |records| {
        for record in records {
            if written >= limit {
                return Ok(false);
            }
            write_record(&mut out, record, args.format)?;
            written += 1;
        }
        Ok(written < limit)
    })?;

    out.flush()?;
    log::info!(
        "{written} frames listed, {} garbage bytes",
        driver.garbage_size()
    );

    Ok(())
}

fn write_record<W: Write>(out: &mut W, record: &FrameRecord, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Plain => {
            let mut flags = String::new();
            if record.keyframe {
                flags.push('K');
            }
            if record.dependent {
                flags.push('D');
            }
            if record.incomplete {
                flags.push('!');
            }

            writeln!(
                out,
                "{:>7} {:6} {:>12} {:>8} {:3} {:18} {:>18} {:>18}",
                record.index,
                record.stream,
                record.position,
                record.size,
                flags,
                record.kind,
                record.timestamp.as_deref().unwrap_or("-"),
                record.duration.as_deref().unwrap_or("-"),
            )?;
        }
        // A one element sequence per record, concatenated into one YAML sequence
        OutputFormat::Yaml => {
            out.write_all(serde_yaml_ng::to_string(std::slice::from_ref(record))?.as_bytes())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use esparse::process::Frame;
    use esparse::process::vc1::Vc1Picture;
    use esparse::structs::timestamp::Timestamp;

    fn record(index: usize, incomplete: bool) -> FrameRecord {
        let mut frame = Frame::new(Vc1Picture::default(), vec![0; 100], 1000);
        frame.keyframe = true;
        frame.incomplete = incomplete;
        frame.timestamp = Some(Timestamp::from_secs(1));
        frame.duration = Some(Timestamp::from_ms(40));

        let mut record = FrameRecord::from_frame(&frame, "vc1");
        record.index = index;
        record
    }

    #[test]
    fn plain_lines() -> Result<()> {
        let mut out = Vec::new();
        write_record(&mut out, &record(3, true), OutputFormat::Plain)?;

        let line = String::from_utf8(out)?;
        assert!(line.starts_with("      3 vc1"));
        assert!(line.contains(" K! "));
        assert!(line.contains("00:00:01.000000000"));
        assert!(line.ends_with("00:00:00.040000000\n"));
        Ok(())
    }

    #[test]
    fn yaml_records_form_one_sequence() -> Result<()> {
        let mut out = Vec::new();
        write_record(&mut out, &record(0, false), OutputFormat::Yaml)?;
        write_record(&mut out, &record(1, false), OutputFormat::Yaml)?;

        let parsed: serde_yaml_ng::Value = serde_yaml_ng::from_str(std::str::from_utf8(&out)?)?;
        let sequence = parsed.as_sequence().expect("sequence");
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[1]["index"].as_u64(), Some(1));
        assert_eq!(sequence[0]["type"].as_str(), Some("I"));
        assert_eq!(sequence[0]["position"].as_u64(), Some(1000));
        Ok(())
    }
}
