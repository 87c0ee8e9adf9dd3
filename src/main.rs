use std::io::Write;

use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::frames::cmd_frames;
use cli::info::cmd_info;

mod cli;
mod input;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = MultiProgress::new();

    let progress = init_logging(&cli, &multi)?;

    match &cli.command {
        Commands::Info(args) => cmd_info(args, &cli, progress),
        Commands::Frames(args) => cmd_frames(args, &cli, progress),
    }
}

/// Installs the logger. With `--progress` log lines are routed through the
/// progress bars so they do not tear them apart.
fn init_logging<'a>(cli: &Cli, multi: &'a MultiProgress) -> Result<Option<&'a MultiProgress>> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(cli.loglevel.to_level_filter());

    match cli.log_format {
        LogFormat::Plain => {
            builder.format_timestamp_secs();
        }
        // One object per line; `msg` goes through Debug to get a quoted, escaped string
        LogFormat::Json => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{{\"ts\":\"{}\",\"lvl\":\"{}\",\"target\":\"{}\",\"msg\":{:?}}}",
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    record.args().to_string()
                )
            });
        }
    }

    if !cli.progress {
        builder.try_init()?;
        return Ok(None);
    }

    LogWrapper::new(multi.clone(), builder.build()).try_init()?;
    Ok(Some(multi))
}
