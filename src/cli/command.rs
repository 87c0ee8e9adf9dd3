use std::path::{Path, PathBuf};

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = env!("ESDEMUX_LONG_VERSION"),
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for inspecting elementary audio and video streams frame by frame",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Fail on the first frame that could not be assembled completely.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print stream information
    Info(InfoArgs),

    /// List every frame of the stream.
    Frames(FramesArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input elementary stream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Stream codec. Detected from the file extension when omitted.
    #[arg(long, value_enum)]
    pub codec: Option<Codec>,

    /// Dolby Vision enhancement layer stream, combined with an HEVC base layer.
    #[arg(long, value_name = "PATH")]
    pub enhancement_layer: Option<PathBuf>,

    /// Size of the length prefix written in front of every NAL unit (1-4).
    #[arg(long, value_name = "BYTES", default_value_t = 4)]
    pub nalu_size_length: u8,

    /// Frame duration in milliseconds for video streams without timing information.
    #[arg(long, value_name = "MS")]
    pub default_duration: Option<f64>,

    /// Undo 16-bit word swapping of AC-3 input (WAV/IEC 61937 payloads).
    #[arg(long)]
    pub byte_swapped: bool,
}

impl InputArgs {
    pub fn codec(&self) -> anyhow::Result<Codec> {
        match self.codec.or_else(|| Codec::from_path(&self.input)) {
            Some(codec) => Ok(codec),
            None => anyhow::bail!(
                "Cannot detect the codec of {}, use --codec",
                self.input.display()
            ),
        }
    }
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct FramesArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output format for frame records.
    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    pub format: OutputFormat,

    /// Stop after this many frames.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Codec {
    /// AC-3 and E-AC-3.
    Ac3,
    /// Dolby TrueHD / MLP, embedded AC-3 is listed separately.
    Truehd,
    /// AV1 low overhead bitstream format.
    Av1,
    /// H.264 Annex B.
    Avc,
    /// H.265 Annex B.
    Hevc,
    /// VC-1 advanced profile.
    Vc1,
}

impl Codec {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Some(match ext.as_str() {
            "ac3" | "eac3" | "ec3" | "eb3" => Self::Ac3,
            "thd" | "mlp" | "truehd" => Self::Truehd,
            "obu" | "av1" => Self::Av1,
            "h264" | "264" | "avc" | "x264" => Self::Avc,
            "h265" | "265" | "hevc" | "x265" => Self::Hevc,
            "vc1" => Self::Vc1,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// One aligned line per frame.
    Plain,
    /// A YAML sequence of frame records.
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_from_extension() {
        assert_eq!(Codec::from_path(Path::new("a/b.EC3")), Some(Codec::Ac3));
        assert_eq!(Codec::from_path(Path::new("movie.thd")), Some(Codec::Truehd));
        assert_eq!(Codec::from_path(Path::new("x.h265")), Some(Codec::Hevc));
        assert_eq!(Codec::from_path(Path::new("x.vc1")), Some(Codec::Vc1));
        assert_eq!(Codec::from_path(Path::new("x.mkv")), None);
        assert_eq!(Codec::from_path(Path::new("-")), None);
    }

    #[test]
    fn frames_command_line() {
        let cli = Cli::try_parse_from([
            "esdemux",
            "--loglevel",
            "debug",
            "frames",
            "bl.hevc",
            "--enhancement-layer",
            "el.hevc",
            "--format",
            "yaml",
        ])
        .expect("valid command line");

        let Commands::Frames(args) = cli.command else {
            panic!("frames subcommand expected");
        };
        assert_eq!(args.format, OutputFormat::Yaml);
        assert_eq!(args.input.codec().ok(), Some(Codec::Hevc));
        assert_eq!(args.input.enhancement_layer, Some(PathBuf::from("el.hevc")));
        assert_eq!(args.input.nalu_size_length, 4);
    }
}
