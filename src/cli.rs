use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::analysis::ChunkOverlap;

#[derive(Parser, Debug)]
#[command(name = "bpmscan", about = "Neural tempo (BPM) estimation for audio files")]
pub struct Cli {
    /// Audio files or directories to scan (WAV, MP3, FLAC)
    pub inputs: Vec<PathBuf>,

    /// Directory to scan recursively for audio files
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Directory holding bundled .onnx models
    #[arg(long)]
    pub resources: Option<PathBuf>,

    /// Model file path, or "default" for the first model in the resources directory
    #[arg(short, long, default_value = "default")]
    pub model: String,

    /// GPU adapter index for the DirectML execution provider
    #[arg(long)]
    pub device: Option<i32>,

    /// Stop after this many files (0 = no limit)
    #[arg(long, default_value_t = 0)]
    pub max_files: usize,

    /// Skip files longer than this many minutes (0 = no limit)
    #[arg(long, default_value_t = 0.0)]
    pub max_duration: f64,

    /// How overlapping chunk activations are joined
    #[arg(long, value_enum, default_value_t = ChunkOverlap::Append)]
    pub overlap: ChunkOverlap,

    /// Result output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Path to config file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List available models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["bpmscan", "song.mp3"]);
        assert_eq!(cli.inputs, vec![PathBuf::from("song.mp3")]);
        assert_eq!(cli.model, "default");
        assert_eq!(cli.max_files, 0);
        assert_eq!(cli.overlap, ChunkOverlap::Append);
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.list_models);
    }

    #[test]
    fn parses_enums_and_limits() {
        let cli = Cli::parse_from([
            "bpmscan",
            "--directory",
            "music",
            "--overlap",
            "trim",
            "--format",
            "json",
            "--max-files",
            "3",
            "--max-duration",
            "7.5",
            "--device",
            "1",
        ]);
        assert!(cli.inputs.is_empty());
        assert_eq!(cli.directory, Some(PathBuf::from("music")));
        assert_eq!(cli.overlap, ChunkOverlap::Trim);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.max_files, 3);
        assert_eq!(cli.max_duration, 7.5);
        assert_eq!(cli.device, Some(1));
    }

    #[test]
    fn rejects_unknown_overlap() {
        assert!(Cli::try_parse_from(["bpmscan", "--overlap", "blend"]).is_err());
    }
}
