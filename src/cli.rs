use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vttsource")]
#[command(author, version, about = "WebVTT-in-MP4 inspection and buffering tool")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the box tree of a file
    Dump {
        /// File to dump
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Print the cues of an encoded WebVTT sample
    Decode {
        /// Sample file
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode cues from a JSON array into a WebVTT sample
    Encode {
        /// JSON file holding an array of cues
        #[arg(required = true)]
        cues: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Write an init segment and one media segment instead of a bare sample
        #[arg(long)]
        segment: bool,

        /// Media timescale used with --segment
        #[arg(long, default_value = "1000")]
        timescale: u32,
    },

    /// Push a segment file through a media source and print what is buffered
    Replay {
        /// Segment file (init segment followed by media segments)
        #[arg(required = true)]
        file: PathBuf,

        /// Append in chunks of this many bytes
        #[arg(long)]
        chunk: Option<usize>,

        /// Timestamp offset in seconds
        #[arg(long)]
        offset: Option<f64>,

        /// Append window start in seconds
        #[arg(long)]
        window_start: Option<f64>,

        /// Append window end in seconds
        #[arg(long)]
        window_end: Option<f64>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
