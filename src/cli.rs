//! CLI surface. Keeps the teacher's derive-based `clap` shape and its
//! `Extract`/`Convert` command pair, completing the `Info` command the
//! teacher's own `main.rs` already names but never wires up, and adding
//! `Split`/`Modify` for the lossless-assembly operations `spec.md` §4.7
//! exposes as library calls only (`SPEC_FULL.md` §D).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "Convert a single audio file or a directory of audio files into a Toniebox compatible audio file.")]
    Convert {
        #[arg(required = true, help = "The input audio file or a directory of files.", value_parser = validate_path_exists)]
        input: PathBuf,
        #[arg(default_value = "500304E0", help = "The output Tonie file.")]
        output: PathBuf,
        #[arg(long, default_value_t = 0, help = "Explicit audio_id; 0 derives one from the current timestamp.")]
        audio_id: u32,
        #[arg(long, default_value_t = 96_000, help = "Opus bitrate in bits/second.")]
        bitrate: u32,
        #[arg(long, default_value_t = true, help = "Use constant bitrate (required for determinism).")]
        cbr: bool,
        #[arg(long, default_value = "ffmpeg", help = "Path to the ffmpeg executable.")]
        ffmpeg: String,
        #[arg(long, default_value = "opusenc", help = "Path to the opusenc executable.")]
        opusenc: String,
        #[arg(long, help = "Directory holding prefix-numbered track files (0001.mp3, 0002.mp3, ...).")]
        prefix_dir: Option<PathBuf>,
    },

    #[command(about = "Extract the audio content from a Tonie file and save it as Ogg Opus file(s).")]
    Extract {
        #[arg(required = true, help = "The input audio file in Tonie format.", value_parser = validate_file_path)]
        input: PathBuf,
        #[arg(help = "The output directory for saving the extracted audio content in.", value_parser = validate_directory_path)]
        output: Option<PathBuf>,
    },

    #[command(about = "Validate a Tonie file's header and body invariants without extracting it.")]
    Info {
        #[arg(required = true, value_parser = validate_file_path)]
        input: PathBuf,
    },

    #[command(about = "Split a Tonie file into one standalone .ogg per chapter.")]
    Split {
        #[arg(required = true, value_parser = validate_file_path)]
        input: PathBuf,
        #[arg(value_parser = validate_directory_path)]
        output: Option<PathBuf>,
    },

    #[command(about = "Losslessly append and/or reorder the chapters of an existing Tonie file.")]
    Modify {
        #[arg(required = true, value_parser = validate_file_path)]
        input: PathBuf,
        #[arg(required = true, help = "Output file to write the modified Tonie file to.")]
        output: PathBuf,
        #[arg(long, value_delimiter = ',', help = "Audio files to encode and append as new trailing chapters.")]
        append: Vec<PathBuf>,
        #[arg(long, help = "Comma-separated chapter indices giving the new chapter order, applied before any --append.")]
        reorder: Option<String>,
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: String,
        #[arg(long, default_value = "opusenc")]
        opusenc: String,
    },
}

fn validate_file_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() && path.is_file() {
        Ok(path)
    } else {
        Err(format!("The file '{}' does not exist or is not a file.", s))
    }
}

fn validate_directory_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("The path '{}' does not exist.", s))
    }
}

fn validate_path_exists(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("The path '{}' does not exist.", s))
    }
}

pub fn get_cli() -> Cli {
    Cli::parse()
}
