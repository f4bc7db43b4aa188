mod cli;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::info;

use audio2tonie::assembler::RawChapter;
use audio2tonie::audio::{AudioSource, ProgressEvent, ProgressSink};
use audio2tonie::ffmpeg::{FfmpegAudioDecoder, OpusencEncoder};
use audio2tonie::tonie_file::{self, TonieFile, TrackSource};
use audio2tonie::utils;

use crate::cli::{get_cli, Command};

/// Logs every progress event at `info`/`warn` as it arrives, per
/// `spec.md` §6. The CLI's concrete `ProgressSink`.
struct LoggingProgressSink;

impl ProgressSink for LoggingProgressSink {
    fn on_event(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::FileStart { track, path } => {
                info!("[{}] encoding {}", track, path.display())
            }
            ProgressEvent::Progress { fraction } => {
                log::debug!("progress: {:.0}%", fraction * 100.0)
            }
            ProgressEvent::FileDone => info!("chapter complete"),
            ProgressEvent::PostProcess { stage_name } => info!("post-processing: {}", stage_name),
            ProgressEvent::Warning { text } => log::warn!("{}", text),
            ProgressEvent::Failed { text } => log::error!("{}", text),
        }
    }
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = get_cli();

    match cli.command {
        Command::Convert {
            input,
            output,
            audio_id,
            bitrate,
            cbr,
            ffmpeg,
            opusenc,
            prefix_dir,
        } => run_convert(input, output, audio_id, bitrate, cbr, ffmpeg, opusenc, prefix_dir)?,
        Command::Extract { input, output } => run_extract(input, output)?,
        Command::Info { input } => {
            let ok = run_info(input)?;
            std::process::exit(if ok { 0 } else { 1 });
        }
        Command::Split { input, output } => run_split(input, output)?,
        Command::Modify {
            input,
            output,
            append,
            reorder,
            ffmpeg,
            opusenc,
        } => run_modify(input, output, append, reorder, ffmpeg, opusenc)?,
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_convert(
    input: PathBuf,
    output: PathBuf,
    audio_id: u32,
    bitrate: u32,
    cbr: bool,
    ffmpeg_bin: String,
    opusenc_bin: String,
    prefix_dir: Option<PathBuf>,
) -> Result<()> {
    let sources: Vec<AudioSource> = if let Some(dir) = &prefix_dir {
        let mut found = Vec::new();
        let mut track = 1usize;
        loop {
            match tonie_file::resolve_prefixed_source(dir, track) {
                Ok(source) => found.push(source),
                Err(_) if track > 1 => break,
                Err(err) => return Err(err.into()),
            }
            track += 1;
        }
        found
    } else {
        utils::discover_sources(&input)?
            .into_iter()
            .map(AudioSource::new)
            .collect()
    };

    let mut decoder = FfmpegAudioDecoder::new(ffmpeg_bin);
    let mut opus_encoder = OpusencEncoder::new(opusenc_bin, bitrate, cbr);
    let mut progress = LoggingProgressSink;

    let file = TonieFile::build_from_sources(
        &sources,
        audio_id,
        &mut decoder,
        &mut opus_encoder,
        &mut progress,
        now_unix(),
    )?;

    fs::write(&output, file.to_bytes()?)
        .with_context(|| format!("writing output file {}", output.display()))?;
    info!("wrote {} ({} chapters)", output.display(), file.header.audio_chapters.len());
    Ok(())
}

fn run_extract(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let bytes = fs::read(&input)?;
    let file = TonieFile::read(&bytes)?;
    let out_dir = output.unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&out_dir)?;

    if file.header.audio_chapters.len() <= 1 {
        let dest = out_dir.join(single_output_name(&input));
        let mut writer = fs::File::create(&dest)?;
        file.dump_all_as_single_ogg(&mut writer)?;
        info!("wrote {}", dest.display());
    } else {
        for index in 0..file.header.audio_chapters.len() {
            let dest = out_dir.join(format!("{:02}.ogg", index + 1));
            let mut writer = fs::File::create(&dest)?;
            file.extract_chapter_to_ogg(index, &mut writer)?;
            info!("wrote {}", dest.display());
        }
    }
    Ok(())
}

fn run_split(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    run_extract(input, output)
}

fn run_info(input: PathBuf) -> Result<bool> {
    let bytes = fs::read(&input)?;
    let file = TonieFile::read(&bytes)?;

    println!("audio_id:        {:#010x}", file.header.audio_id);
    println!("audio_length:    {} bytes", file.header.audio_length);
    println!("chapters:        {:?}", file.header.audio_chapters);
    println!("usable:          {}", file.header.usable);
    println!("hash_correct:    {}", file.hash_correct);
    if let Some(stats) = &file.statistics {
        println!(
            "segments:        min {} max {}",
            stats.min_segments, stats.max_segments
        );
        println!(
            "granule delta:   min {} max {}",
            stats.min_granule_delta, stats.max_granule_delta
        );
        println!("highest granule: {}", stats.highest_granule);
    }

    Ok(file.hash_correct)
}

fn run_modify(
    input: PathBuf,
    output: PathBuf,
    append: Vec<PathBuf>,
    reorder: Option<String>,
    ffmpeg_bin: String,
    opusenc_bin: String,
) -> Result<()> {
    let bytes = fs::read(&input)?;
    let original = TonieFile::read(&bytes)?;
    let audio_id = original.header.audio_id;
    let mut chapters = original.extract_raw_chapters()?;

    if let Some(spec) = reorder {
        let indices = utils::parse_reorder_indices(&spec)?;
        if indices.len() != chapters.len() {
            return Err(anyhow!(
                "--reorder names {} indices but the file has {} chapters",
                indices.len(),
                chapters.len()
            ));
        }
        let mut reordered = Vec::with_capacity(chapters.len());
        for &index in &indices {
            let chapter = chapters
                .get(index)
                .ok_or_else(|| anyhow!("reorder index {} out of range", index))?;
            reordered.push(RawChapter {
                bytes: chapter.bytes.clone(),
            });
        }
        chapters = reordered;
    }

    let mut tracks: Vec<TrackSource> = chapters.into_iter().map(TrackSource::Raw).collect();
    for path in append {
        tracks.push(TrackSource::Path(AudioSource::new(path)));
    }

    let mut decoder = FfmpegAudioDecoder::new(ffmpeg_bin);
    let mut opus_encoder = OpusencEncoder::new(opusenc_bin, 96_000, true);
    let mut progress = LoggingProgressSink;

    let modified = TonieFile::build_mixed(
        tracks,
        Some(&original.body),
        audio_id,
        &mut decoder,
        &mut opus_encoder,
        &mut progress,
        now_unix(),
    )?;

    fs::write(&output, modified.to_bytes()?)
        .with_context(|| format!("writing output file {}", output.display()))?;
    info!(
        "wrote {} ({} chapters)",
        output.display(),
        modified.header.audio_chapters.len()
    );
    Ok(())
}

fn single_output_name(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| format!("{}.ogg", stem))
        .unwrap_or_else(|| "output.ogg".to_string())
}
