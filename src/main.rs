use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sublingo::config::Config;
use sublingo::media;
use sublingo::providers;
use sublingo::srt::SubtitlePolicy;
use sublingo::task::{self, TaskRegistry, TaskRequest, TaskSource, TaskStatus};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sublingo")]
#[command(version, about = "Aligned, translated, and re-voiced subtitles from long-form media")]
struct Cli {
    /// Video URL, local media file, or word-timed .vtt captions
    input: String,

    /// Source language code (e.g. en, zh_cn, ja)
    #[arg(short = 's', long, default_value = "en")]
    source_lang: String,

    /// Target language code, or "none" to skip translation
    #[arg(short = 't', long, default_value = "none")]
    target_lang: String,

    /// Output layout: origin-only, target-only, bilingual-top, bilingual-bottom
    #[arg(long)]
    layout: Option<String>,

    /// Remove filler words and hesitations during translation
    #[arg(long)]
    modal_filter: bool,

    /// Produce a dubbed audio track from the translated subtitles
    #[arg(long)]
    tts: bool,

    /// Voice identifier for dubbing
    #[arg(long, default_value = "alloy")]
    tts_voice: String,

    /// Word replacement applied to emitted files, as "before|after" (repeatable)
    #[arg(long = "replace")]
    replace: Vec<String>,

    /// Words per short-origin fragment line
    #[arg(long)]
    words_per_line: Option<usize>,

    /// UI language for artifact names (en or zh)
    #[arg(long, default_value = "en")]
    ui_language: String,

    /// Directory that holds per-task workspaces
    #[arg(long, default_value = "./tasks")]
    tasks_root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    let source = TaskSource::parse(&cli.input);
    if !matches!(source, TaskSource::WordTimedVtt(_)) {
        media::check_ffmpeg(&config.ffmpeg_path)
            .context("ffmpeg not found. Install it with: apt install ffmpeg (Linux) or brew install ffmpeg (macOS)")?;
        media::check_ffprobe(&config.ffprobe_path).context("ffprobe not found")?;
    }

    let policy = match &cli.layout {
        Some(layout) => layout
            .parse::<SubtitlePolicy>()
            .map_err(|e| anyhow::anyhow!(e))?,
        None => TaskRequest::resolve_policy(&cli.target_lang, cli.target_lang != "none", false),
    };

    let request = TaskRequest {
        source,
        origin_lang: cli.source_lang.clone(),
        target_lang: cli.target_lang.clone(),
        policy,
        modal_filter: cli.modal_filter,
        enable_tts: cli.tts,
        tts_voice: cli.tts_voice.clone(),
        replace: task::parse_replace_pairs(&cli.replace),
        ui_language: cli.ui_language.clone(),
        words_per_line: cli.words_per_line.unwrap_or(config.words_per_line),
    };

    info!(
        input = %cli.input,
        source = %cli.source_lang,
        target = %cli.target_lang,
        %policy,
        "starting subtitle task"
    );

    let providers = providers::build_providers(&config)?;
    let registry = TaskRegistry::new();
    let task_id = task::start_task(&registry, config, providers, request, &cli.tasks_root)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            if interrupted.load(Ordering::Relaxed) {
                std::process::exit(1);
            }
            eprintln!("\nInterrupted; exiting after the current task aborts (press again to force quit)");
            interrupted.store(true, Ordering::Relaxed);
        })
        .ok();
    }

    let bar = if cli.quiet {
        None
    } else {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(bar)
    };

    // Poll the registry the way an HTTP status endpoint would.
    let record = loop {
        if interrupted.load(Ordering::Relaxed) {
            anyhow::bail!("interrupted");
        }
        let Some(record) = registry.get(&task_id) else {
            anyhow::bail!("task disappeared from the registry");
        };
        if let Some(bar) = &bar {
            bar.set_position(record.process_pct as u64);
        }
        if record.status.is_terminal() {
            break record;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    match record.status {
        TaskStatus::Success => {
            println!();
            println!("Task {} complete.", record.id);
            if !record.title.is_empty() {
                println!("  Title: {}", record.title.trim());
                if !record.translated_title.is_empty() {
                    println!("  Translated title: {}", record.translated_title.trim());
                }
            }
            println!("  Subtitles:");
            for info in &record.subtitle_infos {
                println!("    {} -> {}", info.name, info.path.display());
            }
            if let Some(speech) = &record.speech_path {
                println!("  Dubbed speech: {}", speech.display());
            }
            Ok(())
        }
        _ => {
            let reason = record
                .fail_reason
                .unwrap_or_else(|| "unknown failure".to_string());
            error!(task = %record.id, reason = %reason, "task failed");
            anyhow::bail!("task {} failed: {reason}", record.id)
        }
    }
}
