//! KnowCast CLI - Podcast Audio Assembly
//!
//! Renders a `[Speaker]: text` script into a single podcast audio file.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use knowcast_core::export::{
    companion_path, generate_output_filename, write_asset, write_metadata, write_segments,
    write_transcript,
};
use knowcast_core::service::elevenlabs::ElevenLabsService;
use knowcast_core::service::mock::MockSpeechService;
use knowcast_core::{
    Config, FailedRun, PipelineCallback, PipelineEvent, PipelineStep, PodcastAsset,
    PodcastPipeline, RetryPolicy, RunOutcome, SpeechService, available_styles, default_config,
    get_style,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const API_KEY_VAR: &str = "ELEVENLABS_API_KEY";

#[derive(Parser)]
#[command(
    name = "knowcast",
    version,
    about = "KnowCast - turn a two-host script into a podcast",
    long_about = "Synthesizes each turn of a `[Speaker]: text` script with a text-to-speech service and splices the audio into one WAV file."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Render a script into a podcast
    Render {
        /// Script file, one `[Speaker]: text` line per turn
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Output WAV file (defaults to a name derived from the script)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Use a built-in speaker line-up instead of configured voices
        #[arg(long, value_name = "STYLE")]
        style: Option<String>,

        /// Speech engine: elevenlabs or kokoro
        #[arg(long, default_value = "elevenlabs", value_name = "ENGINE")]
        engine: String,

        /// Synthesis calls in flight at once
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Use a generated tone instead of a speech service
        #[arg(long)]
        dry_run: bool,
    },

    /// List voices offered by the speech engine
    Voices {
        /// TOML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Speech engine: elevenlabs or kokoro
        #[arg(long, default_value = "elevenlabs", value_name = "ENGINE")]
        engine: String,
    },

    /// List built-in podcast styles and their speakers
    Styles,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render {
            script,
            output,
            config,
            style,
            engine,
            concurrency,
            dry_run,
        } => {
            let config = load_config(config.as_deref(), style.as_deref())?;
            let output = output.unwrap_or_else(|| default_output(&script));
            let succeeded = render(
                &script,
                &output,
                &config,
                &engine,
                concurrency,
                dry_run,
            )
            .await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Command::Voices { config, engine } => {
            let config = load_config(config.as_deref(), None)?;
            list_voices(&config, &engine).await?;
        }
        Command::Styles => list_styles(),
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "knowcast=debug,knowcast_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, style: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };

    match style {
        Some(name) => {
            let style = get_style(name).ok_or_else(|| {
                format!(
                    "Unknown style: '{}'. Available styles: {}",
                    name,
                    available_styles().join(", ")
                )
            })?;
            Ok(config.with_style(style))
        }
        None => Ok(config),
    }
}

fn default_output(script: &Path) -> PathBuf {
    let title = script
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_default();
    PathBuf::from(generate_output_filename(&title))
}

async fn build_service(
    config: &Config,
    engine: &str,
) -> Result<Arc<dyn SpeechService>, Box<dyn std::error::Error>> {
    match engine {
        "elevenlabs" => {
            let api_key = env::var(API_KEY_VAR)
                .map_err(|_| format!("{} is not set. Add it to your environment or .env file.", API_KEY_VAR))?;
            Ok(Arc::new(ElevenLabsService::new(&config.service, api_key)?))
        }
        #[cfg(feature = "kokoro")]
        "kokoro" => {
            let service = knowcast_core::service::kokoro::KokoroService::new().await?;
            Ok(Arc::new(service))
        }
        #[cfg(not(feature = "kokoro"))]
        "kokoro" => Err("This build does not include kokoro; rebuild with --features kokoro".into()),
        other => Err(format!("Unknown engine: '{}'. Available engines: elevenlabs, kokoro", other).into()),
    }
}

async fn render(
    script_path: &Path,
    output: &Path,
    config: &Config,
    engine: &str,
    concurrency: Option<usize>,
    dry_run: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let script = std::fs::read_to_string(script_path)
        .map_err(|e| format!("Failed to read script '{}': {}", script_path.display(), e))?;

    let registry = Arc::new(config.voice_registry()?);
    let service: Arc<dyn SpeechService> = if dry_run {
        Arc::new(MockSpeechService::default())
    } else {
        build_service(config, engine).await?
    };

    print_header(script_path, output, config, service.name());

    let mut pipeline =
        PodcastPipeline::new(registry, service, config).with_callback(create_console_callback());
    if dry_run {
        pipeline = pipeline.with_retry_policy(RetryPolicy::immediate(config.retry.max_attempts));
    }
    if let Some(n) = concurrency {
        pipeline = pipeline.with_max_concurrency(n);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    match pipeline.run_with_cancel(&script, cancel).await {
        RunOutcome::Complete(asset) => {
            save_asset(output, &asset)?;
            Ok(true)
        }
        RunOutcome::Failed(failed) => {
            save_partial(output, &failed)?;
            Ok(false)
        }
    }
}

fn print_header(script: &Path, output: &Path, config: &Config, service: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "KnowCast".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Script:".bold(), script.display().to_string().bright_white());
    println!("{} {}", "Output:".bold(), output.display().to_string().bright_white());
    println!("{} {}", "Engine:".bold(), service.yellow());
    println!();
    println!("{}", "Voices:".bold());
    for (speaker, voice) in &config.voices {
        println!("  {} → {}", speaker.bright_cyan(), voice.voice_id.dimmed());
    }
    if let Some(fallback) = &config.fallback_voice {
        println!("  {} → {}", "(fallback)".bright_cyan(), fallback.voice_id.dimmed());
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

/// Create a callback that prints pipeline events to the console.
fn create_console_callback() -> PipelineCallback {
    Box::new(move |event| match event {
        PipelineEvent::Progress {
            step,
            percent_complete,
        } => match step {
            PipelineStep::Synthesizing { completed, total } if completed > 0 => {
                println!(
                    "  {} {}/{}",
                    format!("[{:>3.0}%]", percent_complete).bright_blue(),
                    completed,
                    total
                );
            }
            PipelineStep::Failed => println!("{} {}", "✗".red(), step.to_string().red().bold()),
            _ => println!("{} {}", "▶".bright_cyan(), step.to_string().bright_cyan().bold()),
        },
        PipelineEvent::SegmentReady {
            order,
            speaker,
            attempts,
            duration_seconds,
        } => {
            let retries = if attempts > 1 {
                format!(" after {} attempts", attempts).yellow().to_string()
            } else {
                String::new()
            };
            println!(
                "  {} turn {} {} ({:.1}s){}",
                "✓".green(),
                order,
                speaker.bright_cyan(),
                duration_seconds,
                retries
            );
        }
        PipelineEvent::Retrying(notice) => {
            println!(
                "  {}",
                format!(
                    "[Retry {}] turn {} ({}): {}; waiting {:.1}s",
                    notice.attempt,
                    notice.order,
                    notice.speaker,
                    notice.reason,
                    notice.delay.as_secs_f64()
                )
                .yellow()
            );
        }
    })
}

fn save_asset(output: &Path, asset: &PodcastAsset) -> Result<(), Box<dyn std::error::Error>> {
    write_asset(output, asset)?;
    let transcript = companion_path(output, "txt");
    write_transcript(&transcript, &asset.transcript)?;
    let metadata = companion_path(output, "json");
    write_metadata(&metadata, asset)?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!(
            "  Podcast ready: {} segments, {:.1}s at {} Hz",
            asset.segments.len(),
            asset.total_duration_seconds,
            asset.sample_rate
        )
        .bright_green()
        .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!("  {} {}", "Audio:".bold(), output.display());
    println!("  {} {}", "Transcript:".bold(), transcript.display());
    println!("  {} {}", "Timing:".bold(), metadata.display());
    println!();
    Ok(())
}

fn save_partial(output: &Path, failed: &FailedRun) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    eprintln!("{} {}", "Error:".red().bold(), failed.error);
    eprintln!("  {} {}", "Failed during:".bold(), failed.failed_at);
    if let Some(order) = failed.error.turn_order() {
        eprintln!("  {} {}", "Turn:".bold(), order);
    }
    if let Some(attempts) = failed.error.attempts() {
        eprintln!("  {} {}", "Attempts:".bold(), attempts);
    }

    if failed.segments.is_empty() {
        return Ok(());
    }

    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "knowcast".to_string());
    let dir = output.with_file_name(format!("{} segments", stem));
    let paths = write_segments(&dir, &failed.segments)?;
    write_transcript(&dir.join("transcript.txt"), &failed.transcript)?;

    let status = if failed.has_all_segments() {
        "All segments were synthesized; they are available individually".to_string()
    } else {
        format!(
            "{} of {} segments were synthesized and saved",
            failed.segments.len(),
            failed.expected_segments
        )
    };
    eprintln!();
    eprintln!("{}", status.yellow());
    for path in paths {
        eprintln!("  {}", path.display());
    }
    Ok(())
}

async fn list_voices(config: &Config, engine: &str) -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service(config, engine).await?;
    let mut voices = service.list_voices().await?;
    voices.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{}", format!("Voices available from {}:", service.name()).bold());
    for voice in voices {
        let category = voice
            .category
            .map(|c| format!(" [{}]", c))
            .unwrap_or_default();
        println!(
            "  {} {}{}",
            voice.name.bright_cyan(),
            voice.voice_id.dimmed(),
            category.yellow()
        );
    }
    Ok(())
}

fn list_styles() {
    for name in available_styles() {
        let Some(style) = get_style(name) else {
            continue;
        };
        println!("{} {}", name.bright_cyan().bold(), style.display_name().dimmed());
        for speaker in style.speakers() {
            println!(
                "  {} ({}) - {} {}",
                speaker.name.bold(),
                speaker.role.yellow(),
                speaker.personality,
                speaker.voice_id.dimmed()
            );
        }
        println!();
    }
}
