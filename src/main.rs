use anyhow::{Context, Result};
use chunkscribe::config::{Config, StorageBackend};
use chunkscribe::media::{check_ffmpeg, check_ffprobe};
use chunkscribe::orchestrator::{JobOutcome, JobReport, Orchestrator};
use chunkscribe::progress::{BarProgress, LogProgress, ProgressObserver};
use chunkscribe::refine::{create_refiner, refine_transcript, RefineTask, DEFAULT_BATCH_CHARS};
use chunkscribe::transcribe::WhisperModel;
use chunkscribe::ScribeError;
use clap::Parser;
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "chunkscribe")]
#[command(version, about = "Transcribe long audio and video files in chunks")]
#[command(long_about = "Split media into segments that fit the transcription API limit, transcribe them concurrently and merge the results in order.")]
struct Cli {
    /// Input video/audio file
    input: PathBuf,

    /// Output file (defaults to input name with .txt or .json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: text, json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Source language code (e.g., en, ja, es); detected when omitted
    #[arg(short, long)]
    language: Option<String>,

    /// Vocabulary or style hint for the transcription model
    #[arg(long)]
    prompt: Option<String>,

    /// Transcription model: whisper-1, gpt-4o-transcribe, gpt-4o-mini-transcribe
    #[arg(short, long)]
    model: Option<String>,

    /// Number of segments processed concurrently
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Chunk storage: local, memory, object
    #[arg(long)]
    storage: Option<String>,

    /// Add punctuation and paragraphs to the transcript
    #[arg(long)]
    reformat: bool,

    /// Translate the transcript to a target language (e.g., en, es, fr)
    #[arg(long)]
    translate: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use 'text' or 'json'", s)),
        }
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    text: &'a str,
    refined: bool,
    report: &'a JobReport,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn derive_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let mut output = input.to_path_buf();
    output.set_file_name(format!("{}.{}", stem.to_string_lossy(), format.extension()));
    output
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(ref language) = cli.language {
        config.language = Some(language.clone());
    }
    if let Some(ref prompt) = cli.prompt {
        config.prompt = Some(prompt.clone());
    }
    if let Some(ref model) = cli.model {
        config.model = model
            .parse::<WhisperModel>()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(ref storage) = cli.storage {
        config.storage = storage
            .parse::<StorageBackend>()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }
    Ok(())
}

fn refine_tasks(cli: &Cli) -> Vec<RefineTask> {
    let mut tasks = Vec::new();
    if cli.reformat {
        tasks.push(RefineTask::Reformat);
    }
    if let Some(ref target) = cli.translate {
        tasks.push(RefineTask::Translate(target.clone()));
    }
    tasks
}

fn print_summary(report: &JobReport, output: Option<&Path>) {
    println!();
    println!("{}", style("═══ Transcription Summary ═══").bold());
    println!("  Input:      {}", report.original_filename);
    println!(
        "  Duration:   {:.1}s audio in {} segment(s){}",
        report.total_duration.as_secs_f64(),
        report.segment_count,
        if report.passthrough { " (passthrough)" } else { "" }
    );
    println!("  Elapsed:    {:.2}s", report.elapsed.as_secs_f64());

    match report.outcome {
        JobOutcome::Completed { ref transcript } => {
            println!(
                "  Result:     {} {} of {} segments, {} words",
                style("✓").green(),
                transcript.success_count,
                transcript.total_segments,
                transcript.word_count
            );
            if let Some(ref lang) = transcript.language {
                println!("  Language:   {}", lang);
            }
            for (index, error) in transcript.errors() {
                println!("  {} segment {}: {}", style("!").yellow(), index, error);
            }
        }
        JobOutcome::Failed { ref message } => {
            println!("  Result:     {} {}", style("✗").red(), message);
        }
        JobOutcome::Cancelled => {
            println!("  Result:     {} cancelled", style("✗").red());
        }
    }

    if let Some(path) = output {
        println!("  Output:     {}", path.display());
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }

    let format: OutputFormat = cli
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| derive_output_path(&cli.input, format));

    let mut config = Config::load().context("Failed to load configuration")?;
    apply_cli_overrides(&mut config, &cli)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let tasks = refine_tasks(&cli);
    let refiner = if tasks.is_empty() {
        None
    } else {
        Some(create_refiner(&config).context("Refinement requested")?)
    };

    check_ffprobe().await?;
    check_ffmpeg().await?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nCancelling: waiting for in-flight segments to finish...");
        }
    })
    .context("Failed to install Ctrl+C handler")?;

    info!("Input:    {}", cli.input.display());
    info!("Output:   {}", output.display());
    info!("Model:    {}", config.model.as_str());
    info!("Storage:  {}", config.storage);

    // Verbose logs would tear through the bar.
    let progress: Arc<dyn ProgressObserver> = if cli.verbose {
        Arc::new(LogProgress)
    } else {
        Arc::new(BarProgress::new())
    };
    let orchestrator = Arc::new(Orchestrator::from_config(&config)?.with_progress(progress));
    let sweeper = orchestrator.spawn_configured_sweeper();
    let report = orchestrator.run_with_cancel(&cli.input, cancelled).await;
    sweeper.abort();
    let report =
        report.with_context(|| format!("Failed to transcribe {}", cli.input.display()))?;

    let transcript = match report.outcome {
        JobOutcome::Completed { ref transcript } => transcript,
        JobOutcome::Failed { ref message } => {
            print_summary(&report, None);
            anyhow::bail!("Transcription failed: {}", message);
        }
        JobOutcome::Cancelled => {
            print_summary(&report, None);
            return Err(ScribeError::Cancelled.into());
        }
    };

    let mut text = transcript.full_text.clone();
    let mut refined = false;
    if let Some(ref refiner) = refiner {
        for task in &tasks {
            match refine_transcript(refiner.as_ref(), &text, task, DEFAULT_BATCH_CHARS).await {
                Ok(result) => {
                    text = result;
                    refined = true;
                }
                Err(e) => warn!("Skipping {}: {}", task, e),
            }
        }
    }

    let contents = match format {
        OutputFormat::Text => format!("{}\n", text),
        OutputFormat::Json => serde_json::to_string_pretty(&JsonOutput {
            text: &text,
            refined,
            report: &report,
        })?,
    };
    std::fs::write(&output, contents)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    print_summary(&report, Some(&output));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_output_path() {
        let input = PathBuf::from("/path/to/lecture.mp4");

        let text_output = derive_output_path(&input, OutputFormat::Text);
        assert_eq!(text_output, PathBuf::from("/path/to/lecture.txt"));

        let json_output = derive_output_path(&input, OutputFormat::Json);
        assert_eq!(json_output, PathBuf::from("/path/to/lecture.json"));
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("srt".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "chunkscribe",
            "talk.mp3",
            "--language",
            "de",
            "--concurrency",
            "6",
            "--storage",
            "memory",
            "--reformat",
            "--translate",
            "en",
        ]);
        let mut config = Config::default();
        apply_cli_overrides(&mut config, &cli).unwrap();

        assert_eq!(config.language.as_deref(), Some("de"));
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(
            refine_tasks(&cli),
            vec![RefineTask::Reformat, RefineTask::Translate("en".to_string())]
        );
    }

    #[test]
    fn test_cli_rejects_unknown_storage() {
        let cli = Cli::parse_from(["chunkscribe", "talk.mp3", "--storage", "s3"]);
        let mut config = Config::default();
        assert!(apply_cli_overrides(&mut config, &cli).is_err());
    }
}
