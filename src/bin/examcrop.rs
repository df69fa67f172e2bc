//! CLI binary for edgequake-examcrop.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_examcrop::{
    extract_and_store, CropFailure, DetectionFailure, DetectionMethod, ExtractionConfig,
    ExtractionProgressCallback, GroupId, ManifestStore, ProgressCallback, QuestionStorage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per page. The page count is unknown until the
/// document runs out, so there is no bar to fill.
struct CliProgressCallback {
    bar: ProgressBar,
    fallbacks: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            fallbacks: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, label: &str) {
        self.bar.set_prefix("Extracting");
        self.bar.println(format!("{} {}", cyan("◆"), bold(label)));
    }

    fn on_page_start(&self, page_num: usize) {
        self.bar.set_message(format!("page {page_num}: detecting"));
    }

    fn on_page_fallback(&self, page_num: usize, reason: &DetectionFailure) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        self.bar
            .set_message(format!("page {page_num}: equal strips ({reason})"));
    }

    fn on_crop_skipped(&self, page_num: usize, failure: &CropFailure) {
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            yellow("⚠"),
            page_num,
            dim(&failure.to_string())
        ));
    }

    fn on_page_complete(&self, page_num: usize, method: DetectionMethod, cropped: usize) {
        let (mark, how) = match method {
            DetectionMethod::Primary => (green("✓"), "vision"),
            DetectionMethod::Fallback => (yellow("↯"), "strips"),
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {:>2} question(s)  {}",
            mark,
            page_num,
            cropped,
            dim(how)
        ));
    }

    fn on_extraction_complete(&self, total_pages: usize, total_questions: usize) {
        self.bar.finish_and_clear();
        let fallbacks = self.fallbacks.load(Ordering::SeqCst);
        eprintln!(
            "{} {} questions from {} pages{}",
            green("✔"),
            bold(&total_questions.to_string()),
            total_pages,
            if fallbacks > 0 {
                format!("  ({} via fallback)", yellow(&fallbacks.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract questions into ./questions/<groupId>/
  examcrop extract mock-test-3.pdf --label "Mock Test 3"

  # Custom storage, delete the PDF afterwards, machine-readable output
  examcrop --storage-root public/questions extract exam.pdf --label Finals \
      --remove-source --json

  # Four questions per page when the vision model gives up
  examcrop extract exam.pdf --label Quiz --questions-per-page 4

  # Replace one question image
  examcrop replace 3f2c…-group-id fixed.png --old-url /questions/3f2c…/q7_….png

  # Delete every image of a group
  examcrop delete 3f2c…-group-id

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium or the directory holding it
  EXAMCROP_STORAGE_ROOT   Question image root (default: questions)
  EXAMCROP_URL_PREFIX     Public URL prefix (default: /questions)
"#;

/// Crop exam PDFs into one image per question using a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "examcrop",
    version,
    about = "Crop exam PDFs into one image per question using a Vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding one sub-directory of images per group.
    #[arg(long, global = true, env = "EXAMCROP_STORAGE_ROOT", default_value = "questions")]
    storage_root: PathBuf,

    /// Public path prefix of question image URLs.
    #[arg(long, global = true, env = "EXAMCROP_URL_PREFIX", default_value = "/questions")]
    url_prefix: String,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EXAMCROP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EXAMCROP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every question of a PDF into cropped images.
    Extract(ExtractArgs),

    /// Delete every stored image of a group. Succeeds if nothing is there.
    Delete {
        /// Group id printed by `extract`.
        group_id: String,
    },

    /// Store a replacement image for one question and print its URL.
    Replace {
        /// Group id printed by `extract`.
        group_id: String,

        /// New image (PNG, JPEG).
        image: PathBuf,

        /// URL of the image being replaced; its file is removed.
        #[arg(long)]
        old_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Exam PDF file.
    pdf: PathBuf,

    /// Document name stored with the questions.
    #[arg(long)]
    label: String,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "EXAMCROP_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Equal strips per page when the vision model fails.
    #[arg(long, env = "EXAMCROP_QUESTIONS_PER_PAGE", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..=50))]
    questions_per_page: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "EXAMCROP_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom detection prompt.
    #[arg(long, env = "EXAMCROP_PROMPT")]
    prompt: Option<PathBuf>,

    /// Retries per page on a failed vision call.
    #[arg(long, env = "EXAMCROP_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Per-page vision call timeout in seconds.
    #[arg(long, env = "EXAMCROP_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Delete the PDF after a successful run.
    #[arg(long, env = "EXAMCROP_REMOVE_SOURCE")]
    remove_source: bool,

    /// Print the full result as JSON.
    #[arg(long, env = "EXAMCROP_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "EXAMCROP_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs for interactive extraction.
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let storage = QuestionStorage::new(&cli.storage_root, &cli.url_prefix);

    match &cli.command {
        Command::Extract(args) => run_extract(&cli, args, show_progress).await,
        Command::Delete { group_id } => {
            let group = GroupId::parse(group_id.as_str())?;
            storage
                .delete_group_images(&group)
                .await
                .context("Delete failed")?;
            if !cli.quiet {
                eprintln!("{} deleted {}", green("✔"), group);
            }
            Ok(())
        }
        Command::Replace {
            group_id,
            image,
            old_url,
        } => {
            let group = GroupId::parse(group_id.as_str())?;
            let bytes = tokio::fs::read(image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let url = storage
                .replace_question_image(&group, old_url.as_deref(), &bytes)
                .await
                .context("Replace failed")?;
            println!("{url}");
            Ok(())
        }
    }
}

async fn run_extract(cli: &Cli, args: &ExtractArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(cli, args, progress_cb).await?;
    let store = ManifestStore::from_config(&config);

    let stored = extract_and_store(&args.pdf, &args.label, &config, &store)
        .await
        .context("Extraction failed")?;
    let output = &stored.output;

    if args.json {
        let json = serde_json::to_string_pretty(&stored).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    println!("{}", output.group_id);
    if !cli.quiet {
        for q in &output.questions {
            eprintln!("  {:>3}  {}", q.question_number, dim(&q.question_image_url));
        }
        if !show_progress {
            eprintln!(
                "Extracted {} questions from {} pages ({} fallback) in {}ms",
                output.stats.total_questions,
                output.stats.total_pages,
                output.stats.fallback_pages,
                output.stats.total_duration_ms
            );
        }
        eprintln!(
            "   {} tokens in  /  {} tokens out  —  manifest {}",
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
            store.manifest_path(&output.group_id).display(),
        );
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(
    cli: &Cli,
    args: &ExtractArgs,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(args.dpi)
        .questions_per_page(args.questions_per_page)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .storage_root(&cli.storage_root)
        .url_prefix(&cli.url_prefix)
        .remove_source_on_success(args.remove_source);

    if let Some(ref path) = args.prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read detection prompt from {:?}", path))?;
        builder = builder.detection_prompt(prompt);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
