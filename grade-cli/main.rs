//! grade - scanned answer sheet grader
//!
//! Usage:
//!   grade align <template> <sheet> --role student     Align one sheet onto the template
//!   grade evaluate <key.json> <answers.json>           Score extracted answers
//!   grade run <template> <teacher> <student> ...       Full pipeline (recorded or Azure OCR)
//!   grade serve --port 8000                            HTTP API
//!   grade config --preset fast --format toml           Print a configuration preset
//!
//! Results are printed to stdout as `{"success": ..., "result" | "error": ...}`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use grade_align::SheetRole;
use grade_cli::{
    server, AzureLayoutOcr, ConfigFormat, GraderConfig, GradingPipeline, OcrEngine, Outcome, Preset, RecordedOcr,
};
use grade_eval::RuleBasedFeedback;
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "grade", version, about = "Align, read and score scanned answer sheets")]
struct Cli {
    /// Grader configuration file (.toml or .json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a scanned sheet onto the blank template
    Align {
        template: PathBuf,
        sheet: PathBuf,
        #[arg(long, default_value = "student")]
        role: SheetRole,
    },
    /// Score a student answers file against an answer key file
    Evaluate { key: PathBuf, answers: PathBuf },
    /// Align, read and score a student sheet against a teacher key sheet
    Run {
        template: PathBuf,
        teacher: PathBuf,
        student: PathBuf,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Print or write a configuration preset
    Config {
        #[arg(long, default_value = "default")]
        preset: Preset,
        #[arg(long, default_value = "toml")]
        format: ConfigFormat,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct OcrArgs {
    /// Recorded OCR output (JSON) for the teacher sheet
    #[arg(long, requires = "student_ocr")]
    teacher_ocr: Option<PathBuf>,
    /// Recorded OCR output (JSON) for the student sheet
    #[arg(long, requires = "teacher_ocr")]
    student_ocr: Option<PathBuf>,
    /// Use Azure Document Intelligence (AZURE_VISION_ENDPOINT, AZURE_VISION_KEY)
    #[arg(long, conflicts_with_all = ["teacher_ocr", "student_ocr"])]
    azure: bool,
}

impl OcrArgs {
    fn engine(&self) -> Result<Arc<dyn OcrEngine>> {
        match (&self.teacher_ocr, &self.student_ocr) {
            (Some(teacher), Some(student)) => Ok(Arc::new(RecordedOcr::from_files(teacher, student)?)),
            _ if self.azure => Ok(Arc::new(AzureLayoutOcr::from_env()?)),
            _ => bail!("no OCR source: pass --teacher-ocr and --student-ocr, or --azure"),
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GraderConfig> {
    match path {
        Some(path) => GraderConfig::load(path).with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(GraderConfig::default()),
    }
}

fn pipeline(config: GraderConfig, ocr: Arc<dyn OcrEngine>) -> Result<GradingPipeline> {
    Ok(GradingPipeline::new(config, ocr, Arc::new(RuleBasedFeedback))?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!("{}", config.summary());

    match cli.command {
        Commands::Align { template, sheet, role } => {
            let pipeline = pipeline(config, Arc::new(RecordedOcr::new()))?;
            let result = pipeline.aligner().align(&template, &sheet, role)?;
            print_json(&Outcome::success(result))
        }
        Commands::Evaluate { key, answers } => {
            let pipeline = pipeline(config, Arc::new(RecordedOcr::new()))?;
            let outcome = pipeline.evaluate_files(&key, &answers)?;
            print_json(&Outcome::success(outcome))
        }
        Commands::Run {
            template,
            teacher,
            student,
            ocr,
        } => {
            let pipeline = pipeline(config, ocr.engine()?)?;
            let outcome = pipeline.grade(&template, &teacher, &student)?;
            print_json(&Outcome::success(outcome))
        }
        Commands::Serve { port, host, ocr } => {
            let pipeline = Arc::new(pipeline(config, ocr.engine()?)?);
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(server::serve(SocketAddr::new(host, port), pipeline))?;
            Ok(())
        }
        Commands::Config { preset, format, output } => {
            let text = GraderConfig::preset(preset).to_format(format)?;
            match output {
                Some(path) => {
                    fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(%preset, path = %path.display(), "configuration written");
                }
                None => println!("{text}"),
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            let failure = Outcome::<()>::failure(format!("{e:#}"));
            match serde_json::to_string_pretty(&failure) {
                Ok(json) => println!("{json}"),
                Err(_) => println!("{{\"success\": false}}"),
            }
            ExitCode::FAILURE
        }
    }
}
