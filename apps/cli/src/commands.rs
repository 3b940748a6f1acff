//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use paperagent_core::{EnvReport, ProgressReporter, check};
use paperagent_shared::{PaperAgentError, PipelineConfig, load_config_from};

/// Exit codes.
const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_ENVIRONMENT: u8 = 3;
const EXIT_FAILURE_RATE: u8 = 4;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paper-agent: from conference venue to structured paper analyses.
#[derive(Parser)]
#[command(
    name = "paper-agent",
    version,
    about = "Crawl OpenReview, filter by keyword, download PDFs, and analyze them with an LLM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Pipeline config file (.yaml/.yml, or .toml). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "PAPER_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Check runtime, required external tools, and the API key.
    Check,

    /// Stage 1: crawl the configured conferences and years.
    Stage1,

    /// Stage 2: filter a Stage 1 artifact by keyword.
    Stage2 {
        /// Stage 1 artifact (`all_papers_*.json`).
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the filtered artifact (defaults to `<output_dir>/data`).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage 3: download the PDFs of a Stage 2 artifact.
    Stage3 {
        /// Stage 2 artifact (`filtered_papers_*.json`).
        #[arg(short, long)]
        input: PathBuf,

        /// PDF directory (defaults to `<output_dir>/papers`).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage 4: analyze downloaded PDFs with the configured model.
    Stage4 {
        /// PDF directory or Stage 3 `manifest.json`.
        #[arg(short, long)]
        input: PathBuf,

        /// Analysis directory (defaults to `<output_dir>/analysis`).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// API key (defaults to the configured environment variable).
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Run all four stages in order.
    All {
        /// API key (defaults to the configured environment variable).
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a config file with every default filled in.
    Init {
        #[arg(long, default_value = "paper_agent.yaml")]
        path: PathBuf,

        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved configuration as YAML.
    Show,
}

impl Command {
    /// Stage label used in the JSON summary line.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Stage1 => "stage1",
            Self::Stage2 { .. } => "stage2",
            Self::Stage3 { .. } => "stage3",
            Self::Stage4 { .. } => "stage4",
            Self::All { .. } => "all",
            Self::Config { .. } => "config",
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` wins over `-v`.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "warn,paperagent=info,paper_agent=info",
        1 => "warn,paperagent=debug,paper_agent=debug",
        _ => "info,paperagent=trace,paper_agent=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command and return the process exit code.
pub(crate) async fn run(cli: Cli) -> Result<u8> {
    if let Command::Config {
        action: ConfigAction::Init { path, force },
    } = &cli.command
    {
        return cmd_config_init(path, *force);
    }

    let config = load(cli.config.as_deref())?;

    match cli.command {
        Command::Check => cmd_check(&config),
        Command::Stage1 => {
            let progress = CliProgress::new();
            let summary = paperagent_core::run_crawl(&config, &progress).await?;
            emit(&summary)?;
            Ok(EXIT_OK)
        }
        Command::Stage2 { input, output } => {
            let summary = paperagent_core::run_filter(&config, &input, output.as_deref())?;
            emit(&summary)?;
            Ok(EXIT_OK)
        }
        Command::Stage3 { input, output } => {
            let progress = CliProgress::new();
            let summary =
                paperagent_core::run_download(&config, &input, output.as_deref(), &progress)
                    .await?;
            emit(&summary)?;
            Ok(EXIT_OK)
        }
        Command::Stage4 {
            input,
            output,
            api_key,
        } => {
            let progress = CliProgress::new();
            let summary = paperagent_core::run_analysis(
                &config,
                &input,
                output.as_deref(),
                api_key.as_deref(),
                &progress,
            )
            .await?;
            emit(&summary)?;
            Ok(EXIT_OK)
        }
        Command::All { api_key } => {
            let progress = CliProgress::new();
            let summary = paperagent_core::run_all(&config, api_key.as_deref(), &progress).await?;
            emit(&summary)?;
            Ok(EXIT_OK)
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", serde_yaml::to_string(&config)?);
                Ok(EXIT_OK)
            }
            ConfigAction::Init { path, force } => cmd_config_init(&path, force),
        },
    }
}

fn load(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => {
            info!("no --config given, using defaults");
            PipelineConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// `check` output: the environment report tagged with its stage name.
#[derive(Serialize)]
struct CheckSummary<'a> {
    stage: &'static str,
    #[serde(flatten)]
    report: &'a EnvReport,
}

fn cmd_check(config: &PipelineConfig) -> Result<u8> {
    let report = check(&config.analysis, None);
    emit(&CheckSummary {
        stage: "check",
        report: &report,
    })?;
    Ok(if report.ready { EXIT_OK } else { EXIT_ENVIRONMENT })
}

fn cmd_config_init(path: &Path, force: bool) -> Result<u8> {
    if path.exists() && !force {
        return Err(eyre!(
            "{} already exists; pass --force to replace it",
            path.display()
        ));
    }
    let yaml = serde_yaml::to_string(&PipelineConfig::default())?;
    std::fs::write(path, yaml).map_err(|e| PaperAgentError::io(path, e))?;
    emit(&serde_json::json!({"stage": "config", "path": path}))?;
    Ok(EXIT_OK)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SummaryLine<'a, T: Serialize> {
    status: &'static str,
    #[serde(flatten)]
    summary: &'a T,
}

/// Print one JSON line on stdout.
fn emit<T: Serialize>(summary: &T) -> Result<()> {
    let line = serde_json::to_string(&SummaryLine {
        status: "ok",
        summary,
    })?;
    println!("{line}");
    Ok(())
}

/// JSON line for a failed command.
pub(crate) fn emit_error(stage: &str, code: u8, report: &Report) {
    let line = serde_json::json!({
        "stage": stage,
        "status": "error",
        "exit_code": code,
        "error": report.to_string(),
    });
    println!("{line}");
}

/// Map the first [`PaperAgentError`] in the chain to an exit code.
pub(crate) fn exit_code(report: &Report) -> u8 {
    report
        .chain()
        .find_map(|cause| cause.downcast_ref::<PaperAgentError>())
        .map_or(EXIT_FAILURE, |e| match e {
            PaperAgentError::Config { .. } => EXIT_CONFIG,
            PaperAgentError::Environment(_) => EXIT_ENVIRONMENT,
            PaperAgentError::PartialBatch { .. } => EXIT_FAILURE_RATE,
            _ => EXIT_FAILURE,
        })
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner that turns into a bar
/// once the item count is known.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_prefix(name.to_string());
        self.bar.set_message(name.to_string());
    }

    fn begin(&self, total: usize) {
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_style(bar_style());
        self.bar.set_message(String::new());
    }

    fn item(&self, label: &str, ok: bool) {
        self.bar.inc(1);
        let mark = if ok { "ok" } else { "failed" };
        self.bar.set_message(format!("{label} {mark}"));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stage_arguments() {
        let cli = Cli::try_parse_from([
            "paper-agent",
            "stage4",
            "--input",
            "papers",
            "--api-key",
            "sk",
            "-c",
            "cfg.yaml",
        ])
        .unwrap();
        assert_eq!(cli.command.name(), "stage4");
        assert_eq!(cli.config.as_deref(), Some(Path::new("cfg.yaml")));
        match cli.command {
            Command::Stage4 { input, output, api_key } => {
                assert_eq!(input, PathBuf::from("papers"));
                assert!(output.is_none());
                assert_eq!(api_key.as_deref(), Some("sk"));
            }
            _ => panic!("expected stage4"),
        }
    }

    #[test]
    fn stage2_requires_input() {
        assert!(Cli::try_parse_from(["paper-agent", "stage2"]).is_err());
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let code = |e: PaperAgentError| exit_code(&Report::from(e));
        assert_eq!(code(PaperAgentError::config("bad")), EXIT_CONFIG);
        assert_eq!(code(PaperAgentError::Environment("no key".into())), EXIT_ENVIRONMENT);
        assert_eq!(
            code(PaperAgentError::PartialBatch {
                stage: "stage3".into(),
                failed: 5,
                total: 10
            }),
            EXIT_FAILURE_RATE
        );
        assert_eq!(code(PaperAgentError::upstream("all failed")), EXIT_FAILURE);
        assert_eq!(exit_code(&eyre!("plain")), EXIT_FAILURE);
    }

    #[test]
    fn summary_line_is_flat() {
        #[derive(Serialize)]
        struct S {
            stage: &'static str,
            kept: usize,
        }
        let line = serde_json::to_string(&SummaryLine {
            status: "ok",
            summary: &S {
                stage: "stage2",
                kept: 3,
            },
        })
        .unwrap();
        assert_eq!(line, r#"{"status":"ok","stage":"stage2","kept":3}"#);
    }

    #[test]
    fn check_line_names_its_stage() {
        let report = check(&PipelineConfig::default().analysis, Some("sk-or-v1-0123456789abcdef"));
        let line = serde_json::to_value(SummaryLine {
            status: "ok",
            summary: &CheckSummary {
                stage: "check",
                report: &report,
            },
        })
        .unwrap();
        assert_eq!(line["stage"], "check");
        assert_eq!(line["status"], "ok");
        assert_eq!(line["ready"], report.ready);
        assert!(line.get("python_ok").is_some());
    }
}
