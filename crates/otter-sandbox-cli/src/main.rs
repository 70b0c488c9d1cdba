use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use otter_bridge::{JsFunction, JsObject, Value};
use otter_sandbox::{EvalResult, Sandbox, SandboxConfig, SandboxOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "otter-sandbox", version, about = "Run scripts in an isolated QuickJS sandbox")]
struct Cli {
    /// Path to otter-sandbox.toml (searched upwards from the current directory by default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Evaluation timeout in milliseconds, overrides the config file
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log sandbox lifecycle events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file as an ES module
    Run { file: PathBuf },
    /// Evaluate inline code
    Eval { code: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(timeout) = cli.timeout {
        config.timeout_ms = Some(timeout);
    }

    let result = match cli.command {
        Commands::Run { file } => run_file(&file, config).await?,
        Commands::Eval { code } => evaluate(code, config).await?,
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_file(file: &Path, config: SandboxConfig) -> Result<EvalResult> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let config = match file.file_name().and_then(|name| name.to_str()) {
        Some(name) => config.module_name(name),
        None => config,
    };
    evaluate(source, config).await
}

async fn evaluate(source: String, config: SandboxConfig) -> Result<EvalResult> {
    let options = SandboxOptions::new(config).bind("console", console());
    let sandbox = Sandbox::new(options);
    Ok(sandbox.eval_async(source).await?)
}

/// `console.log` and friends, written to stderr so stdout stays JSON.
fn console() -> JsObject {
    let console = JsObject::new();
    for name in ["log", "info", "debug", "warn", "error"] {
        let print = JsFunction::native(name, move |call, _| {
            let line = call
                .args
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(" ");
            match name {
                "warn" | "error" => eprintln!("[{name}] {line}"),
                _ => eprintln!("{line}"),
            }
            Ok(Value::Undefined)
        });
        console.set(name, Value::Function(print));
    }
    console
}
