use clap::{Args, Parser, Subcommand};
use codemode_runtime::{
    providers, ExecuteOptions, ExecutionResult, ExecutionRuntime, PrivacyLayer, RuntimeConfig,
    ToolMetadata, Validator,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Codemode - code execution runtime for AI agents
///
/// Runs agent-written code against lazily discovered tools inside a
/// resource-limited sandbox, tokenizing sensitive values on the way.
#[derive(Parser)]
#[command(name = "codemode")]
#[command(version)]
#[command(about = "Sandboxed code execution with lazy tool discovery", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per tool provider
    #[arg(long, global = true)]
    tools_dir: Option<PathBuf>,

    /// Session file restored before and written after the command
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// File to read code from ("-" for stdin)
    file: Option<PathBuf>,

    /// Code given inline
    #[arg(short = 'c', long = "code", conflicts_with = "file")]
    code: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code in the sandbox
    Run {
        #[command(flatten)]
        source: Source,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Skip static validation
        #[arg(long)]
        no_validate: bool,

        /// Skip PII tokenization
        #[arg(long)]
        no_privacy: bool,

        /// Deadline in seconds, overriding the config
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Run the static validator only
    Validate {
        #[command(flatten)]
        source: Source,
    },
    /// Search tool metadata
    Search {
        query: String,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// List tool providers
    Providers,
    /// List the tools of one provider
    Tools { provider: String },
    /// Tokenize sensitive values in text
    Scrub {
        #[command(flatten)]
        source: Source,

        /// Replace whole values instead of keeping format hints
        #[arg(long)]
        no_preserve: bool,
    },
    /// Show runtime status
    Status,
}

type CliResult = Result<bool, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(dir) = &cli.tools_dir {
        config.tools.root = Some(dir.clone());
    }

    init_logging(cli.verbose, &config.logging.level);

    let mut runtime = ExecutionRuntime::new(config, providers::marina_plugins());
    if let Some(path) = cli.state.as_deref().filter(|p| p.exists()) {
        if let Err(e) = runtime.restore(path) {
            error!("Failed to restore session from {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }

    let outcome = match cli.command {
        Commands::Run {
            source,
            json,
            no_validate,
            no_privacy,
            timeout,
        } => {
            let mut opts = runtime.default_options().validate(!no_validate);
            if no_privacy {
                opts = opts.preserve_privacy(false);
            }
            run_code(&mut runtime, &source, opts, timeout, json).await
        }
        Commands::Validate { source } => validate_code(&runtime, &source),
        Commands::Search {
            query,
            provider,
            category,
            limit,
        } => search_tools(&runtime, &query, provider.as_deref(), category.as_deref(), limit),
        Commands::Providers => list_providers(&runtime),
        Commands::Tools { provider } => list_tools(&runtime, &provider),
        Commands::Scrub {
            source,
            no_preserve,
        } => scrub(&source, !no_preserve),
        Commands::Status => show_status(&runtime),
    };

    if let Some(path) = &cli.state {
        if let Err(e) = runtime.snapshot(path) {
            error!("Failed to write session to {}: {}", path.display(), e);
        }
    }

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }
}

fn read_source(source: &Source) -> std::io::Result<String> {
    if let Some(code) = &source.code {
        return Ok(code.clone());
    }
    match source.file.as_deref() {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

async fn run_code(
    runtime: &mut ExecutionRuntime,
    source: &Source,
    mut opts: ExecuteOptions,
    timeout: Option<f64>,
    json: bool,
) -> CliResult {
    let code = read_source(source)?;
    if let Some(secs) = timeout {
        let timeout = Duration::try_from_secs_f64(secs)?;
        opts = opts.with_timeout(timeout);
    }
    info!("Executing {} bytes", code.len());

    let result = runtime.execute_with(&code, opts).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result)?;
    }
    Ok(result.success)
}

fn print_result(result: &ExecutionResult) -> Result<(), serde_json::Error> {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
        if !result.stdout.ends_with('\n') {
            println!();
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("Success: {}", result.success);
    if let Some(value) = &result.result {
        println!("Result: {}", serde_json::to_string(value)?);
    }
    if !result.tools_used.is_empty() {
        println!("Tools Used: {}", result.tools_used.join(", "));
    }
    println!("Tokens Saved: {}", result.tokens_saved);
    println!("Time: {:.3}s", result.execution_time);
    println!("{}", "=".repeat(60));

    if !result.stderr.is_empty() {
        eprintln!("\nSTDERR:\n{}", result.stderr);
    }
    Ok(())
}

fn validate_code(runtime: &ExecutionRuntime, source: &Source) -> CliResult {
    let code = read_source(source)?;
    let validator = Validator::from_config(&runtime.config().sandbox);
    let violations = validator.scan(&code);
    match validator.validate(&code) {
        Ok(()) => {
            println!("OK: code passed validation");
            Ok(true)
        }
        Err(e) => {
            println!("{}", e);
            for violation in violations {
                println!("  - {}", violation);
            }
            Ok(false)
        }
    }
}

fn print_tools(tools: &[ToolMetadata]) {
    for tool in tools {
        println!("\n{}:", tool.id());
        println!("  Description: {}", tool.description);
        if let Some(category) = &tool.category {
            println!("  Category: {}", category);
        }
        if !tool.parameters.is_empty() {
            let names: Vec<&str> = tool.parameters.keys().map(String::as_str).collect();
            println!("  Parameters: {}", names.join(", "));
        }
    }
}

fn search_tools(
    runtime: &ExecutionRuntime,
    query: &str,
    provider: Option<&str>,
    category: Option<&str>,
    limit: Option<usize>,
) -> CliResult {
    let limit = limit.unwrap_or(runtime.config().tools.default_search_limit);
    let hits = runtime.loader().search_tools(query, provider, category, limit);

    println!("\n{}", "=".repeat(60));
    println!("Tools matching '{}'", query);
    println!("{}", "=".repeat(60));
    if hits.is_empty() {
        println!("No matches.");
    } else {
        print_tools(&hits);
    }
    println!("\n{}", "=".repeat(60));
    Ok(true)
}

fn list_providers(runtime: &ExecutionRuntime) -> CliResult {
    for provider in runtime.loader().list_providers() {
        println!("{}", provider);
    }
    Ok(true)
}

fn list_tools(runtime: &ExecutionRuntime, provider: &str) -> CliResult {
    let tools = runtime.loader().list_tools(provider)?;
    println!("\n{}", "=".repeat(60));
    println!("Provider: {}", provider);
    println!("{}", "=".repeat(60));
    print_tools(&tools);
    println!("\n{}", "=".repeat(60));
    Ok(true)
}

fn scrub(source: &Source, preserve_format: bool) -> CliResult {
    let text = read_source(source)?;
    let privacy = PrivacyLayer::with_format(preserve_format);
    let (sanitized, tokens) = privacy.tokenize_pii(&text, preserve_format);

    print!("{}", sanitized);
    if !sanitized.ends_with('\n') {
        println!();
    }
    let report = privacy.scan_report(&text);
    for (category, count) in &report.counts {
        eprintln!("{}: {}", category, count);
    }
    info!("{} token(s) issued", tokens.len());
    Ok(true)
}

fn show_status(runtime: &ExecutionRuntime) -> CliResult {
    let status = runtime.status();

    println!("\n{}", "=".repeat(60));
    println!("Codemode Runtime Status");
    println!("{}", "=".repeat(60));
    println!("ID: {}", status.id);
    println!("Sandbox: {} ({:?})", status.sandbox.id, status.sandbox.state);
    println!("Allowed Imports: {}", status.sandbox.allowed_imports.join(", "));
    println!("Providers: {}", status.providers.join(", "));
    println!("Discovered Tools: {}", status.discovered_tools);
    println!("Executions: {}", status.execution_count);
    if status.session_keys.is_empty() {
        println!("Session State: (empty)");
    } else {
        println!("Session State: {}", status.session_keys.join(", "));
    }
    println!("{}", "=".repeat(60));
    Ok(true)
}
