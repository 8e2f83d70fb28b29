//! testport CLI: convert Cypress test files to Playwright through an oracle.
//!
//! Usage:
//!   testport convert <file> [--oracle-cmd cmd] [--config path] [--workers n] [--json]
//!   testport decompose <file> [--json]
//!   testport serve [--addr host:port] [--oracle-cmd cmd] [--config path]
//!   testport config [--config path]

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testport::{
    CommandOracle, ConversionRequest, Coordinator, Decomposer, JavaScriptDecomposer,
    PipelineConfig, ProgressFrame, RunStatus, SourceDialect,
};

#[derive(Parser)]
#[command(
    name = "testport",
    version,
    about = "Convert Cypress test files to Playwright through a transformation oracle"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one test file
    Convert {
        /// Cypress test file (.js or .ts)
        file: PathBuf,
        /// Oracle command line; overrides `oracle_command` from the config
        #[arg(long)]
        oracle_cmd: Option<String>,
        /// Path to a YAML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Concurrent component workers
        #[arg(long)]
        workers: Option<usize>,
        /// Print the full result as JSON instead of the converted file
        #[arg(long)]
        json: bool,
    },
    /// Show how a file splits into components
    Decompose {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Serve conversions over HTTP with server-sent progress events
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
        #[arg(long)]
        oracle_cmd: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("testport=debug")
        } else {
            EnvFilter::new("testport=warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_input(file: &Path) -> Result<String, String> {
    std::fs::read_to_string(file).map_err(|e| format!("cannot read '{}': {}", file.display(), e))
}

fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::CompletedWithIssues | RunStatus::Cancelled => 2,
        RunStatus::Failed => 1,
    }
}

fn print_frame(frame: &ProgressFrame, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(frame) {
            eprintln!("{}", line);
        }
        return;
    }
    match frame {
        ProgressFrame::Event(event) => {
            let cache = match event.cache_hit {
                Some(true) => " [cache hit]",
                Some(false) => " [cache miss]",
                None => "",
            };
            eprintln!(
                "{:>4} {:<11} {:<8} {}{}",
                event.seq,
                event.stage.as_str(),
                event.status.as_str(),
                event.message,
                cache
            );
        }
        ProgressFrame::Lagged { skipped } => eprintln!("     ({} progress events skipped)", skipped),
        ProgressFrame::Heartbeat { .. } => {}
        ProgressFrame::Done { status } => eprintln!("     done: {}", status.as_str()),
    }
}

/// Load and check the config, then build the oracle it names.
fn load_setup(
    oracle_cmd: Option<String>,
    config: Option<PathBuf>,
    workers: Option<usize>,
) -> Result<(CommandOracle, PipelineConfig), String> {
    let mut config = PipelineConfig::load_or_default(config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(n) = workers {
        config.worker_limit = n;
    }
    config.validate().map_err(|e| e.to_string())?;

    let command_line = oracle_cmd
        .or_else(|| config.oracle_command.clone())
        .ok_or("no oracle configured (use --oracle-cmd or set oracle_command in the config)")?;
    let oracle = CommandOracle::from_command_line(&command_line).ok_or("empty oracle command")?;
    Ok((oracle, config))
}

fn cmd_convert(
    file: &Path,
    oracle_cmd: Option<String>,
    config: Option<PathBuf>,
    workers: Option<usize>,
    json: bool,
) -> i32 {
    let (oracle, config) = match load_setup(oracle_cmd, config, workers) {
        Ok(setup) => setup,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let input = match read_input(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let request = ConversionRequest::new(input)
        .with_dialect(SourceDialect::from_path(file))
        .with_file_name(file.display().to_string());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async move {
        let coordinator = Coordinator::new(Arc::new(oracle), config);
        let mut handle = match coordinator.start(request) {
            Ok(h) => h,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };

        let mut interrupted = false;
        loop {
            tokio::select! {
                frame = handle.events.next() => match frame {
                    Some(frame) => print_frame(&frame, json),
                    None => break,
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    eprintln!("interrupted, cancelling (in-flight oracle calls will finish)");
                    let _ = coordinator.hub().close(&handle.session_id);
                }
            }
        }

        let result = match handle.join.await {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Error: conversion task failed: {}", e);
                return 1;
            }
        };

        if json {
            match serde_json::to_string_pretty(&result) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            }
        } else {
            if let Some(artifact) = &result.artifact {
                print!("{}", artifact.text);
            }
            if let Some(error) = &result.error {
                eprintln!("Error: {}", error);
            }
            let meta = &result.metadata;
            eprintln!(
                "{}: {} components, {} oracle calls, cache hit rate {:.0}%, {:.1}s",
                result.status.as_str(),
                result.per_component.len(),
                meta.external_call_count,
                meta.cache_hit_rate * 100.0,
                meta.duration_seconds
            );
        }
        exit_code(result.status)
    })
}

fn cmd_decompose(file: &Path, json: bool) -> i32 {
    let input = match read_input(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let decomposition = match JavaScriptDecomposer::new().decompose(&input, SourceDialect::from_path(file)) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if json {
        return match serde_json::to_string_pretty(&decomposition) {
            Ok(text) => {
                println!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        };
    }

    println!("{:<14}  {:<9}  {:<48}  DEPENDS ON", "ID", "LINES", "LABEL");
    for c in &decomposition.components {
        let scope: Vec<&str> = c.scope.iter().map(|f| f.title.as_str()).collect();
        let label = if scope.is_empty() {
            c.label.clone()
        } else {
            format!("{} > {}", scope.join(" > "), c.label)
        };
        let deps: Vec<&str> = c.dependencies.iter().map(|d| d.as_str()).collect();
        println!(
            "{:<14}  {:<9}  {:<48}  {}",
            c.id,
            format!("{}-{}", c.span.start, c.span.end),
            label,
            deps.join(", ")
        );
    }
    if !decomposition.custom_commands.is_empty() {
        println!();
        println!("Custom commands:");
        for cmd in &decomposition.custom_commands {
            println!("  {}({})  line {}", cmd.name, cmd.params.join(", "), cmd.line);
        }
    }
    0
}

fn cmd_serve(addr: SocketAddr, oracle_cmd: Option<String>, config: Option<PathBuf>) -> i32 {
    let (oracle, config) = match load_setup(oracle_cmd, config, None) {
        Ok(setup) => setup,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async move {
        let coordinator = Coordinator::new(Arc::new(oracle), config);
        eprintln!("serving on http://{}", addr);
        match testport::server::serve(coordinator, addr).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        }
    })
}

fn cmd_config(config: Option<PathBuf>) -> i32 {
    let config = match PipelineConfig::load_or_default(config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match config.to_yaml() {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let code = match cli.command {
        Commands::Convert {
            file,
            oracle_cmd,
            config,
            workers,
            json,
        } => cmd_convert(&file, oracle_cmd, config, workers, json),
        Commands::Decompose { file, json } => cmd_decompose(&file, json),
        Commands::Serve {
            addr,
            oracle_cmd,
            config,
        } => cmd_serve(addr, oracle_cmd, config),
        Commands::Config { config } => cmd_config(config),
    };
    std::process::exit(code);
}
