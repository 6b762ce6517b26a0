use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::debugger::{Session, SessionError, SessionState};
use crate::interpreter::host::{HostInterop, StdHost};
use crate::optimizer::{optimize, OptimizerOptions};
use crate::program::Program;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - lowering, execution and debugging of program trees", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lower a program and print its diagnostics
    Check {
        /// Program tree as JSON
        program: PathBuf,
    },

    /// Print the lowered program as JSON
    Lower {
        /// Program tree as JSON
        program: PathBuf,
    },

    /// Run a program's entry point
    Run {
        /// Program tree as JSON
        program: PathBuf,

        /// Debug session: honour breakpoints and prompt when paused
        #[arg(long)]
        debug: bool,

        /// Break before statements on this line (1-based, repeatable)
        #[arg(short = 'b', long = "break")]
        breakpoints: Vec<usize>,

        /// Arguments passed to the entry point
        #[arg(last = true)]
        args: Vec<String>,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load configuration first so config errors show before any output
    let config = Config::builder().config_path(cli.config).build()?;

    match cli.command {
        Commands::Check { program } => {
            let program = read_program(&program)?;
            let optimized = optimize(&program, &OptimizerOptions::from(&config.optimizer));

            if optimized.diagnostics.is_empty() {
                println!("✓ No problems found");
                return Ok(());
            }
            for diagnostic in &optimized.diagnostics {
                println!("{}", diagnostic);
            }
            let errors = optimized.errors().count();
            if errors > 0 {
                bail!("{} error(s) found", errors);
            }
        }

        Commands::Lower { program } => {
            let program = read_program(&program)?;
            let optimized = optimize(&program, &OptimizerOptions::from(&config.optimizer));
            for diagnostic in &optimized.diagnostics {
                eprintln!("{}", diagnostic);
            }
            if optimized.has_errors() {
                bail!("program has errors; not lowered");
            }
            println!("{}", serde_json::to_string_pretty(&optimized.program)?);
        }

        Commands::Run {
            program,
            debug,
            breakpoints,
            args,
        } => {
            let program = read_program(&program)?;
            run_program(program, config, debug, breakpoints, args).await?;
        }
    }

    Ok(())
}

fn read_program(path: &Path) -> Result<Program> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("{} is not a valid program", path.display()))
}

async fn run_program(
    program: Program,
    config: Config,
    debug: bool,
    breakpoints: Vec<usize>,
    args: Vec<String>,
) -> Result<()> {
    let host = Arc::new(StdHost::new());
    let session = Arc::new(Session::new(
        program,
        Arc::clone(&host) as Arc<dyn HostInterop>,
        config,
    ));
    for line in breakpoints.into_iter().filter(|line| *line > 0) {
        session.set_breakpoint(line - 1);
    }

    let prompt = debug.then(|| tokio::spawn(debug_prompt(Arc::clone(&session))));

    let outcome = if debug {
        session.start_debug(args).await
    } else {
        session.start_release(args).await
    };
    if let Some(prompt) = prompt {
        prompt.abort();
    }

    for line in host.console_output() {
        println!("{}", line);
    }

    match outcome {
        Ok(value) => {
            println!("Result: {}", serde_json::to_string(&value)?);
            println!("State: {}", session.state());
            if session.state() == SessionState::StoppedWithError {
                bail!("program failed");
            }
            Ok(())
        }
        Err(SessionError::Runtime(err)) => {
            println!("State: {}", session.state());
            if let Some(node) = &err.node {
                eprintln!("  in {}", node);
            }
            if let Some(span) = err.span {
                eprintln!("  at {}", span);
            }
            Err(err.into())
        }
        Err(err) => {
            println!("State: {}", session.state());
            Err(err.into())
        }
    }
}

/// Minimal stdin debugger: whenever the session pauses, show where and read
/// `s` (step), `c` (continue) or `q` (quit)
async fn debug_prompt(session: Arc<Session>) {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let change = match events.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        };
        if change.state.is_terminal() {
            return;
        }
        if change.state != SessionState::Paused {
            continue;
        }

        if let Some(info) = &change.debug_info {
            if let Some(frame) = info.frames.first() {
                eprintln!("paused in {} at {}", frame.method, frame.span);
                for variable in &frame.variables {
                    eprintln!("  {} = {}", variable.name, variable.value);
                }
            }
        }

        loop {
            eprint!("(s)tep, (c)ontinue, (q)uit> ");
            let command = match lines.next_line().await {
                Ok(Some(line)) => line,
                // No more input: let the program finish
                _ => {
                    let _ = session.resume();
                    return;
                }
            };
            let result = match command.trim() {
                "s" | "step" => session.next_step(),
                "c" | "continue" => session.resume(),
                "q" | "quit" => {
                    session.stop().await;
                    return;
                }
                _ => continue,
            };
            if let Err(err) = result {
                eprintln!("{}", err);
                continue;
            }
            break;
        }
    }
}
