//! Sofa - SOAC fusion driver
//!
//! Reads a program in JSON form, fuses it, and prints or evaluates it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sofa_fusion::{fuse_program, FusionConfig, OptLevel};
use sofa_intern::Symbol;
use sofa_ir::eval::{Evaluator, Value};
use sofa_ir::Program;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Producer/consumer fusion for array combinator programs
#[derive(Parser, Debug)]
#[command(name = "sofa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Output formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The program as JSON
    Json,
    /// Human-readable source
    Pretty,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Fuse a program
    Fuse {
        /// Input program (JSON)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file; stdout if omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        emit: Emit,

        /// Print the per-binding fusion report to stderr
        #[arg(long)]
        report: bool,

        /// Optimization level (0-3)
        #[arg(short = 'O', long, default_value = "2")]
        opt_level: u8,
    },

    /// Pretty-print a program
    Print {
        /// Input program (JSON)
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Evaluate a function of a program
    Eval {
        /// Input program (JSON)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Function to call
        #[arg(long)]
        fun: String,

        /// Arguments as a JSON array of values
        #[arg(long, default_value = "[]")]
        args: String,

        /// Fuse the program before evaluating it
        #[arg(long)]
        fused: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Fuse {
            input,
            output,
            emit,
            report,
            opt_level,
        } => fuse_file(&input, output.as_deref(), emit, report, opt_level),
        Commands::Print { input } => {
            let program = read_program(&input)?;
            println!("{program}");
            Ok(())
        }
        Commands::Eval {
            input,
            fun,
            args,
            fused,
        } => eval_file(&input, &fun, &args, fused),
    }
}

fn read_program(path: &Path) -> Result<Program> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Fuse a program file
fn fuse_file(
    input: &Path,
    output: Option<&Path>,
    emit: Emit,
    show_report: bool,
    opt_level: u8,
) -> Result<()> {
    let program = read_program(input)?;
    let config = FusionConfig::from_opt_level(OptLevel::from_number(opt_level));
    tracing::info!("Fusing {} function(s) from {}", program.funs.len(), input.display());

    let (fused, report) = fuse_program(program, &config);
    if show_report {
        eprintln!("{report}");
    }

    let text = match emit {
        Emit::Json => serde_json::to_string_pretty(&fused).context("serializing program")?,
        Emit::Pretty => fused.to_string(),
    };
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Generated: {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

/// Evaluate one function of a program file
fn eval_file(input: &Path, fun: &str, args: &str, fused: bool) -> Result<()> {
    let mut program = read_program(input)?;
    if fused {
        program = fuse_program(program, &FusionConfig::default()).0;
    }
    let args: Vec<Value> = serde_json::from_str(args).context("parsing --args")?;
    let name = Symbol::intern(fun);
    if program.fun(name).is_none() {
        bail!("no function named `{fun}` in {}", input.display());
    }

    let evaluator = Evaluator::new(&program);
    let value = evaluator
        .call(name, args)
        .with_context(|| format!("evaluating {fun}"))?;
    println!("{value}");
    Ok(())
}
