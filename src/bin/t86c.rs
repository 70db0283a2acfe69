//! T86 compiler driver.
//!
//! Reads a program in the textual IR, compiles it and prints the assembled
//! listing. With `--run` the result is executed on the reference machine.

use clap::Parser;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use t86_backend::core::{CompilationSession, CompilerConfig, DEFAULT_ENTRY, DEFAULT_PHYSICAL_REGISTERS};
use t86_backend::{ir, Compiler};

#[derive(Parser, Debug)]
#[command(name = "t86c", version, about = "Compile textual IR to T86 assembly")]
struct Args {
    /// IR source file; standard input when omitted.
    file: Option<PathBuf>,

    /// Number of allocatable registers (R1..Rn).
    #[arg(short, long, default_value_t = DEFAULT_PHYSICAL_REGISTERS)]
    registers: usize,

    /// Entry function.
    #[arg(short, long, default_value = DEFAULT_ENTRY)]
    entry: String,

    /// Skip the peephole optimizer.
    #[arg(long)]
    no_opt: bool,

    /// Execute the program and print the value it returns.
    #[arg(long)]
    run: bool,

    /// Argument passed to the entry function (repeatable).
    #[arg(long = "arg", allow_negative_numbers = true)]
    args: Vec<i64>,

    /// Print compilation statistics.
    #[arg(long)]
    stats: bool,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn read_source(file: Option<&PathBuf>) -> io::Result<String> {
    match file {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let source = read_source(args.file.as_ref())?;
    let program = ir::parse(&source)?;

    let config = CompilerConfig::new()
        .with_registers(args.registers)
        .with_entry(args.entry.clone())
        .with_optimize(!args.no_opt);

    let arena = bumpalo::Bump::new();
    let session = CompilationSession::new(&arena);
    let compiler = Compiler::new(config, &session)?;
    let assembled = compiler.compile(&program)?;

    print!("{}", assembled.listing());
    if args.stats {
        eprint!("{}", session.stats());
    }
    if args.run {
        let result = assembled.run(&args.args)?;
        println!("; result = {}", result);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
