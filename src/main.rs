use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ember::vm::disasm;
use ember::vm::script::ProcKind;
use ember::{register_builtins, Compiler, Vm};

#[derive(Parser)]
#[command(name = "ember", version, about = "The ember scripting language")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile and run a script
    Run {
        file: PathBuf,
        /// Print per-stage timings after the run
        #[arg(long)]
        timings: bool,
    },
    /// Parse a script and print its canonical rendering
    Ast { file: PathBuf },
    /// Compile a script and print the disassembly
    Dis { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match Cli::parse().cmd {
        Cmd::Run { file, timings } => cmd_run(&file, timings),
        Cmd::Ast { file } => cmd_ast(&file),
        Cmd::Dis { file } => cmd_dis(&file),
    }
}

fn read(file: &PathBuf) -> anyhow::Result<(String, String)> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("cannot read '{}'", file.display()))?;
    Ok((file.display().to_string(), source))
}

fn cmd_run(file: &PathBuf, timings: bool) -> anyhow::Result<()> {
    let (name, source) = read(file)?;

    let compile_start = Instant::now();
    let mut compiler = Compiler::new("main");
    register_builtins(&mut compiler)?;
    let compiled = compiler.compile(&name, &source)?;
    let compile_time = compile_start.elapsed();

    let exec_start = Instant::now();
    let mut vm = Vm::new(&compiled.script);
    vm.run(&compiled.chunk)?;
    let exec_time = exec_start.elapsed();

    if timings {
        eprintln!();
        eprintln!("  ember | {}", name);
        eprintln!("  {}", "-".repeat(40));
        eprintln!(
            "  compile: {:>5} bytes, {} procs  ({:.2}ms)",
            compiled.chunk.len(),
            compiled.script.procs.len(),
            compile_time.as_secs_f64() * 1000.0
        );
        eprintln!("  run:                          ({:.2}ms)", exec_time.as_secs_f64() * 1000.0);
    }
    Ok(())
}

fn cmd_ast(file: &PathBuf) -> anyhow::Result<()> {
    let (name, source) = read(file)?;
    let ast = ember::parser::parse(&name, &source)?;
    println!("{}", ember::render(&ast));
    Ok(())
}

fn cmd_dis(file: &PathBuf) -> anyhow::Result<()> {
    let (name, source) = read(file)?;
    let mut compiler = Compiler::new("main");
    register_builtins(&mut compiler)?;
    let compiled = compiler.compile(&name, &source)?;
    print!("{}", disasm::disassemble(&compiled.chunk, "script"));
    for proc in &compiled.script.procs {
        if let ProcKind::Native(chunk) = &proc.kind {
            if !chunk.is_empty() {
                print!("{}", disasm::disassemble(chunk, &proc.name));
            }
        }
    }
    Ok(())
}
