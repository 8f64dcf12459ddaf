//! minlang CLI: `minlang [--backend=stack|register] [--debug] [--cpuprofile=<path>] <source-file>`.
//!
//! A clap-derived parser, a worker thread with an enlarged stack so deep
//! recursion doesn't blow the OS default, and panic-catching around the run
//! so a VM bug reports as an `internal error` instead of an unreadable
//! backtrace. A single flat command, since minlang's scope is
//! lex/parse/compile/run, not a multi-subcommand toolchain.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use miette::Result;

use minlang::{diagnostics, profiler::Profiler, Backend};

const STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "minlang", version, about = "minlang interpreter")]
struct Cli {
    /// Source file to run.
    source_file: PathBuf,

    /// Which bytecode back end to compile and run against.
    #[arg(long, value_enum, default_value = "register")]
    backend: CliBackend,

    /// Print a disassembly of the compiled bytecode to stderr before running.
    #[arg(long)]
    debug: bool,

    /// Write a folded-stack-style CPU profile to this path after running.
    #[arg(long, value_name = "PATH")]
    cpuprofile: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliBackend {
    Stack,
    Register,
}

impl From<CliBackend> for Backend {
    fn from(b: CliBackend) -> Backend {
        match b {
            CliBackend::Stack => Backend::Stack,
            CliBackend::Register => Backend::Register,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = std::thread::Builder::new()
        .name("minlang-worker".into())
        .stack_size(STACK_SIZE)
        .spawn(move || std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli))))
        .expect("failed to spawn minlang worker thread")
        .join();

    match result {
        Ok(inner) => inner,
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                format!("internal error (panic): {s}")
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                format!("internal error (panic): {s}")
            } else {
                "internal error: unexpected panic in minlang runtime".to_string()
            };
            Err(miette::miette!("{msg}"))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let source_name = cli.source_file.display().to_string();
    let source = std::fs::read_to_string(&cli.source_file).map_err(|e| miette::miette!("io error: cannot read '{source_name}': {e}"))?;

    let backend: Backend = cli.backend.into();
    let backend_name = match backend {
        Backend::Stack => "stack",
        Backend::Register => "register",
    };

    let mut profiler = cli.cpuprofile.is_some().then(|| Profiler::new(backend_name));

    let outcome = minlang::run(&source, backend, cli.debug, profiler.as_mut());

    if let Some(profiler) = profiler.as_mut() {
        profiler.finish();
    }
    if let (Some(path), Some(profiler)) = (&cli.cpuprofile, &profiler) {
        if let Err(e) = profiler.write_to(path) {
            eprintln!("io error: cannot write cpuprofile '{}': {e}", path.display());
        }
    }

    outcome.map_err(|e| diagnostics::report(&e, &source_name, &source))?;
    Ok(())
}
