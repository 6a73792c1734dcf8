//! Bob VM CLI entry point
//!
//! Deserializes a compiled bytecode file and executes it. Exit code is 0 on
//! success; deserialization and VM errors produce a one-line diagnostic and
//! a non-zero exit.

use anyhow::{Context, Result};
use bob_core::heap::Heap;
use bob_core::value::repr;
use bob_core::{loader, Vm};
use bob_vm::Args;
use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use tracing::{debug, Level};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    debug!("Bob VM v{}", bob_core::VERSION);
    debug!("Bytecode: {}", args.file.display());

    run(args)
}

fn run(args: Args) -> Result<()> {
    let mut heap = Heap::new();
    let code = loader::load_file(&mut heap, &args.file)
        .map_err(|e| anyhow::anyhow!("Deserialization error in {}: {}", args.file.display(), e))?;

    if args.disassemble {
        print!("{}", repr(&heap, code));
        return Ok(());
    }

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Unable to open for output: {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let mut vm = Vm::new(heap, sink);
    vm.set_gc_threshold(args.gc_threshold);
    debug!("GC threshold: {} bytes", args.gc_threshold);

    vm.run(code)
        .map_err(|e| anyhow::anyhow!("VM error: {}", e))?;

    debug!("Execution complete");
    Ok(())
}
