//! Command-line arguments for the Bob VM driver.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bob-vm", version, about = "Run a compiled Bob bytecode (.bobc) file")]
pub struct Args {
    /// The bytecode file to execute
    pub file: PathBuf,

    /// Write program output to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Garbage collection threshold in bytes
    #[arg(long, default_value_t = 20 * 1024 * 1024)]
    pub gc_threshold: usize,

    /// Print the disassembled code-object tree instead of running it
    #[arg(long)]
    pub disassemble: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["bob-vm", "program.bobc"]);
        assert_eq!(args.file, PathBuf::from("program.bobc"));
        assert!(args.output.is_none());
        assert_eq!(args.gc_threshold, 20 * 1024 * 1024);
        assert!(!args.disassemble);

        let args = Args::parse_from([
            "bob-vm",
            "--gc-threshold",
            "1024",
            "--disassemble",
            "-o",
            "out.txt",
            "program.bobc",
        ]);
        assert_eq!(args.gc_threshold, 1024);
        assert!(args.disassemble);
        assert_eq!(args.output, Some(PathBuf::from("out.txt")));
    }
}
