use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "petra",
    version,
    about = "Petra compiler — a small Pascal-like language targeting RV32IM"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .p file to RISC-V assembly
    Build {
        /// Input .p source file
        input: PathBuf,
        /// Directory for the generated .S file
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Parse and analyze without emitting assembly
    Check {
        /// Input .p source file
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Build { input, out_dir } => cmd_build(input, out_dir),
        Command::Check { input } => cmd_check(input),
    }
}

fn cmd_build(input: PathBuf, out_dir: PathBuf) {
    let source = read_source(&input);
    let filename = input.display().to_string();

    let mut program = match petra::parse_source(&source, &filename) {
        Ok(program) => program,
        Err(_) => process::exit(1),
    };
    if petra::analyze(&mut program, &filename, &source).is_err() {
        process::exit(1);
    }

    let out_path = output_path(&input, &out_dir);
    let file = match File::create(&out_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: cannot create '{}': {}", out_path.display(), e);
            process::exit(1);
        }
    };
    if let Err(e) = petra::emit::generate(&program, &filename, BufWriter::new(file)) {
        eprintln!("error: cannot write '{}': {}", out_path.display(), e);
        process::exit(1);
    }
    eprintln!("Compiled -> {}", out_path.display());
}

fn cmd_check(input: PathBuf) {
    let source = read_source(&input);
    let filename = input.display().to_string();
    if petra::check(&source, &filename).is_err() {
        process::exit(1);
    }
}

fn read_source(input: &Path) -> String {
    match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    }
}

/// Output path: the input's file stem with a `.S` extension, inside `out_dir`.
fn output_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("out");
    out_dir.join(format!("{}.S", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_strips_directory_and_extension() {
        let path = output_path(Path::new("tests/cases/fib.p"), Path::new("."));
        assert_eq!(path, PathBuf::from("./fib.S"));
    }

    #[test]
    fn test_output_path_honors_out_dir() {
        let path = output_path(Path::new("fib.p"), Path::new("build"));
        assert_eq!(path, PathBuf::from("build/fib.S"));
    }

    #[test]
    fn test_output_path_strips_only_final_extension() {
        let path = output_path(Path::new("a/b/demo.v2.p"), Path::new("out"));
        assert_eq!(path, PathBuf::from("out/demo.v2.S"));
    }
}
