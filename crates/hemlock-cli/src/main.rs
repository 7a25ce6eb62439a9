//! The `hemlock` command-line tool.
//!
//! Runs `.hml` source and `.hmlc`/`.hmlb` compiled files (dispatched on
//! magic bytes), compiles single files, and bundles whole module graphs.
//!
//! # Exit Codes
//!
//! - `0` - success
//! - `1` - runtime error
//! - `2` - parse error
//! - `3` - I/O error

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use hemlock::{ExcKind, Exception, Runner, bundle_file, compress_container};

/// The Hemlock interpreter and bundler.
#[derive(Parser)]
#[command(name = "hemlock")]
#[command(about = "Run, compile, and bundle Hemlock programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Script to run: `.hml` source or a compiled `.hmlc`/`.hmlb` file.
    file: Option<PathBuf>,

    /// Run a one-liner instead of a file.
    #[arg(short = 'c', value_name = "CODE", conflicts_with = "file")]
    code: Option<String>,

    /// Serialize the parsed AST of the given file to `.hmlc` (requires -o).
    #[arg(long, value_name = "FILE", conflicts_with_all = ["file", "code"])]
    compile: Option<PathBuf>,

    /// Bundle the file and its transitive imports into one `.hmlc`
    /// (requires -o).
    #[arg(long, value_name = "FILE", conflicts_with_all = ["file", "code", "compile"])]
    bundle: Option<PathBuf>,

    /// Output path for --compile / --bundle.
    #[arg(short = 'o', value_name = "OUT")]
    output: Option<PathBuf>,

    /// Emit a zlib-compressed `.hmlb` container instead of raw `.hmlc`.
    #[arg(long)]
    compress: bool,

    /// Retain line numbers in serialized output.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &Exception) -> u8 {
    match err.kind() {
        ExcKind::ParseError => 2,
        ExcKind::IOError => 3,
        _ => 1,
    }
}

fn dispatch(cli: &Cli) -> Result<(), Exception> {
    if let Some(source) = &cli.compile {
        let out = require_output(cli)?;
        let runner = Runner::load_file(source)?;
        let bytes = runner.compile(cli.debug);
        let bytes = if cli.compress {
            // Compiled single files may also ship compressed.
            compress_container(&bytes)
        } else {
            bytes
        };
        return write_output(&out, &bytes);
    }
    if let Some(entry) = &cli.bundle {
        let out = require_output(cli)?;
        let bytes = bundle_file(entry, cli.debug, cli.compress)?;
        return write_output(&out, &bytes);
    }
    if let Some(code) = &cli.code {
        Runner::new(code.clone(), "<command-line>")?.run()?;
        return Ok(());
    }
    if let Some(file) = &cli.file {
        Runner::load_file(file)?.run()?;
        return Ok(());
    }
    Err(Exception::new(
        ExcKind::IOError,
        "nothing to do: pass a file, -c CODE, --compile, or --bundle (see --help)",
    ))
}

fn require_output(cli: &Cli) -> Result<PathBuf, Exception> {
    cli.output
        .clone()
        .ok_or_else(|| Exception::new(ExcKind::IOError, "missing -o <out> for --compile/--bundle"))
}

fn write_output(path: &PathBuf, bytes: &[u8]) -> Result<(), Exception> {
    std::fs::write(path, bytes)
        .map_err(|err| Exception::new(ExcKind::IOError, format!("cannot write {}: {err}", path.display())))
}
