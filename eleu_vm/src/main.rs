use std::{
    cell::RefCell,
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
    process::ExitCode,
    rc::Rc,
    time::Instant,
};

use clap::Parser;
use eleu_compile::{options::Options, EleuResult};

#[derive(Parser, Debug)]
#[command(name = "eleu", version, about = "Run an Eleu script")]
struct Cli {
    /// Use the tree-walking interpreter
    #[arg(long, conflicts_with = "vm")]
    int: bool,
    /// Use the bytecode VM (default)
    #[arg(long)]
    vm: bool,
    /// Write a trace of every executed VM instruction to FILE
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,
    /// Report only the first syntax error
    #[arg(long)]
    first_error: bool,
    file: PathBuf,
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read {}: {e}", cli.file.display());
            return ExitCode::FAILURE;
        }
    };

    let mut options = Options {
        only_first_error: cli.first_error,
        ..Default::default()
    };
    if let Some(path) = &cli.dump {
        match File::create(path) {
            Ok(file) => options.dump = Some(Rc::new(RefCell::new(BufWriter::new(file)))),
            Err(e) => {
                eprintln!("Failed to create {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let file = cli.file.to_string_lossy();
    let start = Instant::now();
    let result = if cli.int {
        eleu_compile::interpret(&source, &file, options)
    } else {
        eleu_vm::run(&source, &file, options)
    };
    eprintln!("Finished in {:?}: {result:?}", start.elapsed());

    if result == EleuResult::Ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
