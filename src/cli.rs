use std::{env, fs, path::PathBuf, process::ExitCode};

use anyhow::Context;

use fountain::error::{FountainError, FountainResult};
use fountain::interpreter::Interpreter;
use fountain::lexer::Lexer;
use fountain::parser::Parser;

const EXIT_USAGE: u8 = 1;
const EXIT_STATIC: u8 = 65;
const EXIT_RUNTIME: u8 = 70;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(EXIT_USAGE);
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("fountain {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "-c" => {
            if args.len() < 3 {
                eprintln!("Error: '-c' requires a code argument");
                eprintln!("Usage: fountain -c <code>");
                return ExitCode::from(EXIT_USAGE);
            }
            execute(&args[2], PathBuf::from("<command line>"))
        }
        "run" => {
            if args.len() < 3 {
                eprintln!("Error: 'run' requires a file argument");
                eprintln!("Usage: fountain run <file.ftn>");
                return ExitCode::from(EXIT_USAGE);
            }
            run_file(&args[2])
        }
        other => {
            eprintln!("Error: unknown command '{}'", other);
            print_usage();
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn print_usage() {
    eprintln!("Fountain language tool");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  fountain run <file.ftn>   Run a Fountain program");
    eprintln!("  fountain -c <code>        Run Fountain code given on the command line");
    eprintln!("  fountain help             Show this help message");
    eprintln!("  fountain version          Show version information");
}

fn run_file(file: &str) -> ExitCode {
    let source = match fs::read_to_string(file).with_context(|| format!("cannot read '{}'", file))
    {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    execute(&source, PathBuf::from(file))
}

fn execute(source: &str, file_path: PathBuf) -> ExitCode {
    match run(source, file_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(source: &str, file_path: PathBuf) -> FountainResult<()> {
    let tokens = Lexer::with_file(source, file_path.clone()).lex()?;
    let program =
        Parser::with_source_and_file(tokens, source.to_string(), file_path).parse_program()?;
    Interpreter::new().eval_program(&program)
}

/// Static errors (anything caught before the program runs) exit with 65,
/// runtime errors with 70, following the sysexits convention.
fn exit_code_for(err: &FountainError) -> u8 {
    match err {
        FountainError::Lex { .. }
        | FountainError::Parse { .. }
        | FountainError::ControlFlow { .. } => EXIT_STATIC,
        FountainError::Io(_) => EXIT_USAGE,
        FountainError::Type(_)
        | FountainError::Argument(_)
        | FountainError::UndefinedName(_)
        | FountainError::Assertion(_)
        | FountainError::Resource(_) => EXIT_RUNTIME,
    }
}
