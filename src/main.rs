use std::fs::File;
use std::io::BufReader;
use std::io::Read as _;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use loxi::ast::NodeIds;
use loxi::interpreter::{Interpreter, Outcome};
use loxi::parser::Parser;
use loxi::resolver::Resolver;
use loxi::scanner::Scanner;
use loxi::token::Token;

use clap::error::ErrorKind;
use clap::Parser as ClapParser;

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Lox script to run; starts a REPL when omitted
    script: Option<PathBuf>,

    /// Report reads of declared-but-unassigned variables as runtime errors
    #[arg(long)]
    strict_uninitialized: bool,
}

enum RunStatus {
    Ok,
    HadError,
    HadRuntimeError,
    Exit,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Cli = match Cli::try_parse() {
        Ok(args) => args,

        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }

        Err(_) => {
            eprintln!("Usage: loxi [path]");
            std::process::exit(-1);
        }
    };

    match args.script {
        Some(script) => run_file(&script, args.strict_uninitialized),
        None => repl(args.strict_uninitialized),
    }
}

/// One trip through the pipeline: scan, parse, resolve, interpret. Stops
/// before evaluation when any stage reported an error.
fn run(
    source: Vec<u8>,
    repl_line: Option<usize>,
    interpreter: &mut Interpreter,
    ids: &mut NodeIds,
) -> RunStatus {
    let scanner = match repl_line {
        Some(line) => Scanner::for_line(source, line),
        None => Scanner::new(source),
    };

    let mut had_scan_error = false;
    let mut tokens: Vec<Token> = Vec::new();
    for result in scanner {
        match result {
            Ok(token) => tokens.push(token),

            Err(e) => {
                eprintln!("{}", e);
                had_scan_error = true;
            }
        }
    }

    let mut parser = Parser::new(tokens, ids);
    let statements = parser.parse();

    if had_scan_error || parser.had_error() {
        return RunStatus::HadError;
    }

    let mut resolver = Resolver::new(interpreter);
    if !resolver.resolve(&statements) {
        return RunStatus::HadError;
    }

    match interpreter.interpret(&statements) {
        Outcome::Ok => RunStatus::Ok,
        Outcome::RuntimeError => RunStatus::HadRuntimeError,
        Outcome::Exit => RunStatus::Exit,
    }
}

fn run_file(script: &Path, strict_uninitialized: bool) -> anyhow::Result<()> {
    let file = match File::open(script) {
        Ok(file) => file,

        Err(e) => {
            eprintln!("Could not open file {}: {}", script.display(), e);
            std::process::exit(-1);
        }
    };

    let mut buf: Vec<u8> = Vec::new();
    let mut reader: BufReader<File> = BufReader::new(file);
    reader.read_to_end(&mut buf)?;

    let mut interpreter = Interpreter::new(false, strict_uninitialized);
    let mut ids = NodeIds::new();

    match run(buf, None, &mut interpreter, &mut ids) {
        RunStatus::HadError => std::process::exit(65),
        RunStatus::HadRuntimeError => std::process::exit(70),
        RunStatus::Ok | RunStatus::Exit => Ok(()),
    }
}

fn repl(strict_uninitialized: bool) -> anyhow::Result<()> {
    println!("Welcome to LOXI, the Lox Interpreter");
    println!("Type 'help();' for help or 'quit();' to exit.");

    let mut interpreter = Interpreter::new(true, strict_uninitialized);
    let mut ids = NodeIds::new();

    let stdin = io::stdin();
    let mut line_number: usize = 1;

    loop {
        print!("{}> ", line_number);
        io::stdout().flush()?;

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            // EOF (Ctrl+D)
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
        let line = line.trim_end_matches(['\n', '\r']);

        let status = run(
            line.as_bytes().to_vec(),
            Some(line_number),
            &mut interpreter,
            &mut ids,
        );
        line_number += 1;

        if matches!(status, RunStatus::Exit) {
            break;
        }

        // Errors never end the session; each iteration starts with a clean
        // slate and a collection.
        interpreter.gc.collect();
    }

    Ok(())
}
