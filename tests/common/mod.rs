//! Shared test harness: runs Lox source through the full pipeline against a
//! captured output writer.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use loxi::ast::NodeIds;
use loxi::interpreter::{Control, Interpreter, Unwind};
use loxi::parser::Parser;
use loxi::resolver::Resolver;
use loxi::scanner::Scanner;
use loxi::token::Token;

/// Writer handing every byte to a shared buffer the test can read back.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

/// How a run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Run {
    Ok,
    /// A scan, parse, or resolve error stopped the run before evaluation.
    Static,
    /// A runtime error unwound; carries the error message.
    Runtime(String),
}

pub struct Harness {
    pub interpreter: Interpreter,
    ids: NodeIds,
    buf: SharedBuf,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(false)
    }

    pub fn with_config(strict_uninitialized: bool) -> Self {
        let buf = SharedBuf::default();
        let interpreter =
            Interpreter::with_output(false, strict_uninitialized, Box::new(buf.clone()));
        Harness {
            interpreter,
            ids: NodeIds::new(),
            buf,
        }
    }

    /// Full pipeline over one source unit; the interpreter state persists
    /// across calls, REPL-style.
    pub fn run(&mut self, source: &str) -> Run {
        let scanner = Scanner::new(source.as_bytes().to_vec());

        let mut had_scan_error = false;
        let mut tokens: Vec<Token> = Vec::new();
        for result in scanner {
            match result {
                Ok(token) => tokens.push(token),
                Err(_) => had_scan_error = true,
            }
        }

        let mut parser = Parser::new(tokens, &mut self.ids);
        let statements = parser.parse();
        if had_scan_error || parser.had_error() {
            return Run::Static;
        }

        let resolved = {
            let mut resolver = Resolver::new(&mut self.interpreter);
            resolver.resolve(&statements)
        };
        if !resolved {
            return Run::Static;
        }

        for stmt in &statements {
            match self.interpreter.execute(stmt) {
                Ok(Control::Normal) => {}
                Ok(Control::Return(_)) => unreachable!("resolver rejects top-level returns"),

                Err(Unwind::Error(error)) => {
                    self.interpreter.gc.clear_locks();
                    return Run::Runtime(error.message);
                }

                Err(Unwind::Exit) => break,
            }
        }

        Run::Ok
    }

    pub fn output(&self) -> String {
        self.buf.contents()
    }
}

/// Runs one program start to finish and returns its stdout and status.
pub fn run_program(source: &str) -> (String, Run) {
    let mut harness = Harness::new();
    let run = harness.run(source);
    (harness.output(), run)
}
