//! Centralised error hierarchy for the **Lox interpreter**.
//!
//! The front end (scanner, parser, resolver) converts its failure modes into
//! `LoxError` variants so that every static diagnostic renders in the single
//! canonical format `[line N] Error<location>: <message>`. This enables a
//! uniform `Result<T>` alias throughout the crate and ergonomic
//! inter-operation with `anyhow` at the binary boundary.
//!
//! Runtime failures are different animals: they unwind through the evaluator
//! on a non-local exit channel and print as `<message>` / `[line N]` on two
//! lines. They are carried by [`RuntimeError`] and never enter `LoxError`.
//!
//! The module **does not** print diagnostics itself.

use std::io;

use log::info;
use thiserror::Error;

use crate::token::{Token, TokenType};

/// Canonical static-error type used throughout the interpreter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoxError {
    /// Lexical (scanner) error with source line information.
    #[error("[line {line}] Error: {message}")]
    Lex {
        /// Human-readable description.
        message: String,

        /// 1-based line where the error occurred.
        line: usize,
    },

    /// Syntactic (parser) error, located at a token.
    #[error("[line {line}] Error{location}: {message}")]
    Parse {
        message: String,
        line: usize,
        location: String,
    },

    /// Static-analysis or resolution failure (e.g. early-binding errors).
    #[error("[line {line}] Error{location}: {message}")]
    Resolve {
        message: String,
        line: usize,
        location: String,
    },

    /// Wrapper around `std::io::Error` (transparent). Enables `?` on I/O ops.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoxError {
    /// Helper constructor for the **scanner**.
    pub fn lex<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Lex error: line={}, msg={}", line, message);

        LoxError::Lex { message, line }
    }

    /// Helper constructor for the **parser**, locating the error at `token`.
    pub fn parse<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Parse error: line={}, msg={}", token.line, message);

        LoxError::Parse {
            message,
            line: token.line,
            location: error_location(token),
        }
    }

    /// Helper constructor for the **resolver**, locating the error at `token`.
    pub fn resolve<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Resolve error: line={}, msg={}", token.line, message);

        LoxError::Resolve {
            message,
            line: token.line,
            location: error_location(token),
        }
    }
}

/// Location suffix for a token-anchored diagnostic: empty, ` at end`, or
/// ` at '<lexeme>'`.
fn error_location(token: &Token) -> String {
    match token.token_type {
        TokenType::EOF => " at end".to_string(),
        _ => format!(" at '{}'", token.lexeme),
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LoxError>;

/// A runtime failure raised by the evaluator. Printed to stderr as
/// `<message>` followed by `[line N]` and surfaced as exit code 70 in file
/// mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub line: usize,
}

impl RuntimeError {
    pub fn new<S: Into<String>>(line: usize, msg: S) -> Self {
        RuntimeError {
            message: msg.into(),
            line,
        }
    }

    /// Formats the two-line runtime diagnostic.
    pub fn report(&self) -> String {
        format!("{}\n[line {}]", self.message, self.line)
    }
}
