//! # ATN Codec Library
//!
//! Convert between grammar-conforming text and a compact bit-packed
//! "chromosome" of parse decisions, for grammar-based fuzzing.
//! * `walker` encodes a parse tree against a grammar's transition
//!   networks and decodes any byte string back into valid text
//! * `stream` is the packed decision format with self-synchronizing
//!   rule headers and a pseudo-random fallback stream
//! * `mutation` transforms chromosomes as raw bytes
//! * `ipc` is the byte protocol dispatching servers speak
//!
//! The grammar arrives through the `atn` builder as a pair of
//! transition networks (parser and lexer), built once and shared
//! read-only by every walker.
//!
//! ## Decode Example
//!
//! ```rs
//! use atncodec::Walker;
//! let grammar = build_grammar(); // via atncodec::AtnBuilder
//! let mut walker = Walker::new(&grammar);
//! walker.set_deadline(std::time::Instant::now() + std::time::Duration::from_millis(500));
//! let text = walker.decode(&chromosome);
//! ```
//!
//! ## Repair Example
//!
//! ```rs
//! let repaired = atncodec::Walker::new(&grammar).repair(&mutated);
//! ```

pub mod atn;
pub mod intervals;
pub mod stream;
pub mod tree;
pub mod matcher;
pub mod route;
pub mod walker;
pub mod mutation;
pub mod ipc;
pub mod tools;

pub use atn::{Atn, AtnBuilder, Grammar, StateKind, Transition, TOKEN_EOF};
pub use intervals::{IntervalSet, LEXER_MAX_CHAR};
pub use mutation::{crossover, mutate};
pub use walker::Walker;

/// Protocol and construction errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("grammar has no rules")]
    EmptyGrammar,
    #[error("malformed grammar: {0}")]
    MalformedGrammar(&'static str),
    #[error("handshake failed")]
    Handshake,
    #[error("i/o failed")]
    Io(#[from] std::io::Error)
}
