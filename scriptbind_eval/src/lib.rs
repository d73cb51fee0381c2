//! Scriptbind Eval
//!
//! Dynamic script evaluation for scriptbind.
//! This crate provides pluggable code hosts (an in-process interpreter,
//! a subprocess host and a disabled host), per-evaluation fragment handles,
//! and a session that checks evaluated scripts against their declared
//! contracts.

pub mod evaluator;
pub mod host;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod session;
pub mod value;

pub use evaluator::DynamicEvaluator;
pub use host::{host_from_config, CodeHost, DisabledHost, Fragment, ProcessHost, Symbol};
pub use interpreter::{Closure, Interpreter};
pub use session::{LoadedScript, ScriptSession};
pub use value::Value;
