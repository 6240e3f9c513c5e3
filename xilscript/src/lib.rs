//! xilscript is the script engine of a hardware-in-the-loop simulation environment.
//!
//! It parses automation scripts, resolves their block structure once at load time and then
//! executes them cooperatively: one command per scheduler tick, with commands that need several
//! cycles (delays, waiting for conditions, starting external processes) polled on later ticks.
//!
//! Everything outside of the engine - the equation solver, the variable store and process
//! control - is reached through the [`ScriptHost`] trait.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use xilscript::{Script, ScriptHost, LocalVariables, ScriptState};
//!
//! struct Host;
//! impl ScriptHost for Host {
//!     fn solve_equation(&mut self, equation: &str, _locals: &dyn LocalVariables) -> Result<f64, String> {
//!         equation.trim().parse().map_err(|_| format!("cannot solve \"{equation}\""))
//!     }
//!     fn write_variable(&mut self, _name: &str, _value: f64) -> Result<(), String> {
//!         Ok(())
//!     }
//! }
//!
//! let mut script = Script::new(Host);
//! script.start(Path::new("test.xil")).unwrap();
//! while script.cyclic() == ScriptState::Running {}
//! ```

mod breakpoints;
mod cmdtable;
mod commands;
mod compiler;
mod executor;
mod filecache;
mod filestack;
mod host;
mod labels;
mod loader;
mod paramlist;
mod parser;
mod proc;
mod program;
mod scope;
mod script;
mod stack;
mod tokenizer;

use std::path::PathBuf;
use thiserror::Error;

pub use breakpoints::Breakpoint;
pub use commands::{
    CheckContext, CmdState, Command, CommandDescriptor, CommandRegistry, ExecContext, RawMode,
};
pub use compiler::StructureError;
pub use executor::RuntimeError;
pub use host::{LocalVariables, ProcessOptions, ScriptHost, VariableValue};
pub use parser::ParserError;
pub use script::{Position, Script, ScriptConfig, ScriptState};
pub use stack::{Frame, RefTarget, StackError};
pub use tokenizer::TokenizerError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScriptError {
    /// `FileOpenError`: An `IoError` that occurred while loading a script file
    #[error("Failed to load {filename}: {ioerror}")]
    FileOpenError {
        filename: PathBuf,
        ioerror: std::io::Error,
    },

    /// `FileReadError`: An `IoError` that occurred while reading from a script file
    #[error("Could not read from {filename}: {ioerror}")]
    FileReadError {
        filename: PathBuf,
        ioerror: std::io::Error,
    },

    /// `TokenizerError`: The source text could not be split into commands and parameters
    #[error("Tokenizer error: {tokenizer_error}")]
    TokenizerError { tokenizer_error: TokenizerError },

    /// `ParserError`: The script is syntactically or structurally invalid
    #[error("Parser error: {parser_error}")]
    ParserError { parser_error: ParserError },

    /// `RuntimeError`: Execution of the script was aborted
    #[error("Runtime error: {runtime_error}")]
    RuntimeError { runtime_error: RuntimeError },

    /// `InvalidState`: The requested operation is not possible in the current script state
    #[error("Operation \"{operation}\" is not possible while the script is in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ScriptState,
    },

    /// `BreakpointError`: A breakpoint could not be added or removed
    #[error("Breakpoint error: {description}")]
    BreakpointError { description: String },
}

impl From<TokenizerError> for ScriptError {
    fn from(tokenizer_error: TokenizerError) -> Self {
        ScriptError::TokenizerError { tokenizer_error }
    }
}

impl From<ParserError> for ScriptError {
    fn from(parser_error: ParserError) -> Self {
        ScriptError::ParserError { parser_error }
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(runtime_error: RuntimeError) -> Self {
        ScriptError::RuntimeError { runtime_error }
    }
}
