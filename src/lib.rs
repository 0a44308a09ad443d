pub mod ast;
pub mod interpreter;
pub mod parser;
pub mod resolver;
mod stack;
pub mod tokenizer;

use std::{cell::RefCell, rc::Rc};

use interpreter::{ExecutionError, Interpreter};
use parser::ParseErrors;
use resolver::{Resolver, ResolverError};
use tokenizer::TokenizeError;

#[derive(Debug, thiserror::Error)]
pub enum LoxError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    Parse(#[from] ParseErrors),
    #[error(transparent)]
    Resolve(#[from] ResolverError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl LoxError {
    /// Process exit status for this error: 65 for static errors, 70 for
    /// runtime errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoxError::Tokenize(_) | LoxError::Parse(_) | LoxError::Resolve(_) => 65,
            LoxError::Execution(_) => 70,
        }
    }
}

/// A running session: globals and resolver state survive from one
/// [`Lox::run`] to the next.
#[derive(Debug)]
pub struct Lox {
    resolver: Resolver,
    interpreter: Interpreter,
}

impl Default for Lox {
    fn default() -> Self {
        Self::with_interpreter(Interpreter::default())
    }
}

impl Lox {
    pub fn new(stdout: Rc<RefCell<dyn std::io::Write>>) -> Self {
        Self::with_interpreter(Interpreter::new(stdout))
    }

    pub fn with_interpreter(interpreter: Interpreter) -> Self {
        Self {
            resolver: Resolver::new(),
            interpreter,
        }
    }

    /// Scans, parses, resolves and runs `source`. Nothing executes unless
    /// every static phase succeeded.
    pub fn run(&mut self, source: &str) -> Result<(), LoxError> {
        let tokens = tokenizer::tokens(source)?;
        let mut program = parser::program(&tokens)?;
        self.resolver.resolve(&mut program)?;
        self.interpreter.interpret(&program)?;
        Ok(())
    }
}
