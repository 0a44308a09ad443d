use std::{cell::RefCell, fmt::Display, rc::Rc};

use tracing::trace;

use crate::ast::FunctionDecl;

use super::{
    environment::Environment, Completion, ExecutionError, ExecutionErrorKind, Interpreter, Value,
};

/// A user function bundled with the environment it was declared in.
#[derive(Clone)]
pub struct Function {
    pub decl: Rc<FunctionDecl>,
    pub closure: Rc<RefCell<Environment>>,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.decl.name)
            .field("params", &self.decl.params)
            .field("closure", &self.closure.as_ptr())
            .finish()
    }
}

impl Function {
    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    /// Runs the body in a fresh scope whose parent is the closure, never the
    /// caller's environment. `line` is the call site, used for errors.
    pub(super) fn call(
        &self,
        interpreter: &mut Interpreter,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, ExecutionError> {
        if interpreter.call_depth >= interpreter.max_call_depth {
            return Err(ExecutionErrorKind::StackOverflow.at(line));
        }

        let scope = Environment::boxed(Some(self.closure.clone()));
        for (param, arg) in self.decl.params.iter().zip(args) {
            scope.borrow_mut().define(param.name.as_str(), arg);
        }

        interpreter.call_depth += 1;
        trace!(name = %self.decl.name, depth = interpreter.call_depth, "call");
        let result = interpreter.execute_in_scope(scope, |interpreter| {
            interpreter.execute_statements(&self.decl.body)
        });
        interpreter.call_depth -= 1;

        match result? {
            Completion::Return(value) => Ok(value),
            Completion::Normal => Ok(Value::Nil),
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<fn {}>", self.decl.name)
    }
}
