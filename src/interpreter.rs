mod callable;
mod environment;

use std::{
    cell::RefCell,
    fmt::{Debug, Display},
    rc::Rc,
};

use tracing::debug;

use crate::{
    ast::{Expression, InfixOperator, Literal, LogicalOperator, Program, Statement, UnaryOperator},
    stack::ensure_sufficient_stack,
};

pub use self::{callable::Function, environment::Environment};

/// Default bound on nested user function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Closure(Rc<Function>),
    Nil,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Boolean(b) => *b,
            _ => true,
        }
    }

    fn is_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    // Lox treats NaN as equal to itself
                    true
                } else {
                    a == b
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Nil, Value::Nil) => true,
            _ => false,
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Nil => Value::Nil,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Closure(c) => write!(f, "{}", c),
            Value::Nil => write!(f, "nil"),
        }
    }
}

/// How a statement finished: normally, or by a `return` that is still
/// travelling up to its function call.
#[derive(Debug)]
enum Completion {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    stdout: Rc<RefCell<dyn std::io::Write>>,
    call_depth: usize,
    max_call_depth: usize,
}

impl Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("globals", &self.globals)
            .field("environment", &self.environment)
            .field("call_depth", &self.call_depth)
            .finish()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Rc::new(RefCell::new(std::io::stdout())))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("[line {line}] Runtime error: {kind}")]
    Runtime {
        kind: ExecutionErrorKind,
        line: usize,
    },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

impl ExecutionError {
    pub fn kind(&self) -> Option<&ExecutionErrorKind> {
        match self {
            ExecutionError::Runtime { kind, .. } => Some(kind),
            ExecutionError::IO(_) => None,
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            ExecutionError::Runtime { line, .. } => Some(*line),
            ExecutionError::IO(_) => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionErrorKind {
    #[error("Invalid less than operation: {0} < {1}")]
    InvalidLess(Value, Value),
    #[error("Invalid less than or equal operation: {0} <= {1}")]
    InvalidLessEqual(Value, Value),
    #[error("Invalid greater than operation: {0} > {1}")]
    InvalidGreater(Value, Value),
    #[error("Invalid greater than or equal operation: {0} >= {1}")]
    InvalidGreaterEqual(Value, Value),
    #[error("Invalid addition operation: {0} + {1}")]
    InvalidAdd(Value, Value),
    #[error("Invalid subtraction operation: {0} - {1}")]
    InvalidSub(Value, Value),
    #[error("Invalid multiplication operation: {0} * {1}")]
    InvalidMult(Value, Value),
    #[error("Invalid division operation: {0} / {1}")]
    InvalidDiv(Value, Value),
    #[error("Invalid negate operation: -{0}")]
    InvalidNegate(Value),
    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("Not a function: {0}")]
    NotAFunction(Value),
    #[error("Invalid function call: {name} expected {expected} arguments but got {got}")]
    InvalidFunctionCall {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Cannot return from top-level code")]
    ReturnFromTopLevel,
}

impl ExecutionErrorKind {
    fn at(self, line: usize) -> ExecutionError {
        ExecutionError::Runtime { kind: self, line }
    }
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn std::io::Write>>) -> Self {
        let globals = Environment::boxed(None);
        Self {
            environment: globals.clone(),
            globals,
            stdout,
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Runs top-level statements in order. The first runtime error stops
    /// the whole program.
    pub fn interpret(&mut self, program: &Program) -> Result<(), ExecutionError> {
        for stmt in program.0.iter() {
            self.execute(stmt)?;
        }
        debug!(statements = program.0.len(), "program finished");

        Ok(())
    }

    fn execute(&mut self, stmt: &Statement) -> Result<Completion, ExecutionError> {
        ensure_sufficient_stack(|| self.execute_statement(stmt))
    }

    fn execute_statement(&mut self, stmt: &Statement) -> Result<Completion, ExecutionError> {
        let completion = match stmt {
            Statement::Expression(expression) => {
                self.evaluate(expression)?;
                Completion::Normal
            }
            Statement::Print(expression) => {
                let value = self.evaluate(expression)?;
                writeln!(self.stdout.borrow_mut(), "{}", value)?;
                Completion::Normal
            }
            Statement::VarDeclaration {
                name, initializer, ..
            } => {
                let value = self.evaluate(initializer)?;
                self.environment.borrow_mut().define(name.as_str(), value);
                Completion::Normal
            }
            Statement::Block(statements) => {
                let scope = Environment::boxed(Some(self.environment.clone()));
                self.execute_in_scope(scope, |interpreter| {
                    interpreter.execute_statements(statements)
                })?
            }
            Statement::If(condition, then_branch, else_branch) => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)?
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?
                } else {
                    Completion::Normal
                }
            }
            Statement::While(condition, body) => {
                let mut completion = Completion::Normal;
                while self.evaluate(condition)?.is_truthy() {
                    completion = self.execute(body)?;
                    if let Completion::Return(_) = completion {
                        break;
                    }
                }
                completion
            }
            Statement::Function(decl) => {
                let function = Function {
                    decl: decl.clone(),
                    closure: self.environment.clone(),
                };
                self.environment
                    .borrow_mut()
                    .define(decl.name.as_str(), Value::Closure(Rc::new(function)));
                Completion::Normal
            }
            Statement::Return { value, line } => {
                if self.call_depth == 0 {
                    return Err(ExecutionErrorKind::ReturnFromTopLevel.at(*line));
                }
                let value = match value {
                    Some(value) => self.evaluate(value)?,
                    None => Value::Nil,
                };
                Completion::Return(value)
            }
        };

        Ok(completion)
    }

    fn execute_statements(&mut self, statements: &[Statement]) -> Result<Completion, ExecutionError> {
        for statement in statements {
            if let Completion::Return(value) = self.execute(statement)? {
                return Ok(Completion::Return(value));
            }
        }
        Ok(Completion::Normal)
    }

    /// Swaps in `scope` for the duration of `f`, restoring the previous
    /// environment however `f` exits.
    fn execute_in_scope<T>(
        &mut self,
        scope: Rc<RefCell<Environment>>,
        f: impl FnOnce(&mut Self) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        let prev = std::mem::replace(&mut self.environment, scope);
        let result = f(self);
        self.environment = prev;
        result
    }

    fn evaluate(&mut self, expression: &Expression) -> Result<Value, ExecutionError> {
        ensure_sufficient_stack(|| self.evaluate_expression(expression))
    }

    fn evaluate_expression(&mut self, expression: &Expression) -> Result<Value, ExecutionError> {
        match expression {
            Expression::Variable {
                name,
                scope_depth,
                line,
            } => self.look_up_variable(name, *scope_depth, *line),
            Expression::Literal(literal) => Ok(Value::from(literal)),
            Expression::Grouping(x) => self.evaluate(x),
            Expression::Logical(left, op, right) => {
                let left = self.evaluate(left)?;
                match op {
                    LogicalOperator::Or if left.is_truthy() => Ok(left),
                    LogicalOperator::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expression::Binary {
                left,
                operator,
                right,
                line,
            } => {
                let a = self.evaluate(left)?;
                let b = self.evaluate(right)?;
                binary(*operator, a, b).map_err(|kind| kind.at(*line))
            }
            Expression::Unary {
                operator,
                operand,
                line,
            } => {
                let x = self.evaluate(operand)?;
                match operator {
                    UnaryOperator::Negate => match x {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        x => Err(ExecutionErrorKind::InvalidNegate(x).at(*line)),
                    },
                    UnaryOperator::Not => Ok(Value::Boolean(!x.is_truthy())),
                }
            }
            Expression::Assign {
                name,
                expr,
                scope_depth,
                line,
            } => {
                let value = self.evaluate(expr)?;
                let assigned = match scope_depth {
                    Some(depth) => Environment::assign_at(&self.environment, *depth, name, value),
                    None => self.globals.borrow_mut().assign(name, value),
                };
                assigned.ok_or_else(|| ExecutionErrorKind::UndefinedVariable(name.clone()).at(*line))
            }
            Expression::Call { callee, args, line } => {
                let callee = self.evaluate(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;

                let function = match callee {
                    Value::Closure(function) => function,
                    callee => return Err(ExecutionErrorKind::NotAFunction(callee).at(*line)),
                };

                if args.len() != function.arity() {
                    return Err(ExecutionErrorKind::InvalidFunctionCall {
                        name: function.decl.name.clone(),
                        expected: function.arity(),
                        got: args.len(),
                    }
                    .at(*line));
                }

                function.call(self, args, *line)
            }
        }
    }

    /// Resolved names are read from exactly the recorded scope; anything
    /// the resolver left alone is a global.
    fn look_up_variable(
        &self,
        name: &str,
        scope_depth: Option<usize>,
        line: usize,
    ) -> Result<Value, ExecutionError> {
        let value = match scope_depth {
            Some(depth) => Environment::get_at(&self.environment, depth, name),
            None => self.globals.borrow().get(name),
        };
        value.ok_or_else(|| ExecutionErrorKind::UndefinedVariable(name.to_string()).at(line))
    }
}

fn binary(op: InfixOperator, a: Value, b: Value) -> Result<Value, ExecutionErrorKind> {
    match op {
        InfixOperator::Equal => Ok(Value::Boolean(a.is_equal(&b))),
        InfixOperator::NotEqual => Ok(Value::Boolean(!a.is_equal(&b))),
        InfixOperator::LessThan => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(a < b)),
            (a, b) => Err(ExecutionErrorKind::InvalidLess(a, b)),
        },
        InfixOperator::LessThanOrEqual => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(a <= b)),
            (a, b) => Err(ExecutionErrorKind::InvalidLessEqual(a, b)),
        },
        InfixOperator::GreaterThan => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(a > b)),
            (a, b) => Err(ExecutionErrorKind::InvalidGreater(a, b)),
        },
        InfixOperator::GreaterThanOrEqual => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(a >= b)),
            (a, b) => Err(ExecutionErrorKind::InvalidGreaterEqual(a, b)),
        },
        InfixOperator::Plus => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (a, b) => Err(ExecutionErrorKind::InvalidAdd(a, b)),
        },
        InfixOperator::Minus => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
            (a, b) => Err(ExecutionErrorKind::InvalidSub(a, b)),
        },
        InfixOperator::Multiply => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
            (a, b) => Err(ExecutionErrorKind::InvalidMult(a, b)),
        },
        InfixOperator::Divide => match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
            (a, b) => Err(ExecutionErrorKind::InvalidDiv(a, b)),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{parser, resolver::Resolver, tokenizer};

    fn run(source: &str) -> (Result<(), ExecutionError>, String) {
        let tokens = tokenizer::tokens(source).unwrap();
        let mut program = parser::program(&tokens).unwrap();
        Resolver::new().resolve(&mut program).unwrap();
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone());
        let result = interpreter.interpret(&program);
        let output = String::from_utf8(output.take()).unwrap();
        (result, output)
    }

    fn output(source: &str) -> String {
        let (result, output) = run(source);
        result.unwrap();
        output
    }

    fn error(source: &str) -> ExecutionError {
        run(source).0.unwrap_err()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(output("print 1 + 2 * 3;"), "7\n");
        assert_eq!(output("print (1 + 2) * 3 / 2;"), "4.5\n");
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(
            output("print nil; print true; print \"text\"; print -0.5; fun f() {} print f;"),
            "nil\ntrue\ntext\n-0.5\n<fn f>\n"
        );
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(
            output("print !nil; print !false; print !0; print !\"\";"),
            "true\ntrue\nfalse\nfalse\n"
        );
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(
            output("print nil or \"x\"; print 1 or 2; print 1 and 2; print nil and 2; print false or nil;"),
            "x\n1\n2\nnil\nnil\n"
        );
    }

    #[test]
    fn test_logical_short_circuit() {
        assert_eq!(
            output("var a = 0; fun bump() { a = a + 1; return true; } true or bump(); false and bump(); print a;"),
            "0\n"
        );
    }

    #[test]
    fn test_equality() {
        assert_eq!(
            output("print nil == nil; print nil == false; print 1 == 1; print \"a\" != \"a\"; print 0 / 0 == 0 / 0;"),
            "true\nfalse\ntrue\nfalse\ntrue\n"
        );
    }

    #[test]
    fn test_binary_operands_evaluate_left_to_right() {
        assert_eq!(
            output("fun l() { print \"l\"; return 1; } fun r() { print \"r\"; return 2; } print l() + r();"),
            "l\nr\n3\n"
        );
    }

    #[test]
    fn test_function_identity() {
        assert_eq!(
            output("fun f() {} fun g() {} var h = f; print f == h; print f == g;"),
            "true\nfalse\n"
        );
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(output("print \"foo\" + \"bar\";"), "foobar\n");
    }

    #[test]
    fn test_type_errors_name_operator_and_line() {
        let err = error("print 1;\nprint 1 + \"a\";");
        assert!(matches!(
            err.kind(),
            Some(ExecutionErrorKind::InvalidAdd(_, _))
        ));
        assert_eq!(err.line(), Some(2));
        assert_eq!(
            err.to_string(),
            "[line 2] Runtime error: Invalid addition operation: 1 + a"
        );

        assert!(matches!(
            error("print -\"a\";").kind(),
            Some(ExecutionErrorKind::InvalidNegate(_))
        ));
        assert!(matches!(
            error("print 1 < nil;").kind(),
            Some(ExecutionErrorKind::InvalidLess(_, _))
        ));
    }

    #[test]
    fn test_runtime_error_aborts_remaining_statements() {
        let (result, output) = run("print 1; print undefined; print 2;");
        assert!(matches!(
            result.unwrap_err().kind(),
            Some(ExecutionErrorKind::UndefinedVariable(name)) if name == "undefined"
        ));
        assert_eq!(output, "1\n");
    }

    #[test]
    fn test_assign_to_undefined_global() {
        assert!(matches!(
            error("x = 1;").kind(),
            Some(ExecutionErrorKind::UndefinedVariable(_))
        ));
    }

    #[test]
    fn test_block_restores_environment_after_return() {
        assert_eq!(
            output(
                "var a = \"outer\";
                fun f() { { var a = \"inner\"; { return a; } } }
                print f();
                print a;"
            ),
            "inner\nouter\n"
        );
    }

    #[test]
    fn test_return_inside_while_stops_loop() {
        assert_eq!(
            output("fun f() { var i = 0; while (true) { i = i + 1; if (i == 3) return i; } } print f();"),
            "3\n"
        );
    }

    #[test]
    fn test_implicit_nil_return() {
        assert_eq!(output("fun f() { 1; } print f(); fun g() { return; } print g();"), "nil\nnil\n");
    }

    #[test]
    fn test_arity_mismatch() {
        let err = error("fun f(a, b) {}\nf(1);");
        assert!(matches!(
            err.kind(),
            Some(ExecutionErrorKind::InvalidFunctionCall {
                expected: 2,
                got: 1,
                ..
            })
        ));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_calling_non_function() {
        assert!(matches!(
            error("var a = \"str\"; a();").kind(),
            Some(ExecutionErrorKind::NotAFunction(Value::String(_)))
        ));
    }

    #[test]
    fn test_arguments_evaluated_before_callee_check() {
        let (result, output) = run("fun side() { print \"side\"; return 1; } nil(side());");
        assert!(matches!(
            result.unwrap_err().kind(),
            Some(ExecutionErrorKind::NotAFunction(Value::Nil))
        ));
        assert_eq!(output, "side\n");
    }

    #[test]
    fn test_unbounded_recursion_is_reported() {
        let tokens = tokenizer::tokens("fun f(n) { return f(n + 1); }\nf(0);").unwrap();
        let mut program = parser::program(&tokens).unwrap();
        Resolver::new().resolve(&mut program).unwrap();
        let mut interpreter =
            Interpreter::new(Rc::new(RefCell::new(Vec::<u8>::new()))).with_max_call_depth(64);
        let err = interpreter.interpret(&program).unwrap_err();
        assert!(matches!(err.kind(), Some(ExecutionErrorKind::StackOverflow)));
        assert_eq!(interpreter.call_depth, 0);
    }

    #[test]
    fn test_runtime_return_containment() {
        // Skips the resolver, which would reject this statically.
        let tokens = tokenizer::tokens("return 1;").unwrap();
        let program = parser::program(&tokens).unwrap();
        let mut interpreter = Interpreter::new(Rc::new(RefCell::new(Vec::<u8>::new())));
        assert!(matches!(
            interpreter.interpret(&program).unwrap_err().kind(),
            Some(ExecutionErrorKind::ReturnFromTopLevel)
        ));
    }
}
