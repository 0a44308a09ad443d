use std::{fmt::Display, rc::Rc};

use crate::stack::ensure_sufficient_stack;

#[derive(Debug, Clone, Default)]
pub struct Program(pub Vec<Statement>);

#[derive(Debug, Clone)]
pub enum Statement {
    Expression(Expression),
    VarDeclaration {
        name: String,
        initializer: Expression,
        line: usize,
    },
    Function(Rc<FunctionDecl>),
    Print(Expression),
    Block(Vec<Statement>),
    If(Expression, Box<Statement>, Option<Box<Statement>>),
    While(Expression, Box<Statement>),
    Return {
        value: Option<Expression>,
        line: usize,
    },
}

impl Statement {
    /// The statement a failed declaration is replaced with.
    pub fn no_op() -> Self {
        Statement::Expression(Expression::Literal(Literal::Nil))
    }

    /// Moves every nested node into the work lists, leaving `self` shallow.
    fn detach_children(
        &mut self,
        statements: &mut Vec<Statement>,
        expressions: &mut Vec<Expression>,
    ) {
        match self {
            Statement::Expression(expr)
            | Statement::Print(expr)
            | Statement::VarDeclaration {
                initializer: expr, ..
            } => expressions.push(expr.take()),
            Statement::Function(decl) => {
                // A body shared with live function values is left to them.
                if let Some(decl) = Rc::get_mut(decl) {
                    statements.append(&mut decl.body);
                }
            }
            Statement::Block(body) => statements.append(body),
            Statement::If(condition, then_branch, else_branch) => {
                expressions.push(condition.take());
                statements.push(std::mem::replace(then_branch.as_mut(), Statement::no_op()));
                if let Some(else_branch) = else_branch.take() {
                    statements.push(*else_branch);
                }
            }
            Statement::While(condition, body) => {
                expressions.push(condition.take());
                statements.push(std::mem::replace(body.as_mut(), Statement::no_op()));
            }
            Statement::Return { value, .. } => expressions.extend(value.take()),
        }
    }
}

/// Deeply nested programs are torn down from a work list rather than by
/// recursive drop glue, which would overflow the stack.
impl Drop for Program {
    fn drop(&mut self) {
        let mut statements = std::mem::take(&mut self.0);
        let mut expressions = Vec::new();
        loop {
            if let Some(mut statement) = statements.pop() {
                statement.detach_children(&mut statements, &mut expressions);
            } else if let Some(mut expression) = expressions.pop() {
                expression.detach_children(&mut expressions);
            } else {
                break;
            }
        }
    }
}

/// Shared between the syntax tree and every function value created from it.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub line: usize,
}

impl Expression {
    fn take(&mut self) -> Expression {
        std::mem::replace(self, Expression::Literal(Literal::Nil))
    }

    fn detach_children(&mut self, expressions: &mut Vec<Expression>) {
        match self {
            Expression::Variable { .. } | Expression::Literal(_) => {}
            Expression::Grouping(expr)
            | Expression::Unary { operand: expr, .. }
            | Expression::Assign { expr, .. } => expressions.push(expr.take()),
            Expression::Binary { left, right, .. } | Expression::Logical(left, _, right) => {
                expressions.push(left.take());
                expressions.push(right.take());
            }
            Expression::Call { callee, args, .. } => {
                expressions.push(callee.take());
                expressions.append(args);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expression {
    /// `scope_depth` is filled in by the resolver; `None` means a global lookup.
    Variable {
        name: String,
        scope_depth: Option<usize>,
        line: usize,
    },
    Literal(Literal),
    Grouping(Box<Expression>),
    Binary {
        left: Box<Expression>,
        operator: InfixOperator,
        right: Box<Expression>,
        line: usize,
    },
    Logical(Box<Expression>, LogicalOperator, Box<Expression>),
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
        line: usize,
    },
    Assign {
        name: String,
        expr: Box<Expression>,
        scope_depth: Option<usize>,
        line: usize,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
        line: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in &self.0 {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ensure_sufficient_stack(|| {
            match self {
                Statement::Expression(expr) => write!(f, "{};", expr),
                Statement::Print(expr) => write!(f, "print {};", expr),
                Statement::VarDeclaration {
                    name, initializer, ..
                } => write!(f, "var {} = {};", name, initializer),
                Statement::Block(statements) => {
                    writeln!(f, "{{")?;
                    for statement in statements {
                        writeln!(f, "{}", statement)?;
                    }
                    write!(f, "}}")
                }
                Statement::If(condition, then_branch, else_branch) => {
                    write!(f, "if ({}) {}", condition, then_branch)?;
                    if let Some(else_branch) = else_branch {
                        write!(f, " else {}", else_branch)?;
                    }
                    Ok(())
                }
                Statement::While(condition, body) => {
                    write!(f, "while ({}) {}", condition, body)
                }
                Statement::Function(decl) => {
                    let params = decl
                        .params
                        .iter()
                        .map(|param| param.name.as_str())
                        .collect::<Vec<_>>();
                    writeln!(f, "fun {}({}) {{", decl.name, params.join(", "))?;
                    for statement in &decl.body {
                        writeln!(f, "{}", statement)?;
                    }
                    write!(f, "}}")
                }
                Statement::Return { value, .. } => {
                    if let Some(value) = value {
                        write!(f, "return {};", value)
                    } else {
                        write!(f, "return;")
                    }
                }
            }
        })
    }
}

/// Renders expressions in fully parenthesised prefix form, e.g. `(+ 1 (* 2 3))`.
impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ensure_sufficient_stack(|| {
            match self {
                Expression::Variable {
                    name, scope_depth, ..
                } => match scope_depth {
                    Some(depth) => write!(f, "scope[{}].{}", depth, name),
                    None => write!(f, "{}", name),
                },
                Expression::Literal(literal) => write!(f, "{}", literal),
                Expression::Grouping(expr) => write!(f, "(group {})", expr),
                Expression::Binary {
                    left,
                    operator,
                    right,
                    ..
                } => write!(f, "({} {} {})", operator, left, right),
                Expression::Logical(left, operator, right) => {
                    write!(f, "({} {} {})", operator, left, right)
                }
                Expression::Unary {
                    operator, operand, ..
                } => write!(f, "({} {})", operator, operand),
                Expression::Assign {
                    name,
                    expr,
                    scope_depth,
                    ..
                } => match scope_depth {
                    Some(depth) => write!(f, "(= scope[{}].{} {})", depth, name, expr),
                    None => write!(f, "(= {} {})", name, expr),
                },
                Expression::Call { callee, args, .. } => {
                    write!(f, "(call {}", callee)?;
                    for arg in args {
                        write!(f, " {}", arg)?;
                    }
                    write!(f, ")")
                }
            }
        })
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Nil => write!(f, "nil"),
        }
    }
}

impl Display for InfixOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfixOperator::Equal => write!(f, "=="),
            InfixOperator::NotEqual => write!(f, "!="),
            InfixOperator::LessThan => write!(f, "<"),
            InfixOperator::LessThanOrEqual => write!(f, "<="),
            InfixOperator::GreaterThan => write!(f, ">"),
            InfixOperator::GreaterThanOrEqual => write!(f, ">="),
            InfixOperator::Plus => write!(f, "+"),
            InfixOperator::Minus => write!(f, "-"),
            InfixOperator::Multiply => write!(f, "*"),
            InfixOperator::Divide => write!(f, "/"),
        }
    }
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "and"),
            LogicalOperator::Or => write!(f, "or"),
        }
    }
}

impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
            UnaryOperator::Not => write!(f, "!"),
        }
    }
}
