use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    ast::{Expression, FunctionDecl, Program, Statement},
    stack::ensure_sufficient_stack,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingState {
    Declared,
    Defined,
}

#[derive(Debug, Clone, Copy)]
enum FunctionType {
    None,
    Function,
}

/// Static pass that records, on every variable reference and assignment,
/// how many scopes out from the running environment its binding lives.
///
/// The bottom scope stands for the globals. It only takes part in the
/// own-initializer check: references that land there are left unresolved
/// and looked up dynamically at runtime. It also outlives a single
/// [`Resolver::resolve`] call, so a session can resolve source
/// incrementally.
#[derive(Debug)]
pub struct Resolver {
    scopes: Vec<FxHashMap<String, BindingState>>,
    function_type: FunctionType,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    #[error("[line {line}] Cannot return from top-level code.")]
    ReturnFromTopLevel { line: usize },
    #[error("[line {line}] Already a variable named '{name}' in this scope.")]
    Redeclaration { name: String, line: usize },
    #[error("[line {line}] Cannot read local variable '{name}' in its own initializer.")]
    OwnInitializer { name: String, line: usize },
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Resolver {
        Resolver {
            scopes: vec![FxHashMap::default()],
            function_type: FunctionType::None,
        }
    }

    pub fn resolve(&mut self, program: &mut Program) -> Result<(), ResolverError> {
        let globals = self.scopes[0].clone();

        let result = program
            .0
            .iter_mut()
            .try_for_each(|statement| self.resolve_statement(statement));

        if result.is_err() {
            // Leave the session as it was before this unit.
            self.scopes.truncate(1);
            self.scopes[0] = globals;
            self.function_type = FunctionType::None;
        } else {
            debug!(globals = self.scopes[0].len(), "resolved program");
        }

        result
    }

    fn resolve_statement(&mut self, statement: &mut Statement) -> Result<(), ResolverError> {
        ensure_sufficient_stack(|| {
            match statement {
                Statement::Block(statements) => {
                    self.begin_scope();
                    self.resolve_statements(statements)?;
                    self.end_scope();
                }
                Statement::Expression(expression) => self.resolve_expression(expression)?,
                Statement::VarDeclaration {
                    name,
                    initializer,
                    line,
                } => {
                    self.declare(name, *line)?;
                    self.resolve_expression(initializer)?;
                    self.define(name);
                }
                Statement::Function(decl) => {
                    let decl = std::rc::Rc::make_mut(decl);
                    self.declare(&decl.name, decl.line)?;
                    self.define(&decl.name);
                    self.resolve_function(decl, FunctionType::Function)?;
                }
                Statement::Print(expression) => self.resolve_expression(expression)?,
                Statement::If(condition, then_branch, else_branch) => {
                    self.resolve_expression(condition)?;
                    self.resolve_statement(then_branch.as_mut())?;
                    if let Some(else_branch) = else_branch {
                        self.resolve_statement(else_branch.as_mut())?;
                    }
                }
                Statement::While(condition, body) => {
                    self.resolve_expression(condition)?;
                    self.resolve_statement(body.as_mut())?;
                }
                Statement::Return { value, line } => {
                    if let FunctionType::None = self.function_type {
                        return Err(ResolverError::ReturnFromTopLevel { line: *line });
                    }

                    if let Some(value) = value {
                        self.resolve_expression(value)?;
                    }
                }
            }

            Ok(())
        })
    }

    fn resolve_statements(&mut self, statements: &mut [Statement]) -> Result<(), ResolverError> {
        for statement in statements {
            self.resolve_statement(statement)?;
        }
        Ok(())
    }

    fn resolve_expression(&mut self, expression: &mut Expression) -> Result<(), ResolverError> {
        ensure_sufficient_stack(|| {
            match expression {
                Expression::Variable {
                    name,
                    scope_depth,
                    line,
                } => {
                    *scope_depth = self.resolve_local(name, *line)?;
                }
                Expression::Assign {
                    name,
                    expr,
                    scope_depth,
                    ..
                } => {
                    self.resolve_expression(expr)?;
                    *scope_depth = self.lookup(name, 0);
                }
                Expression::Literal(_) => {}
                Expression::Grouping(expression) => self.resolve_expression(expression)?,
                Expression::Binary { left, right, .. } | Expression::Logical(left, _, right) => {
                    self.resolve_expression(left)?;
                    self.resolve_expression(right)?;
                }
                Expression::Unary { operand, .. } => self.resolve_expression(operand)?,
                Expression::Call { callee, args, .. } => {
                    self.resolve_expression(callee)?;
                    for arg in args {
                        self.resolve_expression(arg)?;
                    }
                }
            };

            Ok(())
        })
    }

    /// A name still being initialized in the innermost scope is skipped so
    /// the initializer sees an outer binding of the same name, if any.
    fn resolve_local(&self, name: &str, line: usize) -> Result<Option<usize>, ResolverError> {
        let innermost = self.scopes.last().and_then(|scope| scope.get(name));
        if innermost != Some(&BindingState::Declared) {
            return Ok(self.lookup(name, 0));
        }

        let found_outside = self
            .scopes
            .iter()
            .rev()
            .skip(1)
            .any(|scope| scope.contains_key(name));
        if !found_outside {
            return Err(ResolverError::OwnInitializer {
                name: name.to_string(),
                line,
            });
        }

        Ok(self.lookup(name, 1))
    }

    /// Hop count to the nearest scope binding `name`, starting `skip` scopes
    /// out. Bindings in the global scope are reported as `None`.
    fn lookup(&self, name: &str, skip: usize) -> Option<usize> {
        let locals = self.scopes.len() - 1;
        self.scopes
            .iter()
            .rev()
            .take(locals)
            .enumerate()
            .skip(skip)
            .find(|(_, scope)| scope.contains_key(name))
            .map(|(depth, _)| depth)
    }

    fn resolve_function(
        &mut self,
        decl: &mut FunctionDecl,
        function_type: FunctionType,
    ) -> Result<(), ResolverError> {
        let enclosing_function = self.function_type;
        self.function_type = function_type;

        self.begin_scope();
        for param in &decl.params {
            self.declare(&param.name, param.line)?;
            self.define(&param.name);
        }
        self.resolve_statements(&mut decl.body)?;
        self.end_scope();

        self.function_type = enclosing_function;

        Ok(())
    }

    fn begin_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, line: usize) -> Result<(), ResolverError> {
        let is_global = self.scopes.len() == 1;
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };

        match scope.get(name) {
            // Globals may be redefined; an existing one stays readable.
            Some(_) if is_global => {}
            Some(_) => {
                return Err(ResolverError::Redeclaration {
                    name: name.to_string(),
                    line,
                })
            }
            None => {
                scope.insert(name.to_string(), BindingState::Declared);
            }
        }
        Ok(())
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), BindingState::Defined);
        }
    }
}
