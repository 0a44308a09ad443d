use std::{cell::RefCell, rc::Rc};

use tracing::debug;

use crate::{
    ast::{
        Expression, FunctionDecl, InfixOperator, Literal, LogicalOperator, Parameter, Program,
        Statement, UnaryOperator,
    },
    stack::ensure_sufficient_stack,
    tokenizer::{Token, TokenType},
};

/// Upper bound on parameters in a declaration and arguments in a call.
pub const MAX_ARGUMENTS: usize = 255;

#[derive(Debug)]
pub struct ParseErrors(Vec<ParseErrorWithContext>);

impl ParseErrors {
    pub fn errors(&self) -> &[ParseErrorWithContext] {
        &self.0
    }
}

impl std::error::Error for ParseErrors {}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during parsing", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ParseErrorWithContext {
    pub error: ParseError,
    context: Vec<&'static str>,
    pub token: Option<Token>,
    remaining: usize,
}

impl ParseErrorWithContext {
    pub fn line(&self) -> Option<usize> {
        self.token.as_ref().map(|token| token.line)
    }
}

impl std::fmt::Display for ParseErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "While parsing {}", self.context.join(" > "))?;
        write!(f, "{}", self.error)?;
        if let Some(token) = &self.token {
            match token.token_type {
                TokenType::Eof => write!(f, " at line {} but found end of file", token.line)?,
                _ => write!(f, " at line {} but found \"{}\"", token.line, token.lexeme)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected \"{0}\"")]
    Expected(TokenType),
    #[error("Expected one of {0:?}")]
    ExpectedOneOf(Vec<TokenType>),
    #[error("Unexpected \"{0}\"")]
    Unexpected(TokenType),
    #[error("Expected identifier")]
    ExpectedIdentifier,
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("Can't have more than 255 parameters")]
    TooManyParameters,
    #[error("Can't have more than 255 arguments")]
    TooManyArguments,
}

/// Tracks the active grammar rules for error messages and collects every
/// error reported while parsing.
struct ParseContext {
    stack: RefCell<Vec<&'static str>>,
    errors: RefCell<Vec<ParseErrorWithContext>>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            stack: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
        }
    }

    fn push(&self, name: &'static str) -> ParseContextGuard {
        self.stack.borrow_mut().push(name);
        ParseContextGuard::new(self)
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }

    fn error(&self, error: ParseError, tokens: &[Token]) -> ParseErrorWithContext {
        ParseErrorWithContext {
            error,
            context: self.stack.borrow().clone(),
            token: tokens.first().cloned(),
            remaining: tokens.len(),
        }
    }

    fn report(&self, error: ParseErrorWithContext) {
        self.errors.borrow_mut().push(error);
    }
}

struct ParseContextGuard<'a> {
    context: &'a ParseContext,
}

impl<'a> ParseContextGuard<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self { context }
    }
}

impl<'a> Drop for ParseContextGuard<'a> {
    fn drop(&mut self) {
        self.context.pop();
    }
}

/// Parses a whole program. Every declaration that fails is reported and
/// skipped, so one call surfaces all independent syntax errors.
pub fn program(tokens: &[Token]) -> Result<Program, ParseErrors> {
    let context = ParseContext::new();
    let mut statements = Vec::new();
    let mut tokens = tokens;

    {
        let _guard = context.push("program");
        while !at_end(tokens) {
            let (stmt, rest) = declaration(&context, tokens);
            statements.push(stmt);
            tokens = rest;
        }
    }

    let errors = context.errors.take();
    if !errors.is_empty() {
        debug!(errors = errors.len(), "parsing failed");
        return Err(ParseErrors(errors));
    }

    debug!(statements = statements.len(), "parsed program");
    Ok(Program(statements))
}

fn at_end(tokens: &[Token]) -> bool {
    matches!(
        tokens.first().map(Token::token_type),
        None | Some(TokenType::Eof)
    )
}

fn line(tokens: &[Token]) -> usize {
    tokens.first().map_or(0, |token| token.line)
}

/// Discards tokens until just after a `;` or just before a token that
/// starts a new declaration.
fn synchronize(tokens: &[Token]) -> &[Token] {
    let mut tokens = tokens;
    while let Some((token, rest)) = tokens.split_first() {
        match token.token_type {
            TokenType::Eof => return tokens,
            TokenType::Semicolon => return rest,
            _ => tokens = rest,
        }

        if let Some(next) = tokens.first() {
            if matches!(
                next.token_type,
                TokenType::Class
                    | TokenType::Fun
                    | TokenType::Var
                    | TokenType::For
                    | TokenType::If
                    | TokenType::While
                    | TokenType::Print
                    | TokenType::Return
            ) {
                return tokens;
            }
        }
    }
    tokens
}

fn declaration<'a>(context: &ParseContext, tokens: &'a [Token]) -> (Statement, &'a [Token]) {
    ensure_sufficient_stack(|| {
        let _guard = context.push("declaration");
        let result = match tokens.first().map(Token::token_type) {
            Some(TokenType::Var) => var_declaration(context, &tokens[1..]),
            Some(TokenType::Fun) => function(context, &tokens[1..]),
            _ => statement(context, tokens),
        };

        match result {
            Ok(parsed) => parsed,
            Err(error) => {
                let failed_at = &tokens[tokens.len().saturating_sub(error.remaining)..];
                context.report(error);
                (Statement::no_op(), synchronize(failed_at))
            }
        }
    })
}

fn var_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("var_declaration");
    let line = line(tokens);
    let (name, tokens) = match_identifier(context, tokens)?;
    let (initializer, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Equal) => expression(context, &tokens[1..])?,
        _ => (Expression::Literal(Literal::Nil), tokens),
    };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((
        Statement::VarDeclaration {
            name,
            initializer,
            line,
        },
        tokens,
    ))
}

fn statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    ensure_sufficient_stack(|| {
        let _guard = context.push("statement");
        match tokens.first().map(Token::token_type) {
            Some(TokenType::Print) => print_statement(context, &tokens[1..]),
            Some(TokenType::Return) => return_statement(context, tokens),
            Some(TokenType::LeftBrace) => {
                let (statements, tokens) = block(context, &tokens[1..])?;
                Ok((Statement::Block(statements), tokens))
            }
            Some(TokenType::If) => if_statement(context, &tokens[1..]),
            Some(TokenType::While) => while_statement(context, &tokens[1..]),
            Some(TokenType::For) => for_statement(context, &tokens[1..]),
            _ => expression_statement(context, tokens),
        }
    })
}

fn function<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("function");
    let line = line(tokens);
    let (name, tokens) = match_identifier(context, tokens)?;
    let mut tokens = consume(context, tokens, TokenType::LeftParen)?;

    let mut params = vec![];
    if tokens.first().map(Token::token_type) != Some(&TokenType::RightParen) {
        loop {
            if params.len() >= MAX_ARGUMENTS {
                context.report(context.error(ParseError::TooManyParameters, tokens));
            }

            let param_line = self::line(tokens);
            let (param, rest) = match_identifier(context, tokens)?;
            params.push(Parameter {
                name: param,
                line: param_line,
            });
            tokens = rest;

            match tokens.first().map(Token::token_type) {
                Some(TokenType::Comma) => tokens = &tokens[1..],
                _ => break,
            }
        }
    }

    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((
        Statement::Function(Rc::new(FunctionDecl {
            name,
            params,
            body,
            line,
        })),
        tokens,
    ))
}

fn while_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("while_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let (body, tokens) = statement(context, tokens)?;
    Ok((Statement::While(condition, Box::new(body)), tokens))
}

fn if_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("if_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let (then_branch, tokens) = statement(context, tokens)?;
    if let Some(TokenType::Else) = tokens.first().map(Token::token_type) {
        let (else_branch, tokens) = statement(context, &tokens[1..])?;
        Ok((
            Statement::If(
                condition,
                Box::new(then_branch),
                Some(Box::new(else_branch)),
            ),
            tokens,
        ))
    } else {
        Ok((
            Statement::If(condition, Box::new(then_branch), None),
            tokens,
        ))
    }
}

/// `for` has no node of its own: it becomes an optional initializer wrapped
/// around a `while` whose body ends with the increment.
fn for_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("for_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;

    let (initializer, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (None, &tokens[1..]),
        Some(TokenType::Var) => {
            let (initializer, tokens) = var_declaration(context, &tokens[1..])?;
            (Some(initializer), tokens)
        }
        _ => {
            let (initializer, tokens) = expression_statement(context, tokens)?;
            (Some(initializer), tokens)
        }
    };

    let (condition, tokens) =
        if tokens.first().map(Token::token_type) != Some(&TokenType::Semicolon) {
            expression(context, tokens)?
        } else {
            (Expression::Literal(Literal::Boolean(true)), tokens)
        };

    let tokens = consume(context, tokens, TokenType::Semicolon)?;

    let (increment, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::RightParen) => (None, tokens),
        _ => {
            let (increment, tokens) = expression(context, tokens)?;
            (Some(increment), tokens)
        }
    };

    let tokens = consume(context, tokens, TokenType::RightParen)?;

    let (mut body, tokens) = statement(context, tokens)?;

    if let Some(increment) = increment {
        body = Statement::Block(vec![body, Statement::Expression(increment)]);
    }
    body = Statement::While(condition, Box::new(body));
    if let Some(initializer) = initializer {
        body = Statement::Block(vec![initializer, body]);
    }

    Ok((body, tokens))
}

/// Parses declarations up to and including the closing `}`.
fn block<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Statement>, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("block");
    let mut statements = Vec::new();
    let mut tokens = tokens;

    loop {
        match tokens.first().map(Token::token_type) {
            Some(TokenType::RightBrace) => return Ok((statements, &tokens[1..])),
            None | Some(TokenType::Eof) => {
                return Err(context.error(ParseError::Expected(TokenType::RightBrace), tokens))
            }
            _ => {
                let (stmt, rest) = declaration(context, tokens);
                statements.push(stmt);
                tokens = rest;
            }
        }
    }
}

fn expression_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("expression_statement");
    let (expr, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Statement::Expression(expr), tokens))
}

fn print_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("print_statement");
    let (expr, rest) = expression(context, tokens)?;
    let tokens = consume(context, rest, TokenType::Semicolon)?;
    Ok((Statement::Print(expr), tokens))
}

fn return_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Statement, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("return_statement");
    let line = line(tokens);
    let tokens = &tokens[1..];
    let (value, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (None, tokens),
        _ => {
            let (value, tokens) = expression(context, tokens)?;
            (Some(value), tokens)
        }
    };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Statement::Return { value, line }, tokens))
}

fn expression<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    ensure_sufficient_stack(|| {
        let _guard = context.push("expression");
        assignment(context, tokens)
    })
}

fn assignment<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("assignment");
    let (expr, rest) = logical_or(context, tokens)?;

    match rest.first().map(Token::token_type) {
        Some(TokenType::Equal) => {
            let (value, after) = assignment(context, &rest[1..])?;
            match expr {
                Expression::Variable { name, line, .. } => Ok((
                    Expression::Assign {
                        name,
                        expr: Box::new(value),
                        scope_depth: None,
                        line,
                    },
                    after,
                )),
                // Reported without unwinding: the rest of the statement is well formed.
                expr => {
                    context.report(context.error(ParseError::InvalidAssignmentTarget, rest));
                    Ok((expr, after))
                }
            }
        }
        _ => Ok((expr, rest)),
    }
}

fn binary<'a>(
    context: &ParseContext,
    precedence: impl Fn(
        &ParseContext,
        &'a [Token],
    ) -> Result<(Expression, &'a [Token]), ParseErrorWithContext>,
    operator: impl Fn(&Token) -> Option<InfixOperator>,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let (mut expr, mut tokens) = precedence(context, tokens)?;

    while let Some(token) = tokens.first() {
        let op = match operator(token) {
            Some(op) => op,
            None => break,
        };
        tokens = &tokens[1..];
        let (right, rest) = precedence(context, tokens)?;
        expr = Expression::Binary {
            left: Box::new(expr),
            operator: op,
            right: Box::new(right),
            line: token.line,
        };
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn logical<'a>(
    context: &ParseContext,
    precedence: impl Fn(
        &ParseContext,
        &'a [Token],
    ) -> Result<(Expression, &'a [Token]), ParseErrorWithContext>,
    token_type: TokenType,
    op: LogicalOperator,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let (mut expr, mut tokens) = precedence(context, tokens)?;

    while tokens.first().map(Token::token_type) == Some(&token_type) {
        let (right, rest) = precedence(context, &tokens[1..])?;
        expr = Expression::Logical(Box::new(expr), op, Box::new(right));
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn logical_or<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("logical_or");
    logical(
        context,
        logical_and,
        TokenType::Or,
        LogicalOperator::Or,
        tokens,
    )
}

fn logical_and<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("logical_and");
    logical(
        context,
        equality,
        TokenType::And,
        LogicalOperator::And,
        tokens,
    )
}

fn equality<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("equality");
    binary(
        context,
        comparison,
        |token| match token.token_type() {
            TokenType::EqualEqual => Some(InfixOperator::Equal),
            TokenType::BangEqual => Some(InfixOperator::NotEqual),
            _ => None,
        },
        tokens,
    )
}

fn comparison<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("comparison");
    binary(
        context,
        term,
        |token| match token.token_type() {
            TokenType::Less => Some(InfixOperator::LessThan),
            TokenType::LessEqual => Some(InfixOperator::LessThanOrEqual),
            TokenType::Greater => Some(InfixOperator::GreaterThan),
            TokenType::GreaterEqual => Some(InfixOperator::GreaterThanOrEqual),
            _ => None,
        },
        tokens,
    )
}

fn term<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("term");
    binary(
        context,
        factor,
        |token| match token.token_type() {
            TokenType::Plus => Some(InfixOperator::Plus),
            TokenType::Minus => Some(InfixOperator::Minus),
            _ => None,
        },
        tokens,
    )
}

fn factor<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("factor");
    binary(
        context,
        unary,
        |token| match token.token_type() {
            TokenType::Star => Some(InfixOperator::Multiply),
            TokenType::Slash => Some(InfixOperator::Divide),
            _ => None,
        },
        tokens,
    )
}

fn unary<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    ensure_sufficient_stack(|| {
        let _guard = context.push("unary");

        let operator = match tokens.first().map(Token::token_type) {
            Some(TokenType::Minus) => UnaryOperator::Negate,
            Some(TokenType::Bang) => UnaryOperator::Not,
            _ => return call(context, tokens),
        };

        let (operand, rest) = unary(context, &tokens[1..])?;
        Ok((
            Expression::Unary {
                operator,
                operand: Box::new(operand),
                line: line(tokens),
            },
            rest,
        ))
    })
}

fn call<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("call");
    let (mut expr, mut tokens) = primary(context, tokens)?;

    while let Some(TokenType::LeftParen) = tokens.first().map(Token::token_type) {
        let (args, line, rest) = arguments(context, &tokens[1..])?;
        expr = Expression::Call {
            callee: Box::new(expr),
            args,
            line,
        };
        tokens = rest;
    }

    Ok((expr, tokens))
}

/// Parses a call's argument list after the `(`, returning the line of the
/// closing paren alongside the arguments.
fn arguments<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Expression>, usize, &'a [Token]), ParseErrorWithContext> {
    let mut args = Vec::new();
    let mut tokens = tokens;

    if tokens.first().map(Token::token_type) == Some(&TokenType::RightParen) {
        return Ok((args, line(tokens), &tokens[1..]));
    }

    loop {
        if args.len() >= MAX_ARGUMENTS {
            context.report(context.error(ParseError::TooManyArguments, tokens));
        }

        let (arg, rest) = expression(context, tokens)?;
        args.push(arg);
        tokens = rest;

        match tokens.first().map(Token::token_type) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(TokenType::RightParen) => return Ok((args, line(tokens), &tokens[1..])),
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                    tokens,
                ))
            }
        }
    }
}

fn primary<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expression, &'a [Token]), ParseErrorWithContext> {
    let _guard = context.push("primary");
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::Unexpected(TokenType::Eof), tokens));
    };

    match (token.token_type(), &token.literal) {
        (
            TokenType::Number | TokenType::String | TokenType::True | TokenType::False,
            Some(literal),
        ) => Ok((Expression::Literal(literal.clone()), &tokens[1..])),
        (TokenType::Nil, _) => Ok((Expression::Literal(Literal::Nil), &tokens[1..])),
        (TokenType::LeftParen, _) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let tokens = consume(context, rest, TokenType::RightParen)?;
            Ok((Expression::Grouping(Box::new(expr)), tokens))
        }
        (TokenType::Identifier, _) => Ok((
            Expression::Variable {
                name: token.lexeme.clone(),
                scope_depth: None,
                line: token.line,
            },
            &tokens[1..],
        )),
        (token_type, _) => Err(context.error(ParseError::Unexpected(*token_type), tokens)),
    }
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    token_type: TokenType,
) -> Result<&'a [Token], ParseErrorWithContext> {
    match tokens.first().map(Token::token_type) {
        Some(t) if t == &token_type => Ok(&tokens[1..]),
        _ => Err(context.error(ParseError::Expected(token_type), tokens)),
    }
}

fn match_identifier<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(String, &'a [Token]), ParseErrorWithContext> {
    match tokens.first() {
        Some(token) if token.token_type == TokenType::Identifier => {
            Ok((token.lexeme.clone(), &tokens[1..]))
        }
        _ => Err(context.error(ParseError::ExpectedIdentifier, tokens)),
    }
}
