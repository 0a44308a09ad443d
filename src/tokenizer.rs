use std::fmt::Display;

use tracing::debug;

use crate::ast::Literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character tokens
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals
    Identifier,
    String,
    Number,

    // Keywords
    And,
    Class,
    Else,
    False,
    Fun,
    For,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    // End of file
    Eof,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenType::LeftParen => "(",
            TokenType::RightParen => ")",
            TokenType::LeftBrace => "{",
            TokenType::RightBrace => "}",
            TokenType::Comma => ",",
            TokenType::Dot => ".",
            TokenType::Minus => "-",
            TokenType::Plus => "+",
            TokenType::Semicolon => ";",
            TokenType::Slash => "/",
            TokenType::Star => "*",
            TokenType::Bang => "!",
            TokenType::BangEqual => "!=",
            TokenType::Equal => "=",
            TokenType::EqualEqual => "==",
            TokenType::Greater => ">",
            TokenType::GreaterEqual => ">=",
            TokenType::Less => "<",
            TokenType::LessEqual => "<=",
            TokenType::Identifier => "identifier",
            TokenType::String => "string",
            TokenType::Number => "number",
            TokenType::And => "and",
            TokenType::Class => "class",
            TokenType::Else => "else",
            TokenType::False => "false",
            TokenType::Fun => "fun",
            TokenType::For => "for",
            TokenType::If => "if",
            TokenType::Nil => "nil",
            TokenType::Or => "or",
            TokenType::Print => "print",
            TokenType::Return => "return",
            TokenType::Super => "super",
            TokenType::This => "this",
            TokenType::True => "true",
            TokenType::Var => "var",
            TokenType::While => "while",
            TokenType::Eof => "end of file",
        };
        write!(f, "{text}")
    }
}

/// A scanned token. Produced once by [`tokens`] and only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub line: usize,
}

impl Token {
    pub fn token_type(&self) -> &TokenType {
        &self.token_type
    }

    fn eof(line: usize) -> Self {
        Self {
            token_type: TokenType::Eof,
            lexeme: String::new(),
            literal: None,
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("[line {line}] Unexpected character '{character}'")]
    UnexpectedCharacter { character: char, line: usize },
    #[error("[line {line}] Unterminated string")]
    UnterminatedString { line: usize },
}

/// Scans the whole source, ending with a synthetic [`TokenType::Eof`] token.
pub fn tokens(source: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut remaining = source;
    let mut line = 1;

    loop {
        let (token, rest) = token(remaining, &mut line)?;
        remaining = rest;
        let is_eof = token.token_type == TokenType::Eof;
        tokens.push(token);
        if is_eof {
            break;
        }
    }

    debug!(count = tokens.len(), lines = line, "tokenized source");
    Ok(tokens)
}

fn token<'a>(mut source: &'a str, line: &mut usize) -> Result<(Token, &'a str), TokenizeError> {
    while let Some((_, rest)) = maximal(&[whitespace, comment], source) {
        *line += newlines(&source[..source.len() - rest.len()]);
        source = rest;
    }

    let Some(first) = source.chars().next() else {
        return Ok((Token::eof(*line), source));
    };

    let Some((token_type, rest)) = maximal(
        &[
            // Single-character tokens
            left_paren,
            right_paren,
            left_brace,
            right_brace,
            comma,
            dot,
            minus,
            plus,
            semicolon,
            slash,
            star,
            // one or two character tokens
            bang,
            bang_equal,
            equal,
            equal_equal,
            greater,
            greater_equal,
            less,
            less_equal,
            // literals and keywords
            identifier,
            string,
            number,
        ],
        source,
    ) else {
        return Err(match first {
            '"' => TokenizeError::UnterminatedString { line: *line },
            character => TokenizeError::UnexpectedCharacter {
                character,
                line: *line,
            },
        });
    };

    let lexeme = &source[..source.len() - rest.len()];
    let token = Token {
        token_type,
        lexeme: lexeme.to_string(),
        literal: literal(token_type, lexeme),
        line: *line,
    };
    // Strings may span lines; the token keeps its starting line.
    *line += newlines(lexeme);

    Ok((token, rest))
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}

fn literal(token_type: TokenType, lexeme: &str) -> Option<Literal> {
    match token_type {
        TokenType::Number => lexeme.parse().ok().map(Literal::Number),
        TokenType::String => Some(Literal::String(lexeme[1..lexeme.len() - 1].to_string())),
        TokenType::True => Some(Literal::Boolean(true)),
        TokenType::False => Some(Literal::Boolean(false)),
        _ => None,
    }
}

fn maximal<'a, T>(
    parsers: &[fn(&str) -> Option<(T, &str)>],
    source: &'a str,
) -> Option<(T, &'a str)> {
    let mut min_left = source.len() + 1;
    let mut max_match = None;

    let matching_parsers = parsers.iter().filter_map(|parser| parser(source));
    for (m, rest) in matching_parsers {
        let left = rest.len();
        if left < min_left {
            min_left = left;
            max_match = Some((m, rest));
        }
    }

    max_match
}

fn whitespace(source: &str) -> Option<((), &str)> {
    let len = source
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum();
    if len > 0 {
        Some(((), &source[len..]))
    } else {
        None
    }
}

fn comment(source: &str) -> Option<((), &str)> {
    if source.starts_with("//") {
        let len = source
            .chars()
            .take_while(|c| *c != '\n')
            .map(char::len_utf8)
            .sum();
        Some(((), &source[len..]))
    } else {
        None
    }
}

macro_rules! match_literal {
    ($name:ident, $word:literal, $token:expr) => {
        fn $name(source: &str) -> Option<(TokenType, &str)> {
            if source.starts_with($word) {
                Some(($token, &source[$word.len()..]))
            } else {
                None
            }
        }
    };
}

match_literal! { left_paren, "(", TokenType::LeftParen }
match_literal! { right_paren, ")", TokenType::RightParen }
match_literal! { left_brace, "{", TokenType::LeftBrace }
match_literal! { right_brace, "}", TokenType::RightBrace }
match_literal! { comma, ",", TokenType::Comma }
match_literal! { dot, ".", TokenType::Dot }
match_literal! { minus, "-", TokenType::Minus }
match_literal! { plus, "+", TokenType::Plus }
match_literal! { semicolon, ";", TokenType::Semicolon }
match_literal! { slash, "/", TokenType::Slash }
match_literal! { star, "*", TokenType::Star }
match_literal! { bang, "!", TokenType::Bang }
match_literal! { equal, "=", TokenType::Equal }
match_literal! { greater, ">", TokenType::Greater }
match_literal! { less, "<", TokenType::Less }
match_literal! { bang_equal, "!=", TokenType::BangEqual }
match_literal! { equal_equal, "==", TokenType::EqualEqual }
match_literal! { greater_equal, ">=", TokenType::GreaterEqual }
match_literal! { less_equal, "<=", TokenType::LessEqual }

fn keyword(word: &str) -> Option<TokenType> {
    let token_type = match word {
        "and" => TokenType::And,
        "class" => TokenType::Class,
        "else" => TokenType::Else,
        "false" => TokenType::False,
        "for" => TokenType::For,
        "fun" => TokenType::Fun,
        "if" => TokenType::If,
        "nil" => TokenType::Nil,
        "or" => TokenType::Or,
        "print" => TokenType::Print,
        "return" => TokenType::Return,
        "super" => TokenType::Super,
        "this" => TokenType::This,
        "true" => TokenType::True,
        "var" => TokenType::Var,
        "while" => TokenType::While,
        _ => return None,
    };
    Some(token_type)
}

fn identifier(source: &str) -> Option<(TokenType, &str)> {
    let mut chars = source.chars();

    let first = chars.next()?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return None;
    }

    let len = first.len_utf8()
        + chars
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .map(char::len_utf8)
            .sum::<usize>();

    let token_type = keyword(&source[..len]).unwrap_or(TokenType::Identifier);
    Some((token_type, &source[len..]))
}

fn string(source: &str) -> Option<(TokenType, &str)> {
    if !source.starts_with('"') {
        return None;
    }

    // No escape sequences: the first closing quote ends the literal.
    let len = source[1..].find('"')? + 2;
    Some((TokenType::String, &source[len..]))
}

fn number(source: &str) -> Option<(TokenType, &str)> {
    let digits = |s: &str| s.bytes().take_while(u8::is_ascii_digit).count();

    let mut len = digits(source);
    if len == 0 {
        return None;
    }

    // The fractional part needs at least one digit after the point.
    if source[len..].starts_with('.') {
        let fraction = digits(&source[len + 1..]);
        if fraction > 0 {
            len += 1 + fraction;
        }
    }

    Some((TokenType::Number, &source[len..]))
}

#[cfg(test)]
mod test {
    use super::*;

    fn token_types(source: &str) -> Vec<TokenType> {
        tokens(source)
            .unwrap()
            .into_iter()
            .map(|token| token.token_type)
            .collect()
    }

    #[test]
    fn test_tokens() {
        let source = "var x = 1;";
        let expected = vec![
            TokenType::Var,
            TokenType::Identifier,
            TokenType::Equal,
            TokenType::Number,
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_tokens_with_comments() {
        let source = "var x = 1; // comment";
        let expected = vec![
            TokenType::Var,
            TokenType::Identifier,
            TokenType::Equal,
            TokenType::Number,
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_tokens_with_string() {
        let tokens = tokens("var x = \"hello\";").unwrap();
        assert_eq!(tokens[3].token_type, TokenType::String);
        assert_eq!(tokens[3].lexeme, "\"hello\"");
        assert_eq!(
            tokens[3].literal,
            Some(Literal::String("hello".to_string()))
        );
    }

    #[test]
    fn test_tokens_with_number() {
        let tokens = tokens("12.5 7").unwrap();
        assert_eq!(tokens[0].literal, Some(Literal::Number(12.5)));
        assert_eq!(tokens[1].literal, Some(Literal::Number(7.0)));
    }

    #[test]
    fn test_trailing_dot_is_not_part_of_number() {
        let expected = vec![TokenType::Number, TokenType::Dot, TokenType::Eof];
        assert_eq!(token_types("1."), expected);
    }

    #[test]
    fn test_tokens_with_keywords() {
        let source = "var x = true;";
        let expected = vec![
            TokenType::Var,
            TokenType::Identifier,
            TokenType::Equal,
            TokenType::True,
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let tokens = tokens("orchid fun_ var").unwrap();
        assert_eq!(tokens[0].token_type, TokenType::Identifier);
        assert_eq!(tokens[0].lexeme, "orchid");
        assert_eq!(tokens[1].token_type, TokenType::Identifier);
        assert_eq!(tokens[2].token_type, TokenType::Var);
    }

    #[test]
    fn test_double_equal() {
        let source = "a==b != !c";
        let expected = vec![
            TokenType::Identifier,
            TokenType::EqualEqual,
            TokenType::Identifier,
            TokenType::BangEqual,
            TokenType::Bang,
            TokenType::Identifier,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokens("a\n// note\n\"two\nlines\" b\nc").unwrap();
        let lines: Vec<_> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 3, 4, 5, 5]);
    }

    #[test]
    fn test_unexpected_character() {
        assert_eq!(
            tokens("var a = 1;\n@").unwrap_err(),
            TokenizeError::UnexpectedCharacter {
                character: '@',
                line: 2
            }
        );
    }

    #[test]
    fn test_unterminated_string_reports_starting_line() {
        assert_eq!(
            tokens("\n\"abc\n\ndef").unwrap_err(),
            TokenizeError::UnterminatedString { line: 2 }
        );
    }
}
