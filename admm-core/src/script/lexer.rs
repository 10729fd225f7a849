//! Tokenizer.

use super::{ErrorCode, ScriptError, ScriptResult, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),

    Fn,
    Let,
    If,
    Else,
    Return,
    Raise,
    True,
    False,

    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Assign,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    AndAnd,
    OrOr,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,

    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Str(s) => format!("string {s:?}"),
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Fn => "fn",
            TokenKind::Let => "let",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Return => "return",
            TokenKind::Raise => "raise",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::EqEq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Number(_) | TokenKind::Str(_) | TokenKind::Ident(_) | TokenKind::Eof => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }
}

/// Split `source` into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    let mut cur = Cursor::new(source);
    let mut tokens = Vec::new();

    loop {
        let start = cur.span();
        let Some(c) = cur.bump() else {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: start,
            });
            return Ok(tokens);
        };

        let kind = match c {
            c if c.is_whitespace() => continue,
            '#' => {
                cur.skip_line();
                continue;
            }
            '/' if cur.peek() == Some('/') => {
                cur.skip_line();
                continue;
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '=' if cur.eat('=') => TokenKind::EqEq,
            '=' => TokenKind::Assign,
            '!' if cur.eat('=') => TokenKind::Ne,
            '!' => TokenKind::Bang,
            '<' if cur.eat('=') => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if cur.eat('=') => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '&' if cur.eat('&') => TokenKind::AndAnd,
            '|' if cur.eat('|') => TokenKind::OrOr,
            '"' | '\'' => lex_string(&mut cur, c, start)?,
            c if c.is_ascii_digit() || (c == '.' && cur.peek().is_some_and(|n| n.is_ascii_digit())) => {
                lex_number(&mut cur, c, start)?
            }
            c if c.is_alphabetic() || c == '_' => lex_word(&mut cur, c),
            other => {
                return Err(ScriptError::new(
                    ErrorCode::UnexpectedCharacter,
                    format!("unexpected character {other:?}"),
                    Some(start),
                ))
            }
        };

        tokens.push(Token { kind, span: start });
    }
}

fn lex_string(cur: &mut Cursor<'_>, quote: char, start: Span) -> ScriptResult<TokenKind> {
    let mut text = String::new();
    loop {
        match cur.bump() {
            None | Some('\n') => {
                return Err(ScriptError::new(
                    ErrorCode::UnterminatedString,
                    "unterminated string literal",
                    Some(start),
                ))
            }
            Some(c) if c == quote => return Ok(TokenKind::Str(text)),
            Some('\\') => match cur.bump() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(c @ ('\\' | '"' | '\'')) => text.push(c),
                Some(other) => {
                    text.push('\\');
                    text.push(other);
                }
                None => {
                    return Err(ScriptError::new(
                        ErrorCode::UnterminatedString,
                        "unterminated string literal",
                        Some(start),
                    ))
                }
            },
            Some(c) => text.push(c),
        }
    }
}

fn lex_number(cur: &mut Cursor<'_>, first: char, start: Span) -> ScriptResult<TokenKind> {
    let mut text = String::from(first);
    let mut seen_dot = first == '.';

    while let Some(c) = cur.peek() {
        if c.is_ascii_digit() || c == '_' {
            cur.bump();
            if c != '_' {
                text.push(c);
            }
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            cur.bump();
            text.push(c);
        } else {
            break;
        }
    }

    if matches!(cur.peek(), Some('e' | 'E')) {
        cur.bump();
        text.push('e');
        if let Some(sign @ ('+' | '-')) = cur.peek() {
            cur.bump();
            text.push(sign);
        }
        let mut digits = 0;
        while let Some(c) = cur.peek().filter(char::is_ascii_digit) {
            cur.bump();
            text.push(c);
            digits += 1;
        }
        if digits == 0 {
            return Err(ScriptError::new(
                ErrorCode::InvalidNumber,
                format!("missing exponent digits in `{text}`"),
                Some(start),
            ));
        }
    }

    text.parse::<f64>()
        .map(TokenKind::Number)
        .map_err(|_| ScriptError::new(ErrorCode::InvalidNumber, format!("invalid number `{text}`"), Some(start)))
}

fn lex_word(cur: &mut Cursor<'_>, first: char) -> TokenKind {
    let mut word = String::from(first);
    while let Some(c) = cur.peek().filter(|c| c.is_alphanumeric() || *c == '_') {
        cur.bump();
        word.push(c);
    }
    match word.as_str() {
        "fn" => TokenKind::Fn,
        "let" => TokenKind::Let,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "return" => TokenKind::Return,
        "raise" => TokenKind::Raise,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => TokenKind::Ident(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 1e-12 .5 3E2 1_000"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.5),
                TokenKind::Number(1e-12),
                TokenKind::Number(0.5),
                TokenKind::Number(300.0),
                TokenKind::Number(1000.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_and_comments() {
        let toks = kinds("a <= b # trailing\n// whole line\n!= == && || ^ !");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Le,
                TokenKind::Ident("b".into()),
                TokenKind::Ne,
                TokenKind::EqEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Caret,
                TokenKind::Bang,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_strings() {
        let toks = kinds(r#"fn let return raise "mul" 'div' "a\"b""#);
        assert_eq!(toks[0], TokenKind::Fn);
        assert_eq!(toks[1], TokenKind::Let);
        assert_eq!(toks[2], TokenKind::Return);
        assert_eq!(toks[3], TokenKind::Raise);
        assert_eq!(toks[4], TokenKind::Str("mul".into()));
        assert_eq!(toks[5], TokenKind::Str("div".into()));
        assert_eq!(toks[6], TokenKind::Str("a\"b".into()));
    }

    #[test]
    fn test_spans_are_one_based() {
        let toks = tokenize("x\n  y").unwrap();
        assert_eq!(toks[0].span, Span::new(1, 1));
        assert_eq!(toks[1].span, Span::new(2, 3));
    }

    #[test]
    fn test_errors() {
        let err = tokenize("let x = \"open").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnterminatedString);
        assert_eq!(err.span, Some(Span::new(1, 9)));

        let err = tokenize("1e+").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNumber);

        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedCharacter);
        assert_eq!(err.span, Some(Span::new(1, 3)));
    }
}
