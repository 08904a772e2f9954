use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
    #[token("|")]
    Bar,
    #[token("=")]
    Equals,
    #[token("!=")]
    NotEquals,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("!")]
    Bang,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Source-like rendering for "found instead" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Caret => "^".into(),
            Token::Amp => "&".into(),
            Token::Bar => "|".into(),
            Token::Equals => "=".into(),
            Token::NotEquals => "!=".into(),
            Token::Less => "<".into(),
            Token::LessEq => "<=".into(),
            Token::Greater => ">".into(),
            Token::GreaterEq => ">=".into(),
            Token::Bang => "!".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBrace => "{".into(),
            Token::RBrace => "}".into(),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Number(n) => format!("{n}"),
            Token::Ident(s) => s.clone(),
        }
    }
}

/// Lex source code into a stream of tokens with positions.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        match result {
            Ok(token) => tokens.push((token, Span { start: range.start, end: range.end })),
            Err(()) => {
                return Err(LexError {
                    position: range.start,
                    snippet: source[range.clone()].to_string(),
                    suggestion: suggest_fix(&source[range]),
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    match bad_token {
        "%" => "Use mod(a, b) for the remainder.".into(),
        "#" => "Directives are not allowed inside a function body.".into(),
        "\"" => "Strings are not allowed in functions.".into(),
        s => format!("Unexpected character(s): '{s}'. Functions use numbers, identifiers and arithmetic operators."),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

// ── Token cursor ─────────────────────────────────────────────────────

/// Sequential reader with one token of pushback. Past the last token it
/// keeps returning `None` with an empty span at the end of the source.
pub struct TokenCursor {
    tokens: Vec<(Token, Span)>,
    /// Index of the token `next` returns.
    pos: usize,
    end: Span,
}

impl TokenCursor {
    pub fn new(tokens: Vec<(Token, Span)>, source_len: usize) -> Self {
        TokenCursor { tokens, pos: 0, end: Span { start: source_len, end: source_len } }
    }

    pub fn lex(source: &str) -> Result<Self, LexError> {
        Ok(TokenCursor::new(lex(source)?, source.len()))
    }

    pub fn next(&mut self) -> Option<&Token> {
        let idx = self.pos;
        self.pos = (self.pos + 1).min(self.tokens.len() + 1);
        self.tokens.get(idx).map(|(t, _)| t)
    }

    /// Steps back so the next `next` returns the current token again.
    pub fn unget(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// The token last returned by `next`.
    pub fn current(&self) -> Option<&Token> {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)).map(|(t, _)| t)
    }

    pub fn span(&self) -> Span {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)).map(|(_, s)| *s).unwrap_or(self.end)
    }

    /// Position of the current token in the stream.
    pub fn index(&self) -> usize {
        self.pos.saturating_sub(1)
    }

    /// Number as written, when the current token is one.
    pub fn float(&self) -> Option<f64> {
        match self.current() {
            Some(Token::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn ident(&self) -> Option<&str> {
        match self.current() {
            Some(Token::Ident(s)) => Some(s),
            _ => None,
        }
    }

    /// Rendering of the current token for error messages.
    pub fn describe(&self) -> String {
        match self.current() {
            Some(t) => format!("'{}'", t.describe()),
            None => "end of input".to_string(),
        }
    }
}
