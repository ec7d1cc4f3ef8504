use serde::{Deserialize, Serialize};

/// A byte range into the source text.
///
/// Every token and every emitted bytecode byte carries one, so errors at
/// compile time and at runtime can point back at the code that caused them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    pub index: usize,
    pub length: usize,
}

impl Slice {
    pub fn new(index: usize, length: usize) -> Self {
        Slice { index, length }
    }

    pub fn end(&self) -> usize {
        self.index + self.length
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.index..self.end()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    // Punctuation
    OpenParen,
    CloseParen,
    OpenCurly,
    CloseCurly,
    Comma,
    Dot,
    Colon,
    Minus,
    Plus,
    Slash,
    Star,
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
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    True,
    False,

    // Keywords
    Fn,
    Struct,
    Let,
    Mut,
    If,
    Else,
    While,
    For,
    Break,
    Return,
    Print,
    And,
    Or,

    // Type names
    Bool,
    Int,
    Float,
    String,

    Error,
    End,
}

impl TokenKind {
    pub const COUNT: usize = TokenKind::End as usize + 1;

    pub fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "fn" => TokenKind::Fn,
            "struct" => TokenKind::Struct,
            "let" => TokenKind::Let,
            "mut" => TokenKind::Mut,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "break" => TokenKind::Break,
            "return" => TokenKind::Return,
            "print" => TokenKind::Print,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "bool" => TokenKind::Bool,
            "int" => TokenKind::Int,
            "float" => TokenKind::Float,
            "string" => TokenKind::String,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub slice: Slice,
}

impl Token {
    pub fn new(kind: TokenKind, slice: Slice) -> Self {
        Token { kind, slice }
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::new(TokenKind::End, Slice::default())
    }
}
