use crate::token::{Slice, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unknown escape sequence: \\{0}")]
    UnknownEscape(char),
}

/// Turns source text into tokens, one at a time.
///
/// The lexer never fails outright: a malformed piece of input becomes a
/// `TokenKind::Error` token and the reason is kept until `take_error` is
/// called.
pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    pos: usize,
    start: usize,
    error: Option<LexError>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            start: 0,
            error: None,
        }
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    pub fn take_error(&mut self) -> Option<LexError> {
        self.error.take()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.current();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.current() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(kind, Slice::new(self.start, self.pos - self.start))
    }

    fn fail(&mut self, error: LexError) -> Token {
        self.error = Some(error);
        self.make(TokenKind::Error)
    }

    fn skip_whitespace(&mut self) {
        while let Some(byte) = self.current() {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek() == Some(b'/') => {
                    while let Some(byte) = self.current() {
                        if byte == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.pos;

        let Some(byte) = self.advance() else {
            return self.make(TokenKind::End);
        };

        match byte {
            b'(' => self.make(TokenKind::OpenParen),
            b')' => self.make(TokenKind::CloseParen),
            b'{' => self.make(TokenKind::OpenCurly),
            b'}' => self.make(TokenKind::CloseCurly),
            b',' => self.make(TokenKind::Comma),
            b'.' => self.make(TokenKind::Dot),
            b':' => self.make(TokenKind::Colon),
            b'-' => self.make(TokenKind::Minus),
            b'+' => self.make(TokenKind::Plus),
            b'/' => self.make(TokenKind::Slash),
            b'*' => self.make(TokenKind::Star),
            b'!' => {
                let kind = if self.matches(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make(kind)
            }
            b'"' => self.read_string(),
            b'0'..=b'9' => self.read_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_identifier(),
            _ => {
                // Step over the whole UTF-8 sequence so slices stay on char boundaries.
                let ch = self.source[self.start..].chars().next().unwrap_or('\u{fffd}');
                self.pos = self.start + ch.len_utf8();
                self.fail(LexError::UnexpectedCharacter(ch))
            }
        }
    }

    /// Consumes a string literal. The token's slice includes both quotes;
    /// escapes are validated here and decoded by `unescape`.
    fn read_string(&mut self) -> Token {
        loop {
            match self.advance() {
                Some(b'"') => return self.make(TokenKind::StringLiteral),
                Some(b'\\') => match self.current() {
                    Some(b'n' | b't' | b'r' | b'\\' | b'"' | b'0') => {
                        self.advance();
                    }
                    Some(_) => {
                        let ch = self.source[self.pos..].chars().next().unwrap_or('\u{fffd}');
                        self.pos += ch.len_utf8();
                        return self.fail(LexError::UnknownEscape(ch));
                    }
                    None => return self.fail(LexError::UnterminatedString),
                },
                Some(b'\n') | None => return self.fail(LexError::UnterminatedString),
                Some(_) => {}
            }
        }
    }

    fn read_number(&mut self) -> Token {
        while matches!(self.current(), Some(b'0'..=b'9')) {
            self.advance();
        }

        if self.current() == Some(b'.') && matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
            while matches!(self.current(), Some(b'0'..=b'9')) {
                self.advance();
            }
            return self.make(TokenKind::FloatLiteral);
        }

        self.make(TokenKind::IntLiteral)
    }

    fn read_identifier(&mut self) -> Token {
        while matches!(
            self.current(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.advance();
        }

        let text = &self.source[self.start..self.pos];
        self.make(TokenKind::keyword(text).unwrap_or(TokenKind::Identifier))
    }

    /// Lexes the whole input, including the final `End` token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            tokens.push(token);
            if token.kind == TokenKind::End {
                return tokens;
            }
        }
    }
}

/// Decodes the body of a string literal token (quotes included).
pub fn unescape(literal: &str) -> String {
    let body = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_punctuation_and_operators() {
        assert_eq!(
            kinds("( ) { } , . : - + / * ! != = == > >= < <="),
            vec![
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::OpenCurly,
                TokenKind::CloseCurly,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Colon,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("12 3.25 7."),
            vec![
                TokenKind::IntLiteral,
                TokenKind::FloatLiteral,
                TokenKind::IntLiteral,
                TokenKind::Dot,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("fn main let mut x_1 int"),
            vec![
                TokenKind::Fn,
                TokenKind::Identifier,
                TokenKind::Let,
                TokenKind::Mut,
                TokenKind::Identifier,
                TokenKind::Int,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_slices_are_byte_offsets() {
        let tokens = Lexer::new("let  value").tokenize();
        assert_eq!(tokens[1].slice, Slice::new(5, 5));
        assert_eq!(tokens[2].slice, Slice::new(10, 0));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 // the rest is ignored\n2"),
            vec![TokenKind::IntLiteral, TokenKind::IntLiteral, TokenKind::End]
        );
    }

    #[test]
    fn test_string_literal_includes_quotes() {
        let source = r#"print "hi\n""#;
        let tokens = Lexer::new(source).tokenize();
        assert_eq!(tokens[1].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[1].slice.text(source), r#""hi\n""#);
        assert_eq!(unescape(tokens[1].slice.text(source)), "hi\n");
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("\"abc");
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(lexer.take_error(), Some(LexError::UnterminatedString));
        assert_eq!(lexer.take_error(), None);
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new("1 # 2");
        lexer.next_token();
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.slice, Slice::new(2, 1));
        assert_eq!(lexer.take_error(), Some(LexError::UnexpectedCharacter('#')));
        assert_eq!(lexer.next_token().kind, TokenKind::IntLiteral);
    }

    #[test]
    fn test_non_ascii_character_keeps_boundaries() {
        let mut lexer = Lexer::new("é1");
        let token = lexer.next_token();
        assert_eq!(token.slice, Slice::new(0, 2));
        assert_eq!(lexer.next_token().kind, TokenKind::IntLiteral);
    }

    #[test]
    fn test_unknown_escape() {
        let mut lexer = Lexer::new(r#""\q""#);
        assert_eq!(lexer.next_token().kind, TokenKind::Error);
        assert_eq!(lexer.take_error(), Some(LexError::UnknownEscape('q')));
    }

    #[test]
    fn test_end_is_sticky() {
        let mut lexer = Lexer::new("");
        assert_eq!(lexer.next_token().kind, TokenKind::End);
        assert_eq!(lexer.next_token().kind, TokenKind::End);
    }
}
