use crate::diagnostics::{DEFAULT_TAB_SIZE, line_and_column};
use crate::token::{Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the token text instead of its kind
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const RED: &'static str = "\x1b[31m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, source: &str, tokens: &[Token]) {
        print!("{}", self.render(source, tokens));
    }

    pub fn render(&self, source: &str, tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            self.render_one(&mut out, source, token);
        }
        out
    }

    fn render_one(&self, out: &mut String, source: &str, token: &Token) {
        let position = line_and_column(source, token.slice.index, DEFAULT_TAB_SIZE);
        let category = Self::category(token.kind);
        let colr = if self.color { Self::color(token.kind) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let text = if self.show_debug_repr {
            format!("{:?}", token.kind)
        } else if token.kind == TokenKind::End {
            "END".to_string()
        } else {
            token.slice.text(source).to_string()
        };
        out.push_str(&format!(
            "[{:02}:{:02}] {}{:<8} {}{}\n",
            position.line, position.column, colr, category, text, reset
        ));
    }

    fn category(kind: TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            // common specials
            End => "EOF",
            Error => "ERROR",

            // literals
            IntLiteral => "INT",
            FloatLiteral => "FLOAT",
            StringLiteral => "STRING",
            True | False => "BOOL",

            // names
            Identifier => "IDENT",
            Bool | Int | Float | String => "TYPE",

            // structure
            OpenParen | CloseParen => "PAREN",
            OpenCurly | CloseCurly => "BRACE",
            Comma | Dot | Colon => "PUNCT",

            // ops / comparisons
            Plus | Minus | Star | Slash | Bang | Equal => "OP",
            EqualEqual | BangEqual | Less | LessEqual | Greater | GreaterEqual => "CMP",

            // everything else = keyword
            _ => "KEYWORD",
        }
    }

    fn color(kind: TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            End => Self::DIM,
            Error => Self::RED,
            StringLiteral => Self::GRN,
            IntLiteral | FloatLiteral | True | False => Self::CYN,
            Identifier => Self::YEL,
            Plus | Minus | Star | Slash | Bang | Equal => Self::MAG,
            EqualEqual | BangEqual | Less | LessEqual | Greater | GreaterEqual => Self::MAG,
            _ => Self::RESET,
        }
    }
}
