use crate::bytecode::compile::Compiler;
use crate::token::TokenKind;

/// Binding power of an operator, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

pub type ParseFn<'src> = fn(&mut Compiler<'src>, Precedence);

#[derive(Clone, Copy)]
pub struct ParseRule<'src> {
    pub prefix: Option<ParseFn<'src>>,
    pub infix: Option<ParseFn<'src>>,
    pub precedence: Precedence,
}

impl<'src> ParseRule<'src> {
    const NONE: ParseRule<'src> = ParseRule {
        prefix: None,
        infix: None,
        precedence: Precedence::None,
    };
}

/// Prefix/infix actions for every token kind. Built once per compiler and
/// never changed afterwards.
pub struct ParseRules<'src> {
    rules: [ParseRule<'src>; TokenKind::COUNT],
}

impl<'src> ParseRules<'src> {
    pub fn new() -> Self {
        let mut rules = [ParseRule::NONE; TokenKind::COUNT];

        let mut set = |kind: TokenKind,
                       prefix: Option<ParseFn<'src>>,
                       infix: Option<ParseFn<'src>>,
                       precedence: Precedence| {
            rules[kind as usize] = ParseRule {
                prefix,
                infix,
                precedence,
            };
        };

        set(
            TokenKind::OpenParen,
            Some(Compiler::grouping),
            Some(Compiler::call),
            Precedence::Call,
        );
        set(TokenKind::OpenCurly, Some(Compiler::block_expression), None, Precedence::None);
        set(TokenKind::Dot, None, Some(Compiler::dot), Precedence::Call);
        set(
            TokenKind::Minus,
            Some(Compiler::unary),
            Some(Compiler::binary),
            Precedence::Term,
        );
        set(TokenKind::Plus, None, Some(Compiler::binary), Precedence::Term);
        set(TokenKind::Slash, None, Some(Compiler::binary), Precedence::Factor);
        set(TokenKind::Star, None, Some(Compiler::binary), Precedence::Factor);
        set(TokenKind::Bang, Some(Compiler::unary), None, Precedence::None);
        set(TokenKind::BangEqual, None, Some(Compiler::binary), Precedence::Equality);
        set(TokenKind::EqualEqual, None, Some(Compiler::binary), Precedence::Equality);
        set(TokenKind::Greater, None, Some(Compiler::binary), Precedence::Comparison);
        set(TokenKind::GreaterEqual, None, Some(Compiler::binary), Precedence::Comparison);
        set(TokenKind::Less, None, Some(Compiler::binary), Precedence::Comparison);
        set(TokenKind::LessEqual, None, Some(Compiler::binary), Precedence::Comparison);
        set(TokenKind::Identifier, Some(Compiler::variable), None, Precedence::None);
        set(TokenKind::IntLiteral, Some(Compiler::literal), None, Precedence::None);
        set(TokenKind::FloatLiteral, Some(Compiler::literal), None, Precedence::None);
        set(TokenKind::StringLiteral, Some(Compiler::literal), None, Precedence::None);
        set(TokenKind::True, Some(Compiler::literal), None, Precedence::None);
        set(TokenKind::False, Some(Compiler::literal), None, Precedence::None);
        set(TokenKind::If, Some(Compiler::if_expression), None, Precedence::None);
        set(TokenKind::And, None, Some(Compiler::and), Precedence::And);
        set(TokenKind::Or, None, Some(Compiler::or), Precedence::Or);
        set(TokenKind::Int, Some(Compiler::conversion), None, Precedence::None);
        set(TokenKind::Float, Some(Compiler::conversion), None, Precedence::None);

        ParseRules { rules }
    }

    pub fn get(&self, kind: TokenKind) -> ParseRule<'src> {
        self.rules[kind as usize]
    }
}
