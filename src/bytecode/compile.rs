use crate::bytecode::chunk::{Chunk, Function};
use crate::bytecode::compile_error::{CompileError, CompileErrors};
use crate::bytecode::op::Instruction;
use crate::bytecode::rules::{ParseRules, Precedence};
use crate::lang::{ValueKind, ValueType};
use crate::lexer::Lexer;
use crate::token::{Slice, Token, TokenKind};

/// Type expressions nest at most this deep (`fn(fn(int): int): int` is 2).
const MAX_TYPE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserMode {
    Normal,
    /// A hard error happened; errors are muted until the next declaration.
    Recovering,
}

#[derive(Debug, Clone)]
struct LocalVariable {
    name: Slice,
    ty: ValueType,
    mutable: bool,
    used: bool,
    /// Frame-relative index of the variable's first value slot.
    slot: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Scope {
    start: usize,
}

#[derive(Debug, Clone, Copy)]
struct LoopBreak {
    /// 1-based depth of the loop this break leaves.
    depth: usize,
    jump: usize,
}

/// What the last statement of a block left behind.
#[derive(Debug, Clone, Copy)]
enum StatementKind {
    Other,
    /// An expression statement; `pop_site` is where its pop was emitted.
    Expression { ty: ValueType, pop_site: usize },
    Return(ValueType),
}

/// Single-pass compiler: parses, type checks and emits bytecode as it goes.
pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    source: &'src str,
    pub(crate) previous: Token,
    pub(crate) current: Token,
    mode: ParserMode,
    pub(crate) rules: ParseRules<'src>,
    errors: Vec<CompileError>,
    pub(crate) chunk: Chunk,

    locals: Vec<LocalVariable>,
    /// Mirrors the runtime stack of the frame being compiled.
    type_stack: Vec<ValueType>,
    /// Frame slot count at the entry of each enclosing loop.
    loops: Vec<usize>,
    breaks: Vec<LoopBreak>,
    return_types: Vec<ValueType>,
}

impl<'src> Compiler<'src> {
    pub fn new(source: &'src str) -> Self {
        Self::with_chunk(source, Chunk::new())
    }

    /// Compiles into a chunk that may already hold native functions.
    pub fn with_chunk(source: &'src str, chunk: Chunk) -> Self {
        Compiler {
            lexer: Lexer::new(source),
            source,
            previous: Token::default(),
            current: Token::default(),
            mode: ParserMode::Normal,
            rules: ParseRules::new(),
            errors: Vec::new(),
            chunk,
            locals: Vec::new(),
            type_stack: Vec::new(),
            loops: Vec::new(),
            breaks: Vec::new(),
            return_types: Vec::new(),
        }
    }

    /// Compiles a whole program. Execution starts at `main`.
    pub fn compile(mut self) -> Result<Chunk, CompileErrors> {
        self.compile_program();
        self.finish()
    }

    /// Compiles a single expression. Its value is left on the stack when the
    /// chunk halts.
    pub fn compile_expression(mut self) -> Result<Chunk, CompileErrors> {
        self.advance();
        self.chunk.entry = self.chunk.code.len();
        self.expression();
        if !self.check(TokenKind::End) {
            self.hard_error(self.current.slice, "Expected end of expression");
        }
        self.pop_type();
        self.emit(Instruction::Halt);
        self.finish()
    }

    fn compile_program(&mut self) {
        self.advance();
        while !self.matches(TokenKind::End) {
            self.declaration();
        }
        self.emit_entry();
    }

    fn finish(self) -> Result<Chunk, CompileErrors> {
        if self.errors.is_empty() {
            Ok(self.chunk)
        } else {
            Err(CompileErrors(self.errors))
        }
    }

    // =========================================================================
    // Token cursor
    // =========================================================================

    pub(crate) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = match self.lexer.take_error() {
                Some(error) => capitalize(&error.to_string()),
                None => "Invalid token".to_string(),
            };
            self.hard_error(self.current.slice, message);
        }
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub(crate) fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.hard_error(self.current.slice, message);
        }
    }

    pub(crate) fn text(&self, slice: Slice) -> &'src str {
        slice.text(self.source)
    }

    /// Slice covering everything from `start` up to the previous token.
    pub(crate) fn span_from(&self, start: Slice) -> Slice {
        let end = self.previous.slice.end().max(start.end());
        Slice::new(start.index, end - start.index)
    }

    // =========================================================================
    // Errors
    // =========================================================================

    pub(crate) fn hard_error(&mut self, slice: Slice, message: impl Into<String>) {
        if self.mode == ParserMode::Recovering {
            return;
        }
        self.mode = ParserMode::Recovering;
        self.errors.push(CompileError::hard(slice, message));
    }

    pub(crate) fn soft_error(&mut self, slice: Slice, message: impl Into<String>) {
        if self.mode == ParserMode::Recovering {
            return;
        }
        self.errors.push(CompileError::soft(slice, message));
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.mode == ParserMode::Recovering
    }

    /// Skips to the next declaration and drops all per-function state.
    fn synchronize(&mut self) {
        while !self.check(TokenKind::End)
            && !self.check(TokenKind::Fn)
            && !self.check(TokenKind::Struct)
        {
            self.advance();
        }
        self.mode = ParserMode::Normal;
        self.locals.clear();
        self.type_stack.clear();
        self.loops.clear();
        self.breaks.clear();
        self.return_types.clear();
    }

    // =========================================================================
    // Compile-time type stack
    // =========================================================================

    pub(crate) fn push_type(&mut self, ty: ValueType) {
        self.type_stack.push(ty);
    }

    pub(crate) fn pop_type(&mut self) -> ValueType {
        self.type_stack.pop().unwrap_or(ValueType::UNIT)
    }

    pub(crate) fn types_len(&self) -> usize {
        self.type_stack.len()
    }

    /// Drops the types of values that an instruction just consumed.
    pub(crate) fn truncate_types(&mut self, len: usize) {
        self.type_stack.truncate(len);
    }

    pub(crate) fn peek_type(&self) -> ValueType {
        self.type_stack.last().copied().unwrap_or(ValueType::UNIT)
    }

    pub(crate) fn type_size(&self, ty: ValueType) -> usize {
        self.chunk.type_size(ty)
    }

    pub(crate) fn type_name(&self, ty: ValueType) -> String {
        self.chunk.format_type(ty)
    }

    /// Slots currently occupied in the frame being compiled.
    fn frame_slots(&self) -> usize {
        self.type_stack.iter().map(|ty| self.type_size(*ty)).sum()
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub(crate) fn emit(&mut self, instruction: Instruction) {
        let slice = self.previous.slice;
        self.chunk.write_instruction(instruction, slice);
    }

    pub(crate) fn emit_at(&mut self, instruction: Instruction, slice: Slice) {
        self.chunk.write_instruction(instruction, slice);
    }

    fn emit_byte(&mut self, byte: u8) {
        let slice = self.previous.slice;
        self.chunk.write_byte(byte, slice);
    }

    /// Emits a one-byte operand, reporting `what` when it does not fit.
    pub(crate) fn emit_operand(&mut self, value: usize, what: &str) {
        match u8::try_from(value) {
            Ok(byte) => self.emit_byte(byte),
            Err(_) => {
                self.soft_error(self.previous.slice, format!("Too many {}", what));
                self.emit_byte(0);
            }
        }
    }

    pub(crate) fn emit_u16_operand(&mut self, value: usize, what: &str) {
        let value = match u16::try_from(value) {
            Ok(value) => value,
            Err(_) => {
                self.soft_error(self.previous.slice, format!("Too many {}", what));
                0
            }
        };
        let [hi, lo] = value.to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    pub(crate) fn emit_pop(&mut self, size: usize) {
        match size {
            0 => {}
            1 => self.emit(Instruction::Pop),
            _ => {
                self.emit(Instruction::PopMultiple);
                self.emit_operand(size, "slots to pop");
            }
        }
    }

    pub(crate) fn emit_literal(&mut self, data: crate::lang::ValueData, ty: ValueType) {
        let index = self.chunk.add_value_literal(data, ty);
        self.emit(Instruction::LoadLiteral);
        self.emit_operand(index, "literals in one chunk");
        self.push_type(ty);
    }

    fn emit_load_local(&mut self, slot: usize, size: usize) {
        if size == 1 {
            self.emit(Instruction::LoadLocal);
            self.emit_operand(slot, "local variables");
        } else {
            self.emit(Instruction::LoadLocalMultiple);
            self.emit_operand(slot, "local variables");
            self.emit_operand(size, "slots in one value");
        }
    }

    fn emit_assign_local(&mut self, slot: usize, size: usize) {
        if size == 1 {
            self.emit(Instruction::AssignLocal);
            self.emit_operand(slot, "local variables");
        } else {
            self.emit(Instruction::AssignLocalMultiple);
            self.emit_operand(slot, "local variables");
            self.emit_operand(size, "slots in one value");
        }
    }

    // =========================================================================
    // Jumps
    // =========================================================================

    /// Emits a forward jump with a placeholder offset and returns the index
    /// of the placeholder's first byte.
    pub(crate) fn begin_forward_jump(&mut self, instruction: Instruction) -> usize {
        self.emit(instruction);
        self.emit_byte(0);
        self.emit_byte(0);
        self.chunk.code.len() - 2
    }

    /// Points a forward jump at the current end of the code.
    pub(crate) fn end_forward_jump(&mut self, jump: usize) {
        let offset = self.chunk.code.len() - jump - 2;
        match u16::try_from(offset) {
            Ok(offset) => self.chunk.patch_u16(jump, offset),
            Err(_) => self.soft_error(self.previous.slice, "Too much code to jump over"),
        }
    }

    fn begin_backward_jump(&self) -> usize {
        self.chunk.code.len()
    }

    /// Emits a jump back to `mark`. The offset is taken from the end of the
    /// operand, which is where the VM sits when it applies it.
    fn end_backward_jump(&mut self, instruction: Instruction, mark: usize) {
        self.emit(instruction);
        let offset = self.chunk.code.len() - mark + 2;
        let offset = match u16::try_from(offset) {
            Ok(offset) => offset,
            Err(_) => {
                self.soft_error(self.previous.slice, "Too much code to jump over");
                0
            }
        };
        let [hi, lo] = offset.to_be_bytes();
        self.emit_byte(hi);
        self.emit_byte(lo);
    }

    // =========================================================================
    // Scopes and locals
    // =========================================================================

    pub(crate) fn begin_scope(&self) -> Scope {
        Scope {
            start: self.locals.len(),
        }
    }

    /// Closes a scope. When `keep` is non-zero, that many slots on top of the
    /// stack survive and are moved down over the scope's locals.
    pub(crate) fn end_scope(&mut self, scope: Scope, keep: usize) {
        let mut unused = Vec::new();
        let mut size = 0;
        for local in &self.locals[scope.start..] {
            let name = self.text(local.name);
            if !local.used && !name.is_empty() && !name.starts_with('_') {
                unused.push((local.name, name));
            }
            size += self.type_size(local.ty);
        }
        for (slice, name) in unused {
            self.soft_error(slice, format!("Unused variable '{}'", name));
        }

        if size > 0 {
            if keep > 0 {
                self.emit(Instruction::CopyTo);
                self.emit_operand(size, "local variables");
                self.emit_operand(keep, "slots in one value");
            } else {
                self.emit(Instruction::PopMultiple);
                self.emit_operand(size, "local variables");
            }
        }

        let count = self.locals.len() - scope.start;
        self.locals.truncate(scope.start);
        let remaining = self.type_stack.len().saturating_sub(count);
        self.type_stack.truncate(remaining);
    }

    /// Declares a local over the value whose type is on top of the type
    /// stack. Returns its slot.
    fn add_local(&mut self, name: Slice, mutable: bool, used: bool) -> usize {
        let ty = self.peek_type();
        let size = self.type_size(ty);
        let slot = self.frame_slots() - size;
        if slot + size > u8::MAX as usize + 1 {
            self.soft_error(name, "Too many local variables in function");
        }
        self.locals.push(LocalVariable {
            name,
            ty,
            mutable,
            used,
            slot,
        });
        slot
    }

    fn resolve_local(&self, name: &str) -> Option<usize> {
        self.locals
            .iter()
            .rposition(|local| self.text(local.name) == name)
    }

    // =========================================================================
    // Loops
    // =========================================================================

    fn begin_loop(&mut self) {
        self.loops.push(self.frame_slots());
    }

    fn end_loop(&mut self) {
        let depth = self.loops.len();
        self.loops.pop();

        let (done, pending): (Vec<LoopBreak>, Vec<LoopBreak>) =
            self.breaks.drain(..).partition(|b| b.depth == depth);
        self.breaks = pending;
        for b in done {
            self.end_forward_jump(b.jump);
        }
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn declaration(&mut self) {
        if self.matches(TokenKind::Fn) {
            self.function_declaration();
        } else if self.matches(TokenKind::Struct) {
            self.struct_declaration();
        } else {
            self.hard_error(self.current.slice, "Expected 'fn' or 'struct'");
        }

        if self.is_recovering() {
            self.synchronize();
        }
    }

    fn function_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expected function name");
        let name_slice = self.previous.slice;
        let name = self.text(name_slice);
        if self.chunk.find_function(name).is_some() || self.chunk.find_native(name).is_some() {
            self.soft_error(name_slice, format!("Function '{}' is already declared", name));
        }

        self.consume(TokenKind::OpenParen, "Expected '(' after function name");
        let mut builder = self.chunk.begin_function_type();
        if !self.check(TokenKind::CloseParen) {
            loop {
                self.consume(TokenKind::Identifier, "Expected parameter name");
                let param = self.previous.slice;
                self.consume(TokenKind::Colon, "Expected ':' after parameter name");
                let ty = self.consume_type(0);

                if self.resolve_local(self.text(param)).is_some() {
                    let message = format!("Duplicate parameter '{}'", self.text(param));
                    self.soft_error(param, message);
                } else if let Err(e) = builder.add_param(ty) {
                    self.soft_error(param, capitalize(&e.to_string()));
                } else {
                    self.push_type(ty);
                    self.add_local(param, false, true);
                }

                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CloseParen, "Expected ')' after parameters");

        if self.matches(TokenKind::Colon) {
            let ty = self.consume_type(0);
            builder.returns(ty);
        }

        let return_type = builder.return_type;
        let type_index = self.chunk.end_function_type(builder);
        self.chunk.functions.push(Function {
            name: name.to_string(),
            type_index,
            code_offset: self.chunk.code.len(),
        });

        self.return_types.push(return_type);
        self.consume(TokenKind::OpenCurly, "Expected '{' before function body");
        if return_type == ValueType::UNIT {
            self.block_statement();
            self.emit(Instruction::LoadUnit);
            self.emit(Instruction::Return);
            self.emit_operand(1, "slots in one value");
        } else {
            self.block();
            let ty = self.pop_type();
            if ty != return_type {
                let message = format!(
                    "Wrong return type for '{}'. Expected {}. Got {}",
                    name,
                    self.type_name(return_type),
                    self.type_name(ty)
                );
                self.soft_error(name_slice, message);
            }
            self.emit(Instruction::Return);
            let size = self.type_size(return_type);
            self.emit_operand(size, "slots in one value");
        }
        self.return_types.pop();
        self.locals.clear();
        self.type_stack.clear();
    }

    fn struct_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expected struct name");
        let name_slice = self.previous.slice;
        let name = self.text(name_slice);
        self.consume(TokenKind::OpenCurly, "Expected '{' after struct name");

        let mut builder = self.chunk.begin_struct_type();
        while !self.check(TokenKind::CloseCurly)
            && !self.check(TokenKind::End)
            && !self.is_recovering()
        {
            self.consume(TokenKind::Identifier, "Expected field name");
            let field = self.previous.slice;
            self.consume(TokenKind::Colon, "Expected ':' after field name");
            let ty = self.consume_type(0);
            if let Err(e) = builder.add_field(self.text(field), ty) {
                self.soft_error(field, capitalize(&e.to_string()));
            }
            self.matches(TokenKind::Comma);
        }
        self.consume(TokenKind::CloseCurly, "Expected '}' after struct fields");

        if self.chunk.find_struct(name).is_some() {
            self.soft_error(name_slice, format!("Struct '{}' is already declared", name));
            return;
        }
        if let Err(e) = self.chunk.end_struct_type(name, builder) {
            self.soft_error(name_slice, capitalize(&e.to_string()));
        }
    }

    /// Parses a type expression.
    pub(crate) fn consume_type(&mut self, depth: usize) -> ValueType {
        if depth > MAX_TYPE_DEPTH {
            self.hard_error(self.current.slice, "Type is nested too deeply");
            return ValueType::UNIT;
        }

        if self.matches(TokenKind::Bool) {
            ValueType::BOOL
        } else if self.matches(TokenKind::Int) {
            ValueType::INT
        } else if self.matches(TokenKind::Float) {
            ValueType::FLOAT
        } else if self.matches(TokenKind::String) {
            ValueType::STRING
        } else if self.matches(TokenKind::OpenCurly) {
            self.consume(TokenKind::CloseCurly, "Expected '}' in unit type");
            ValueType::UNIT
        } else if self.matches(TokenKind::Fn) {
            let start = self.previous.slice;
            self.consume(TokenKind::OpenParen, "Expected '(' after 'fn' in type");
            let mut builder = self.chunk.begin_function_type();
            if !self.check(TokenKind::CloseParen) {
                loop {
                    let ty = self.consume_type(depth + 1);
                    if let Err(e) = builder.add_param(ty) {
                        let slice = self.span_from(start);
                        self.soft_error(slice, capitalize(&e.to_string()));
                    }
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::CloseParen, "Expected ')' after parameter types");
            if self.matches(TokenKind::Colon) {
                let ty = self.consume_type(depth + 1);
                builder.returns(ty);
            }
            let index = self.chunk.end_function_type(builder);
            ValueType::with_index(ValueKind::Function, index)
        } else if self.matches(TokenKind::Identifier) {
            let slice = self.previous.slice;
            let name = self.text(slice);
            match self.chunk.find_struct(name) {
                Some(index) => ValueType::with_index(ValueKind::Struct, index),
                None => {
                    self.soft_error(slice, format!("Unknown type '{}'", name));
                    ValueType::UNIT
                }
            }
        } else {
            self.hard_error(self.current.slice, "Expected type");
            ValueType::UNIT
        }
    }

    /// Appends `LoadFunction main; Call 0; Halt` and makes it the entry.
    fn emit_entry(&mut self) {
        let Some(index) = self.chunk.find_function("main") else {
            self.soft_error(self.previous.slice, "Missing 'main' function");
            return;
        };

        let type_index = self.chunk.functions[index].type_index;
        if self.chunk.function_types[type_index].params_len != 0 {
            self.soft_error(self.previous.slice, "'main' must not take parameters");
        }

        self.chunk.entry = self.chunk.code.len();
        self.emit(Instruction::LoadFunction);
        self.emit_u16_operand(index, "functions");
        self.emit(Instruction::Call);
        self.emit_operand(0, "argument slots");
        self.emit(Instruction::Halt);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn statement(&mut self) -> StatementKind {
        if self.matches(TokenKind::OpenCurly) {
            self.block_statement();
        } else if self.matches(TokenKind::Let) {
            self.variable_declaration();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Break) {
            self.break_statement();
        } else if self.matches(TokenKind::Return) {
            return self.return_statement();
        } else if self.matches(TokenKind::Print) {
            self.print_statement();
        } else {
            return self.expression_statement();
        }
        StatementKind::Other
    }

    /// Statements up to the closing brace. The opening brace is already consumed.
    fn statements(&mut self) -> StatementKind {
        let mut last = StatementKind::Other;
        while !self.check(TokenKind::CloseCurly)
            && !self.check(TokenKind::End)
            && !self.is_recovering()
        {
            last = self.statement();
        }
        self.consume(TokenKind::CloseCurly, "Expected '}' after block");
        last
    }

    fn block_statement(&mut self) {
        let scope = self.begin_scope();
        self.statements();
        self.end_scope(scope, 0);
    }

    /// A block used as a value: its trailing expression, or unit. Returns
    /// `true` when the block ends in `return` and so never produces a value.
    pub(crate) fn block(&mut self) -> bool {
        let scope = self.begin_scope();
        match self.statements() {
            StatementKind::Expression { ty, pop_site } => {
                self.chunk.truncate_code(pop_site);
                let size = self.type_size(ty);
                self.end_scope(scope, size);
                self.push_type(ty);
                false
            }
            StatementKind::Return(ty) => {
                self.end_scope(scope, 0);
                self.push_type(ty);
                true
            }
            StatementKind::Other => {
                self.end_scope(scope, 0);
                self.emit(Instruction::LoadUnit);
                self.push_type(ValueType::UNIT);
                false
            }
        }
    }

    fn expression_statement(&mut self) -> StatementKind {
        self.expression();
        let ty = self.pop_type();
        let pop_site = self.chunk.code.len();
        let size = self.type_size(ty);
        self.emit_pop(size);
        StatementKind::Expression { ty, pop_site }
    }

    fn variable_declaration(&mut self) {
        let mutable = self.matches(TokenKind::Mut);
        self.consume(TokenKind::Identifier, "Expected variable name");
        let name = self.previous.slice;
        self.consume(TokenKind::Equal, "Expected '=' after variable name");
        self.expression();
        self.add_local(name, mutable, false);
    }

    fn while_statement(&mut self) {
        let mark = self.begin_backward_jump();
        let start = self.current.slice;
        self.expression();
        let condition = self.pop_type();
        if condition != ValueType::BOOL {
            let slice = self.span_from(start);
            let message = format!("Expected bool condition. Got {}", self.type_name(condition));
            self.soft_error(slice, message);
        }

        let exit = self.begin_forward_jump(Instruction::PopAndJumpForwardIfFalse);
        self.begin_loop();
        self.consume(TokenKind::OpenCurly, "Expected '{' after while condition");
        self.block_statement();
        self.end_backward_jump(Instruction::JumpBackward, mark);
        self.end_forward_jump(exit);
        self.end_loop();
    }

    fn for_statement(&mut self) {
        let scope = self.begin_scope();

        self.consume(TokenKind::Identifier, "Expected loop variable name");
        let name = self.previous.slice;
        self.consume(TokenKind::Equal, "Expected '=' after loop variable");
        self.for_bound("start");
        let slot = self.add_local(name, false, true);

        self.consume(TokenKind::Comma, "Expected ',' after loop start");
        self.for_bound("end");
        let hidden = Slice::new(self.previous.slice.index, 0);
        self.add_local(hidden, false, true);

        let mark = self.begin_backward_jump();
        self.emit(Instruction::ForLoopCheck);
        self.emit_operand(slot, "local variables");
        let exit = self.begin_forward_jump(Instruction::PopAndJumpForwardIfFalse);
        self.begin_loop();

        self.consume(TokenKind::OpenCurly, "Expected '{' after for range");
        self.block_statement();

        self.emit(Instruction::IncrementLocal);
        self.emit_operand(slot, "local variables");
        self.end_backward_jump(Instruction::JumpBackward, mark);
        self.end_forward_jump(exit);
        self.end_loop();

        self.end_scope(scope, 0);
    }

    fn for_bound(&mut self, which: &str) {
        let start = self.current.slice;
        self.expression();
        let ty = self.peek_type();
        if ty != ValueType::INT {
            let slice = self.span_from(start);
            let message = format!(
                "For loop {} must be int. Got {}",
                which,
                self.type_name(ty)
            );
            self.soft_error(slice, message);
        }
    }

    fn break_statement(&mut self) {
        let slice = self.previous.slice;
        let mut count: i64 = 1;
        if self.matches(TokenKind::IntLiteral) {
            count = self.text(self.previous.slice).parse().unwrap_or(i64::MAX);
        }
        let slice = self.span_from(slice);

        let nesting = self.loops.len();
        if nesting == 0 {
            self.soft_error(slice, "Not inside a loop");
            return;
        }
        if count < 1 {
            self.soft_error(slice, "Break count must be at least 1");
            count = 1;
        }
        if count as usize > nesting {
            let message = format!(
                "Can not break out of {} loops. Only inside {}",
                count, nesting
            );
            self.soft_error(slice, message);
            count = nesting as i64;
        }

        let depth = nesting - count as usize + 1;
        let extra = self.frame_slots() - self.loops[depth - 1];
        if extra > 0 {
            self.emit(Instruction::PopMultiple);
            self.emit_operand(extra, "slots to pop");
        }
        let jump = self.begin_forward_jump(Instruction::JumpForward);
        self.breaks.push(LoopBreak { depth, jump });
    }

    fn return_statement(&mut self) -> StatementKind {
        let slice = self.previous.slice;
        let Some(expected) = self.return_types.last().copied() else {
            self.soft_error(slice, "Can not return outside a function");
            return StatementKind::Other;
        };

        if expected == ValueType::UNIT {
            self.emit(Instruction::LoadUnit);
        } else {
            let start = self.current.slice;
            self.expression();
            let ty = self.pop_type();
            if ty != expected {
                let slice = self.span_from(start);
                let message = format!(
                    "Wrong return type. Expected {}. Got {}",
                    self.type_name(expected),
                    self.type_name(ty)
                );
                self.soft_error(slice, message);
            }
        }

        self.emit_at(Instruction::Return, slice);
        let size = self.type_size(expected);
        self.emit_operand(size, "slots in one value");
        StatementKind::Return(expected)
    }

    fn print_statement(&mut self) {
        let start = self.current.slice;
        self.expression();
        let ty = self.pop_type();
        if ty.is_kind(ValueKind::Struct) {
            let slice = self.span_from(start);
            let message = format!("Can not print a value of type {}", self.type_name(ty));
            self.soft_error(slice, message);
            let size = self.type_size(ty);
            self.emit_pop(size);
        } else {
            self.emit(Instruction::Print);
        }
    }

    // =========================================================================
    // Expressions: see expr.rs for the prefix/infix actions
    // =========================================================================

    pub(crate) fn expression(&mut self) {
        self.parse_with_precedence(Precedence::Assignment);
    }

    pub(crate) fn parse_with_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = self.rules.get(self.previous.kind).prefix else {
            self.hard_error(self.previous.slice, "Expected expression");
            self.push_type(ValueType::UNIT);
            return;
        };
        prefix(self, precedence);

        while precedence <= self.rules.get(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = self.rules.get(self.previous.kind).infix {
                infix(self, precedence);
            }
        }

        if precedence <= Precedence::Assignment && self.matches(TokenKind::Equal) {
            self.hard_error(self.previous.slice, "Invalid assignment target");
            self.expression();
            self.pop_type();
        }
    }

    /// Loads a local, or assigns to it when followed by `=`.
    pub(crate) fn local_variable(&mut self, index: usize, slice: Slice, can_assign: bool) {
        let local = self.locals[index].clone();
        let size = self.type_size(local.ty);

        if can_assign && self.matches(TokenKind::Equal) {
            let start = self.current.slice;
            self.expression();
            let value = self.peek_type();
            let name = self.text(local.name);
            if !local.mutable {
                self.soft_error(
                    slice,
                    format!("Can not write to immutable variable '{}'", name),
                );
            }
            if value != local.ty {
                let message = format!(
                    "Wrong type for assignment to '{}'. Expected {}. Got {}",
                    name,
                    self.type_name(local.ty),
                    self.type_name(value)
                );
                let slice = self.span_from(start);
                self.soft_error(slice, message);
            }
            self.emit_assign_local(local.slot, size);
        } else {
            self.locals[index].used = true;
            self.emit_load_local(local.slot, size);
            self.push_type(local.ty);
        }
    }

    pub(crate) fn find_local(&self, name: &str) -> Option<usize> {
        self.resolve_local(name)
    }
}

pub(crate) fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Compiles a program with an empty chunk.
pub fn compile(source: &str) -> Result<Chunk, CompileErrors> {
    Compiler::new(source).compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile_error::ErrorKind;
    use crate::bytecode::disasm::decode;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn compile_ok(source: &str) -> Chunk {
        match compile(source) {
            Ok(chunk) => chunk,
            Err(errors) => panic!("expected success, got: {:?}", errors),
        }
    }

    fn compile_err(source: &str) -> CompileErrors {
        match compile(source) {
            Ok(_) => panic!("expected compile errors for: {}", source),
            Err(errors) => errors,
        }
    }

    /// Runs the compiler without consuming it, so the chunk can be inspected
    /// even when compilation failed.
    fn compile_raw(source: &str) -> (Chunk, Vec<CompileError>) {
        let mut compiler = Compiler::new(source);
        compiler.compile_program();
        (compiler.chunk, compiler.errors)
    }

    fn ops(chunk: &Chunk) -> Vec<(Instruction, Vec<u8>)> {
        decode(chunk)
            .into_iter()
            .map(|d| (d.instruction, d.operands))
            .collect()
    }

    fn has_op(chunk: &Chunk, instruction: Instruction, operands: &[u8]) -> bool {
        ops(chunk)
            .iter()
            .any(|(i, o)| *i == instruction && o.as_slice() == operands)
    }

    // ============================================================
    // Literals
    // ============================================================

    #[test]
    fn test_literals_are_deduplicated() {
        let chunk = compile_ok("fn main() { print 7 print 7 print 7.0 print \"a\" print \"a\" }");
        assert_eq!(chunk.literal_data.len(), 3);
        assert_eq!(chunk.strings, vec!["a".to_string()]);
    }

    #[test]
    fn test_every_byte_has_a_slice() {
        let chunk = compile_ok("fn main() { let x = 1 print x + 2 }");
        assert_eq!(chunk.code.len(), chunk.slices.len());
    }

    #[test]
    fn test_compile_expression_ends_in_halt() {
        let chunk = Compiler::new("1 + 2").compile_expression().unwrap();
        let ops = ops(&chunk);
        assert_eq!(chunk.entry, 0);
        assert_eq!(ops.last().map(|(i, _)| *i), Some(Instruction::Halt));
        assert!(ops.iter().any(|(i, _)| *i == Instruction::AddInt));
    }

    // ============================================================
    // Scopes
    // ============================================================

    #[test]
    fn test_scope_pops_sum_of_local_sizes() {
        let chunk = compile_ok(
            "struct P { x: int, y: int }
             fn main() { { let a = 1 let p = P(1, 2) print a print p.x } }",
        );
        assert!(has_op(&chunk, Instruction::PopMultiple, &[3]));
    }

    #[test]
    fn test_block_value_is_copied_over_locals() {
        let chunk = Compiler::new("{ let a = 1 let b = 2 a + b }")
            .compile_expression()
            .unwrap();
        assert!(has_op(&chunk, Instruction::CopyTo, &[2, 1]));
        // The trailing expression's pop was retracted.
        assert!(!ops(&chunk).iter().any(|(i, _)| *i == Instruction::Pop));
    }

    #[test]
    fn test_empty_block_is_unit() {
        let chunk = Compiler::new("{}").compile_expression().unwrap();
        assert_eq!(ops(&chunk)[0].0, Instruction::LoadUnit);
    }

    #[test]
    fn test_unused_variable_is_soft_error() {
        let errors = compile_err("fn main() { let x = 1 }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.0[0].kind, ErrorKind::Soft);
        assert!(errors.contains("Unused variable 'x'"));
    }

    #[test]
    fn test_underscore_variable_may_be_unused() {
        compile_ok("fn main() { let _x = 1 }");
    }

    #[test]
    fn test_parameters_need_not_be_used() {
        compile_ok("fn f(a: int) {} fn main() { f(1) }");
    }

    // ============================================================
    // Variables
    // ============================================================

    #[test]
    fn test_assign_to_immutable() {
        let errors = compile_err("fn main() { let x = 1 x = 2 print x }");
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("Can not write to immutable variable 'x'"));
    }

    #[test]
    fn test_assign_wrong_type() {
        let errors = compile_err("fn main() { let mut x = 1 x = true print x }");
        assert!(errors.contains("Wrong type for assignment to 'x'. Expected int. Got bool"));
    }

    #[test]
    fn test_read_undeclared() {
        let errors = compile_err("fn main() { print y }");
        assert!(errors.contains("Can not read undeclared variable 'y'"));
    }

    #[test]
    fn test_invalid_assignment_target_is_hard() {
        let errors = compile_err("fn main() { let mut a = 1 a + 1 = 2 print a }");
        assert_eq!(errors.hard_count(), 1);
        assert!(errors.contains("Invalid assignment target"));
    }

    // ============================================================
    // Control flow
    // ============================================================

    #[test]
    fn test_forward_jump_offset() {
        let chunk = Compiler::new("if true { 1 } else { 2 }")
            .compile_expression()
            .unwrap();
        // LOAD_TRUE, POP_JUMP_FALSE +x, LOAD_LITERAL 0, JUMP +y, LOAD_LITERAL 1, HALT
        let decoded = decode(&chunk);
        let jump_false = &decoded[1];
        assert_eq!(jump_false.instruction, Instruction::PopAndJumpForwardIfFalse);
        let offset = u16::from_be_bytes([jump_false.operands[0], jump_false.operands[1]]) as usize;
        assert_eq!(jump_false.offset + 3 + offset, decoded[4].offset);

        let jump = &decoded[3];
        assert_eq!(jump.instruction, Instruction::JumpForward);
        let offset = u16::from_be_bytes([jump.operands[0], jump.operands[1]]) as usize;
        assert_eq!(jump.offset + 3 + offset, decoded[5].offset);
    }

    #[test]
    fn test_jump_too_far_is_soft_error() {
        let body = "print 1 ".repeat(25_000);
        let source = format!(
            "fn big() {{ while true {{ {} }} }} fn main() {{ print 2 }} fn after(x: int): int {{ x }}",
            body
        );
        let (chunk, errors) = compile_raw(&source);

        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::Soft));
        assert!(errors.iter().all(|e| e.message == "Too much code to jump over"));
        assert!(chunk.find_function("main").is_some());
        assert!(chunk.find_function("after").is_some());
    }

    #[test]
    fn test_backward_jump_lands_on_condition() {
        let chunk = compile_ok("fn main() { let mut i = 0 while i < 3 { i = i + 1 } }");
        let decoded = decode(&chunk);
        let back = decoded
            .iter()
            .find(|d| d.instruction == Instruction::JumpBackward)
            .unwrap();
        let offset = u16::from_be_bytes([back.operands[0], back.operands[1]]) as usize;
        let target = back.offset + 3 - offset;
        let target_op = decoded.iter().find(|d| d.offset == target).unwrap();
        // The condition starts by loading `i`.
        assert_eq!(target_op.instruction, Instruction::LoadLocal);
    }

    #[test]
    fn test_if_condition_must_be_bool() {
        let errors = compile_err("fn main() { if 1 { } }");
        assert!(errors.contains("Expected bool condition. Got int"));
    }

    #[test]
    fn test_if_branch_types_must_match() {
        let errors = compile_err("fn main() { print if true { 1 } else { 2.0 } }");
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("If branches have different types"));
    }

    #[test]
    fn test_if_without_else_must_be_unit() {
        let errors = compile_err("fn main() { print if true { 1 } }");
        assert!(errors.contains("If without else must produce {}"));
    }

    #[test]
    fn test_else_if_chain() {
        compile_ok(
            "fn sign(n: int): int { if n < 0 { 0 - 1 } else if n > 0 { 1 } else { 0 } }
             fn main() { print sign(4) }",
        );
    }

    #[test]
    fn test_returning_branch_does_not_decide_if_type() {
        compile_ok("fn f(n: int): int { if n > 3 { return n } print n n + 1 } fn main() { print f(1) }");
        compile_ok("fn g(n: int): int { if n > 3 { return 0 } else { print n } n } fn main() { print g(1) }");

        let errors = compile_err("fn main() { if true { 1 } }");
        assert!(errors.contains("If without else must produce {}. Got int"));
    }

    #[test]
    fn test_break_outside_loop() {
        let errors = compile_err("fn main() { break }");
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("Not inside a loop"));
    }

    #[test]
    fn test_break_count_is_clamped() {
        let (chunk, errors) = compile_raw("fn main() { while true { break 3 } }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Soft);

        // The clamped break still leaves the only loop.
        let decoded = decode(&chunk);
        let exit = decoded
            .iter()
            .find(|d| d.instruction == Instruction::PopAndJumpForwardIfFalse)
            .unwrap();
        let brk = decoded
            .iter()
            .find(|d| d.instruction == Instruction::JumpForward)
            .unwrap();
        let exit_target =
            exit.offset + 3 + u16::from_be_bytes([exit.operands[0], exit.operands[1]]) as usize;
        let break_target =
            brk.offset + 3 + u16::from_be_bytes([brk.operands[0], brk.operands[1]]) as usize;
        assert_eq!(exit_target, break_target);
    }

    #[test]
    fn test_break_zero_is_clamped() {
        let errors = compile_err("fn main() { while true { break 0 } }");
        assert!(errors.contains("Break count must be at least 1"));
    }

    #[test]
    fn test_break_pops_loop_locals() {
        let chunk = compile_ok("fn main() { while true { let a = 1 let b = 2 print a + b break } }");
        assert!(has_op(&chunk, Instruction::PopMultiple, &[2]));
    }

    #[test]
    fn test_for_bounds_must_be_int() {
        let errors = compile_err("fn main() { for i = 0, 2.5 { print i } }");
        assert!(errors.contains("For loop end must be int. Got float"));
    }

    // ============================================================
    // Functions
    // ============================================================

    #[test]
    fn test_wrong_argument_type() {
        let errors = compile_err("fn f(a: int) {} fn main() { f(true) }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.soft_count(), 1);
        assert!(errors.contains("Wrong type for argument 1. Expected int. Got bool"));
    }

    #[test]
    fn test_wrong_argument_count() {
        let errors = compile_err("fn f(a: int, b: int) {} fn main() { f(1) }");
        assert!(errors.contains("Wrong number of arguments. Expected 2. Got 1"));
    }

    #[test]
    fn test_duplicate_parameter_is_skipped() {
        let (chunk, errors) = compile_raw("fn f(a: int, a: int): int { a } fn main() { print f(1) }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Soft);
        assert_eq!(errors[0].message, "Duplicate parameter 'a'");

        let f = chunk.find_function("f").unwrap();
        let ty = &chunk.function_types[chunk.functions[f].type_index];
        assert_eq!(ty.params_len, 1);
        assert_eq!(ty.params_size, 1);
    }

    #[test]
    fn test_call_non_function() {
        let errors = compile_err("fn main() { let x = 1 x(2) }");
        assert!(errors.contains("Can not call a value of type int"));
    }

    #[test]
    fn test_too_many_params() {
        let errors = compile_err(
            "fn f(a: int, b: int, c: int, d: int, e: int, f: int, g: int, h: int, i: int) {}
             fn main() {}",
        );
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("Too many parameters"));
    }

    #[test]
    fn test_return_type_is_checked() {
        let errors = compile_err("fn f(): int { return true } fn main() { print f() }");
        assert!(errors.contains("Wrong return type. Expected int. Got bool"));

        let errors = compile_err("fn f(): int { 1.5 } fn main() { print f() }");
        assert!(errors.contains("Wrong return type for 'f'. Expected int. Got float"));
    }

    #[test]
    fn test_function_type_parameter() {
        compile_ok(
            "fn twice(f: fn(int): int, x: int): int { f(f(x)) }
             fn inc(x: int): int { x + 1 }
             fn main() { print twice(inc, 1) }",
        );
    }

    #[test]
    fn test_recursion_sees_itself() {
        compile_ok("fn fact(n: int): int { if n < 2 { 1 } else { n * fact(n - 1) } } fn main() { print fact(5) }");
    }

    #[test]
    fn test_missing_main() {
        let errors = compile_err("fn helper() {}");
        assert!(errors.contains("Missing 'main' function"));
    }

    #[test]
    fn test_main_without_parameters() {
        let errors = compile_err("fn main(a: int) {}");
        assert!(errors.contains("'main' must not take parameters"));
    }

    #[test]
    fn test_entry_stub() {
        let chunk = compile_ok("fn helper() {} fn main() {}");
        let decoded = decode(&chunk);
        let entry: Vec<_> = decoded.iter().filter(|d| d.offset >= chunk.entry).collect();
        assert_eq!(entry[0].instruction, Instruction::LoadFunction);
        assert_eq!(entry[0].operands, vec![0, 1]);
        assert_eq!(entry[1].instruction, Instruction::Call);
        assert_eq!(entry[2].instruction, Instruction::Halt);
    }

    // ============================================================
    // Types and structs
    // ============================================================

    #[test]
    fn test_arithmetic_type_mismatch() {
        let errors = compile_err("fn main() { print 1 + 2.0 }");
        assert!(errors.contains("Operator '+' expects two ints or two floats. Got int and float"));
    }

    #[test]
    fn test_conversion_needs_the_other_numeric_type() {
        let errors = compile_err("fn main() { print int(1) print float(2.5) print int(true) }");
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.soft_count(), 3);
        assert!(errors.contains("Can not convert int to int"));
        assert!(errors.contains("Can not convert float to float"));
        assert!(errors.contains("Can not convert bool to int"));
    }

    #[test]
    fn test_not_on_number_is_false() {
        let chunk = Compiler::new("!5").compile_expression().unwrap();
        let ops: Vec<_> = ops(&chunk).into_iter().map(|(i, _)| i).collect();
        assert_eq!(
            ops,
            vec![
                Instruction::LoadLiteral,
                Instruction::Pop,
                Instruction::LoadFalse,
                Instruction::Halt
            ]
        );
    }

    #[test]
    fn test_duplicate_struct_field() {
        let (chunk, errors) = compile_raw("struct P { x: int, x: float } fn main() {}");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Soft);
        assert_eq!(chunk.struct_types.len(), 1);
        let fields = chunk.fields(&chunk.struct_types[0]);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].ty, ValueType::INT);
    }

    #[test]
    fn test_duplicate_struct_name() {
        let errors = compile_err("struct P { x: int } struct P { y: int } fn main() {}");
        assert!(errors.contains("Struct 'P' is already declared"));
    }

    #[test]
    fn test_unknown_field() {
        let errors = compile_err("struct P { x: int } fn main() { let p = P(1) print p.y }");
        assert!(errors.contains("'P' has no field 'y'"));
    }

    #[test]
    fn test_constructor_checks_fields() {
        let errors = compile_err("struct P { x: int, y: bool } fn main() { let p = P(1, 2) print p.x }");
        assert!(errors.contains("Wrong type for field 'y' of 'P'. Expected bool. Got int"));
    }

    #[test]
    fn test_type_nesting_limit() {
        let errors = compile_err(
            "fn f(a: fn(fn(fn(fn(fn(fn(fn(fn(fn(int))))))))) {} fn main() {}",
        );
        assert!(errors.contains("Type is nested too deeply"));
    }

    // ============================================================
    // Recovery
    // ============================================================

    #[test]
    fn test_hard_error_recovers_at_next_declaration() {
        let errors = compile_err("fn broken() { let = 1 } fn main() { print 1 }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.hard_count(), 1);
        assert!(errors.contains("Expected variable name"));
    }

    #[test]
    fn test_errors_in_two_declarations() {
        let errors = compile_err("fn a() { ) } fn b() { ) } fn main() {}");
        assert_eq!(errors.hard_count(), 2);
    }

    #[test]
    fn test_lexer_error_is_hard() {
        let errors = compile_err("fn main() { print \"open }");
        assert!(errors.contains("Unterminated string literal"));
    }

    #[test]
    fn test_garbage_at_top_level() {
        let errors = compile_err("let x = 1 fn main() {}");
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("Expected 'fn' or 'struct'"));
    }
}
