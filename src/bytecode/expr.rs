use crate::bytecode::compile::Compiler;
use crate::bytecode::op::Instruction;
use crate::bytecode::rules::Precedence;
use crate::lang::{ValueData, ValueKind, ValueType};
use crate::lexer::unescape;
use crate::token::TokenKind;

impl<'src> Compiler<'src> {
    pub(crate) fn grouping(&mut self, _precedence: Precedence) {
        self.expression();
        self.consume(TokenKind::CloseParen, "Expected ')' after expression");
    }

    pub(crate) fn block_expression(&mut self, _precedence: Precedence) {
        self.block();
    }

    pub(crate) fn literal(&mut self, _precedence: Precedence) {
        let token = self.previous;
        let text = self.text(token.slice);
        match token.kind {
            TokenKind::True => {
                self.emit(Instruction::LoadTrue);
                self.push_type(ValueType::BOOL);
            }
            TokenKind::False => {
                self.emit(Instruction::LoadFalse);
                self.push_type(ValueType::BOOL);
            }
            TokenKind::IntLiteral => {
                let value = text.parse::<i64>().unwrap_or_else(|_| {
                    self.soft_error(token.slice, format!("Int literal '{}' is too large", text));
                    0
                });
                self.emit_literal(ValueData::from_int(value), ValueType::INT);
            }
            TokenKind::FloatLiteral => {
                let value = text.parse::<f64>().unwrap_or(0.0);
                self.emit_literal(ValueData::from_float(value), ValueType::FLOAT);
            }
            TokenKind::StringLiteral => {
                let index = self.chunk.add_string_literal(&unescape(text));
                self.emit(Instruction::LoadLiteral);
                self.emit_operand(index, "literals in one chunk");
                self.push_type(ValueType::STRING);
            }
            _ => {
                self.hard_error(token.slice, "Expected literal");
                self.push_type(ValueType::UNIT);
            }
        }
    }

    /// `int(x)` and `float(x)`.
    pub(crate) fn conversion(&mut self, _precedence: Precedence) {
        let target = self.previous;
        self.consume(TokenKind::OpenParen, "Expected '(' after type name");
        self.expression();
        self.consume(TokenKind::CloseParen, "Expected ')' after expression");
        let ty = self.pop_type();
        let slice = self.span_from(target.slice);

        let result = if target.kind == TokenKind::Int {
            ValueType::INT
        } else {
            ValueType::FLOAT
        };
        match (ty.kind(), result.kind()) {
            (ValueKind::Float, ValueKind::Int) => self.emit_at(Instruction::FloatToInt, slice),
            (ValueKind::Int, ValueKind::Float) => self.emit_at(Instruction::IntToFloat, slice),
            _ => {
                let message = format!(
                    "Can not convert {} to {}",
                    self.type_name(ty),
                    self.type_name(result)
                );
                self.soft_error(slice, message);
            }
        }
        self.push_type(result);
    }

    pub(crate) fn unary(&mut self, _precedence: Precedence) {
        let op = self.previous;
        self.parse_with_precedence(Precedence::Unary);
        let ty = self.pop_type();

        if op.kind == TokenKind::Minus {
            match ty.kind() {
                ValueKind::Int => self.emit_at(Instruction::NegateInt, op.slice),
                ValueKind::Float => self.emit_at(Instruction::NegateFloat, op.slice),
                _ => {
                    let message = format!(
                        "Operator '-' expects an int or a float. Got {}",
                        self.type_name(ty)
                    );
                    self.soft_error(op.slice, message);
                }
            }
            self.push_type(ty);
            return;
        }

        match ty.kind() {
            ValueKind::Bool => self.emit_at(Instruction::Not, op.slice),
            ValueKind::Int | ValueKind::Float | ValueKind::String => {
                self.emit_at(Instruction::Pop, op.slice);
                self.emit_at(Instruction::LoadFalse, op.slice);
            }
            _ => {
                let message = format!("Operator '!' can not be applied to {}", self.type_name(ty));
                self.soft_error(op.slice, message);
            }
        }
        self.push_type(ValueType::BOOL);
    }

    pub(crate) fn binary(&mut self, _precedence: Precedence) {
        let op = self.previous;
        let precedence = self.rules.get(op.kind).precedence;
        self.parse_with_precedence(precedence.next());
        let right = self.pop_type();
        let left = self.pop_type();
        let symbol = self.text(op.slice);

        let numeric = if left == right {
            match left.kind() {
                ValueKind::Int => Some(true),
                ValueKind::Float => Some(false),
                _ => None,
            }
        } else {
            None
        };

        match op.kind {
            TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash => {
                let (int_op, float_op) = match op.kind {
                    TokenKind::Plus => (Instruction::AddInt, Instruction::AddFloat),
                    TokenKind::Minus => (Instruction::SubtractInt, Instruction::SubtractFloat),
                    TokenKind::Star => (Instruction::MultiplyInt, Instruction::MultiplyFloat),
                    _ => (Instruction::DivideInt, Instruction::DivideFloat),
                };
                match numeric {
                    Some(true) => self.emit_at(int_op, op.slice),
                    Some(false) => self.emit_at(float_op, op.slice),
                    None => self.operand_error(symbol, op.slice, left, right),
                }
                self.push_type(left);
            }
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => {
                // `a >= b` is `!(a < b)` and `a <= b` is `!(a > b)`.
                let (greater, negate) = match op.kind {
                    TokenKind::Greater => (true, false),
                    TokenKind::GreaterEqual => (false, true),
                    TokenKind::Less => (false, false),
                    _ => (true, true),
                };
                let instruction = match (numeric, greater) {
                    (Some(true), true) => Some(Instruction::GreaterInt),
                    (Some(true), false) => Some(Instruction::LessInt),
                    (Some(false), true) => Some(Instruction::GreaterFloat),
                    (Some(false), false) => Some(Instruction::LessFloat),
                    (None, _) => None,
                };
                match instruction {
                    Some(instruction) => {
                        self.emit_at(instruction, op.slice);
                        if negate {
                            self.emit_at(Instruction::Not, op.slice);
                        }
                    }
                    None => self.operand_error(symbol, op.slice, left, right),
                }
                self.push_type(ValueType::BOOL);
            }
            TokenKind::EqualEqual | TokenKind::BangEqual => {
                let instruction = if left == right {
                    match left.kind() {
                        ValueKind::Bool => Some(Instruction::EqualBool),
                        ValueKind::Int => Some(Instruction::EqualInt),
                        ValueKind::Float => Some(Instruction::EqualFloat),
                        ValueKind::String => Some(Instruction::EqualString),
                        _ => None,
                    }
                } else {
                    None
                };
                match instruction {
                    Some(instruction) => {
                        self.emit_at(instruction, op.slice);
                        if op.kind == TokenKind::BangEqual {
                            self.emit_at(Instruction::Not, op.slice);
                        }
                    }
                    None => {
                        let message = format!(
                            "Operator '{}' expects two values of the same bool, int, float or string type. Got {} and {}",
                            symbol,
                            self.type_name(left),
                            self.type_name(right)
                        );
                        self.soft_error(op.slice, message);
                    }
                }
                self.push_type(ValueType::BOOL);
            }
            _ => {
                self.hard_error(op.slice, "Expected binary operator");
                self.push_type(ValueType::UNIT);
            }
        }
    }

    fn operand_error(
        &mut self,
        symbol: &str,
        slice: crate::token::Slice,
        left: ValueType,
        right: ValueType,
    ) {
        let message = format!(
            "Operator '{}' expects two ints or two floats. Got {} and {}",
            symbol,
            self.type_name(left),
            self.type_name(right)
        );
        self.soft_error(slice, message);
    }

    pub(crate) fn and(&mut self, _precedence: Precedence) {
        self.logical(Instruction::JumpForwardIfFalse, Precedence::And);
    }

    pub(crate) fn or(&mut self, _precedence: Precedence) {
        self.logical(Instruction::JumpForwardIfTrue, Precedence::Or);
    }

    /// Short-circuit `and`/`or`: the left value decides whether the right
    /// side runs at all.
    fn logical(&mut self, jump_instruction: Instruction, precedence: Precedence) {
        let op = self.previous;
        let left = self.pop_type();
        let jump = self.begin_forward_jump(jump_instruction);
        self.emit(Instruction::Pop);
        self.parse_with_precedence(precedence);
        let right = self.pop_type();
        self.end_forward_jump(jump);

        if left != ValueType::BOOL || right != ValueType::BOOL {
            let message = format!(
                "Operator '{}' expects two bools. Got {} and {}",
                self.text(op.slice),
                self.type_name(left),
                self.type_name(right)
            );
            self.soft_error(op.slice, message);
        }
        self.push_type(ValueType::BOOL);
    }

    pub(crate) fn variable(&mut self, precedence: Precedence) {
        let slice = self.previous.slice;
        let name = self.text(slice);
        let can_assign = precedence <= Precedence::Assignment;

        if let Some(index) = self.find_local(name) {
            self.local_variable(index, slice, can_assign);
            return;
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.soft_error(slice, format!("Can not write to undeclared variable '{}'", name));
            self.expression();
            return;
        }

        if let Some(index) = self.chunk.find_function(name) {
            let type_index = self.chunk.functions[index].type_index;
            self.emit(Instruction::LoadFunction);
            self.emit_u16_operand(index, "functions");
            self.push_type(ValueType::with_index(ValueKind::Function, type_index));
        } else if let Some(index) = self.chunk.find_native(name) {
            let type_index = self.chunk.natives[index].type_index;
            self.emit(Instruction::LoadNativeFunction);
            self.emit_u16_operand(index, "native functions");
            self.push_type(ValueType::with_index(ValueKind::NativeFunction, type_index));
        } else if let Some(index) = self.chunk.find_struct(name) {
            self.struct_constructor(index);
        } else {
            self.soft_error(slice, format!("Can not read undeclared variable '{}'", name));
            self.emit(Instruction::LoadUnit);
            self.push_type(ValueType::UNIT);
        }
    }

    /// `Name(a, b)` builds a struct value by pushing its fields in order.
    fn struct_constructor(&mut self, index: usize) {
        let start = self.previous.slice;
        let struct_type = self.chunk.struct_types[index].clone();
        let fields = self.chunk.fields(&struct_type).to_vec();

        self.consume(TokenKind::OpenParen, "Expected '(' after struct name");
        // Fields stay on the type stack until the value is complete.
        let base = self.types_len();
        let mut count = 0;
        if !self.check(TokenKind::CloseParen) {
            loop {
                let arg_start = self.current.slice;
                self.expression();
                let ty = self.peek_type();
                if let Some(field) = fields.get(count)
                    && field.ty != ty
                {
                    let message = format!(
                        "Wrong type for field '{}' of '{}'. Expected {}. Got {}",
                        field.name,
                        struct_type.name,
                        self.type_name(field.ty),
                        self.type_name(ty)
                    );
                    let slice = self.span_from(arg_start);
                    self.soft_error(slice, message);
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CloseParen, "Expected ')' after struct fields");

        if count != fields.len() {
            let slice = self.span_from(start);
            let message = format!(
                "Wrong number of fields for '{}'. Expected {}. Got {}",
                struct_type.name,
                fields.len(),
                count
            );
            self.soft_error(slice, message);
        }
        self.truncate_types(base);
        self.push_type(ValueType::with_index(ValueKind::Struct, index));
    }

    pub(crate) fn call(&mut self, _precedence: Precedence) {
        let open = self.previous.slice;
        // The callee and its arguments occupy slots until `Call` runs.
        let callee = self.peek_type();
        let base = self.types_len().saturating_sub(1);
        let function = self.chunk.function_type(callee).cloned();
        if function.is_none() {
            let message = format!("Can not call a value of type {}", self.type_name(callee));
            self.soft_error(open, message);
        }
        let params = match &function {
            Some(f) => self.chunk.params(f).to_vec(),
            None => Vec::new(),
        };

        let mut count = 0;
        let mut args_size = 0;
        if !self.check(TokenKind::CloseParen) {
            loop {
                let arg_start = self.current.slice;
                self.expression();
                let ty = self.peek_type();
                args_size += self.type_size(ty);
                if let Some(expected) = params.get(count)
                    && *expected != ty
                {
                    let message = format!(
                        "Wrong type for argument {}. Expected {}. Got {}",
                        count + 1,
                        self.type_name(*expected),
                        self.type_name(ty)
                    );
                    let slice = self.span_from(arg_start);
                    self.soft_error(slice, message);
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CloseParen, "Expected ')' after arguments");
        let slice = self.span_from(open);

        if function.is_some() && count != params.len() {
            let message = format!(
                "Wrong number of arguments. Expected {}. Got {}",
                params.len(),
                count
            );
            self.soft_error(slice, message);
        }

        self.emit_at(Instruction::Call, slice);
        self.emit_operand(args_size, "argument slots");
        let return_type = function.map(|f| f.return_type).unwrap_or(ValueType::UNIT);
        self.truncate_types(base);
        self.push_type(return_type);
    }

    /// `value.field`, or `value.0` for host tuples.
    pub(crate) fn dot(&mut self, _precedence: Precedence) {
        let object = self.pop_type();
        if !self.matches(TokenKind::IntLiteral) {
            self.consume(TokenKind::Identifier, "Expected field name after '.'");
        }
        let field_slice = self.previous.slice;
        let name = self.text(field_slice);

        let Some(struct_type) = self.chunk.struct_type(object).cloned() else {
            let message = format!(
                "Can not access field '{}' on a value of type {}",
                name,
                self.type_name(object)
            );
            self.soft_error(field_slice, message);
            self.field_fallback(object);
            return;
        };

        let mut offset = 0;
        let mut found = None;
        for field in self.chunk.fields(&struct_type) {
            if field.name == name {
                found = Some(field.ty);
                break;
            }
            offset += self.type_size(field.ty);
        }

        let Some(field_type) = found else {
            let message = format!("'{}' has no field '{}'", struct_type.name, name);
            self.soft_error(field_slice, message);
            self.field_fallback(object);
            return;
        };

        let field_size = self.type_size(field_type);
        self.emit_at(Instruction::SelectField, field_slice);
        self.emit_operand(struct_type.size, "slots in one value");
        self.emit_operand(offset, "slots in one value");
        self.emit_operand(field_size, "slots in one value");
        self.push_type(field_type);
    }

    fn field_fallback(&mut self, object: ValueType) {
        let size = self.type_size(object);
        self.emit_pop(size);
        self.emit(Instruction::LoadUnit);
        self.push_type(ValueType::UNIT);
    }

    pub(crate) fn if_expression(&mut self, precedence: Precedence) {
        let if_slice = self.previous.slice;
        let start = self.current.slice;
        self.expression();
        let condition = self.pop_type();
        if condition != ValueType::BOOL {
            let message = format!("Expected bool condition. Got {}", self.type_name(condition));
            let slice = self.span_from(start);
            self.soft_error(slice, message);
        }

        self.consume(TokenKind::OpenCurly, "Expected '{' after if condition");
        let else_jump = self.begin_forward_jump(Instruction::PopAndJumpForwardIfFalse);
        let then_returns = self.block();
        let then_type = self.pop_type();
        let end_jump = self.begin_forward_jump(Instruction::JumpForward);
        self.end_forward_jump(else_jump);

        // A branch ending in `return` never yields a value, so the other
        // branch decides the type.
        let ty = if self.matches(TokenKind::Else) {
            let else_returns = if self.matches(TokenKind::If) {
                self.if_expression(precedence);
                false
            } else {
                self.consume(TokenKind::OpenCurly, "Expected '{' after else");
                self.block()
            };
            let else_type = self.pop_type();
            if then_returns {
                else_type
            } else {
                if else_type != then_type && !else_returns {
                    let message = format!(
                        "If branches have different types. Then is {}. Else is {}",
                        self.type_name(then_type),
                        self.type_name(else_type)
                    );
                    self.soft_error(if_slice, message);
                }
                then_type
            }
        } else {
            self.emit(Instruction::LoadUnit);
            if then_type != ValueType::UNIT && !then_returns {
                let message = format!(
                    "If without else must produce {{}}. Got {}",
                    self.type_name(then_type)
                );
                self.soft_error(if_slice, message);
            }
            ValueType::UNIT
        };

        self.end_forward_jump(end_jump);
        self.push_type(ty);
    }
}
