use std::io::{self, Write};

use crate::bytecode::chunk::Chunk;
use crate::bytecode::op::Instruction;
use crate::lang::{ValueData, ValueKind, ValueType};
use crate::runtime::heap::Heap;
use crate::runtime::marshal::{Marshal, SlotReader};
use crate::runtime::native::NativeCall;
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_steps: None,
            max_stack_size: 10_000,
        }
    }
}

/// One activation. `base` is the first argument slot; the callee sits just
/// below it. The root frame has base 0 and no callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub base: usize,
    pub ip: usize,
}

/// Executes a chunk. Every value slot has a matching entry on the runtime
/// type stack.
pub struct VirtualMachine<'c, W: Write = io::Stdout> {
    chunk: &'c Chunk,
    values: Vec<ValueData>,
    types: Vec<ValueType>,
    frames: Vec<CallFrame>,
    heap: Heap,
    // Safety limits
    config: VmConfig,
    steps: usize,
    halted: bool,
    out: W,
}

impl<'c> VirtualMachine<'c, io::Stdout> {
    pub fn new(chunk: &'c Chunk) -> Self {
        Self::with_config(chunk, VmConfig::default(), io::stdout())
    }
}

impl<'c, W: Write> VirtualMachine<'c, W> {
    pub fn with_config(chunk: &'c Chunk, config: VmConfig, out: W) -> Self {
        VirtualMachine {
            chunk,
            values: Vec::new(),
            types: Vec::new(),
            frames: vec![CallFrame {
                base: 0,
                ip: chunk.entry,
            }],
            heap: Heap::with_strings(&chunk.strings),
            config,
            steps: 0,
            halted: false,
            out,
        }
    }

    pub fn with_output(chunk: &'c Chunk, out: W) -> Self {
        Self::with_config(chunk, VmConfig::default(), out)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn stack_len(&self) -> usize {
        self.values.len()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while !self.tick()? {}
        Ok(())
    }

    /// Executes one instruction. Returns `true` once the program has halted.
    /// A failed VM stays halted.
    pub fn tick(&mut self) -> Result<bool, RuntimeError> {
        if self.halted {
            return Ok(true);
        }
        let ip = self.frames.last().map(|f| f.ip).unwrap_or(0);
        match self.step() {
            Ok(halted) => {
                self.halted = halted;
                Ok(halted)
            }
            Err(err) => {
                self.halted = true;
                Err(self.decorate(err, ip))
            }
        }
    }

    /// Takes the value the program left behind: `main`'s result, or the
    /// value of a compiled expression.
    pub fn pop_result<T: Marshal>(&mut self) -> Result<T, RuntimeError> {
        let mut reader = SlotReader::new(&self.values, &self.types, &self.heap);
        let value = reader.read::<T>()?;
        if reader.remaining() != 0 {
            return Err(RuntimeErrorKind::ArgumentMismatch {
                expected: format!("{} result slot(s)", reader.position()),
                found: format!("{} slot(s) on the stack", self.values.len()),
            }
            .into());
        }
        self.values.clear();
        self.types.clear();
        Ok(value)
    }

    fn decorate(&self, err: RuntimeError, ip: usize) -> RuntimeError {
        let mut err = match self.chunk.slices.get(ip) {
            Some(slice) => err.with_slice(*slice),
            None => err,
        };
        let top = self.frames.len().saturating_sub(1);
        for (i, frame) in self.frames.iter().enumerate() {
            // Lower frames hold a return address just past their call.
            let at = if i == top { ip } else { frame.ip.saturating_sub(1) };
            if let Some(name) = self.chunk.function_at(at) {
                err = err.with_context(name);
            }
        }
        err
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps
            && self.steps > max
        {
            return Err(RuntimeErrorKind::StepLimitExceeded(max).into());
        }

        if self.values.len() > self.config.max_stack_size {
            return Err(RuntimeErrorKind::StackLimitExceeded(self.config.max_stack_size).into());
        }

        Ok(())
    }

    fn step(&mut self) -> Result<bool, RuntimeError> {
        let chunk = self.chunk;
        self.check_limits()?;

        let byte = self.read_byte()?;
        let instruction = Instruction::from_byte(byte)
            .ok_or_else(|| RuntimeError::invalid_bytecode(format!("unknown opcode 0x{:02x}", byte)))?;

        match instruction {
            Instruction::Halt => return Ok(true),
            Instruction::Return => {
                let size = self.read_byte()? as usize;
                return self.return_from_frame(size);
            }
            Instruction::Print => {
                let (data, ty) = self.pop()?;
                let text = self.format_value(data, ty);
                writeln!(self.out, "{}", text)
                    .map_err(|e| RuntimeErrorKind::Output(e.to_string()))?;
            }

            // Stack
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::PopMultiple => {
                let n = self.read_byte()? as usize;
                let len = self.require(n)?;
                self.truncate(len - n);
            }
            Instruction::CopyTo => {
                let n = self.read_byte()? as usize;
                let size = self.read_byte()? as usize;
                let len = self.require(n + size)?;
                let start = len - size - n;
                self.values.copy_within(len - size..len, start);
                self.types.copy_within(len - size..len, start);
                self.truncate(start + size);
            }

            // Loads
            Instruction::LoadUnit => self.push(ValueData::ZERO, ValueType::UNIT),
            Instruction::LoadFalse => self.push(ValueData::from_bool(false), ValueType::BOOL),
            Instruction::LoadTrue => self.push(ValueData::from_bool(true), ValueType::BOOL),
            Instruction::LoadLiteral => {
                let index = self.read_byte()? as usize;
                let (Some(data), Some(ty)) =
                    (chunk.literal_data.get(index), chunk.literal_types.get(index))
                else {
                    return Err(RuntimeError::invalid_bytecode(format!(
                        "no literal at index {}",
                        index
                    )));
                };
                self.push(*data, *ty);
            }
            Instruction::LoadFunction => {
                let index = self.read_u16()? as usize;
                let function = chunk.functions.get(index).ok_or_else(|| {
                    RuntimeError::invalid_bytecode(format!("no function at index {}", index))
                })?;
                let ty = ValueType::with_index(ValueKind::Function, function.type_index);
                self.push(ValueData::from_index(index), ty);
            }
            Instruction::LoadNativeFunction => {
                let index = self.read_u16()? as usize;
                let native = chunk.natives.get(index).ok_or_else(|| {
                    RuntimeError::invalid_bytecode(format!("no native function at index {}", index))
                })?;
                let ty = ValueType::with_index(ValueKind::NativeFunction, native.type_index);
                self.push(ValueData::from_index(index), ty);
            }

            // Locals
            Instruction::AssignLocal => {
                let slot = self.read_byte()? as usize;
                let at = self.local(slot, 1)?;
                let len = self.require(1)?;
                self.values[at] = self.values[len - 1];
                self.types[at] = self.types[len - 1];
            }
            Instruction::AssignLocalMultiple => {
                let slot = self.read_byte()? as usize;
                let size = self.read_byte()? as usize;
                let at = self.local(slot, size)?;
                let len = self.require(size)?;
                self.values.copy_within(len - size..len, at);
                self.types.copy_within(len - size..len, at);
            }
            Instruction::LoadLocal => {
                let slot = self.read_byte()? as usize;
                let at = self.local(slot, 1)?;
                self.push(self.values[at], self.types[at]);
            }
            Instruction::LoadLocalMultiple => {
                let slot = self.read_byte()? as usize;
                let size = self.read_byte()? as usize;
                let at = self.local(slot, size)?;
                self.values.extend_from_within(at..at + size);
                self.types.extend_from_within(at..at + size);
            }
            Instruction::IncrementLocal => {
                let slot = self.read_byte()? as usize;
                let at = self.local(slot, 1)?;
                let next = self.values[at].as_int().wrapping_add(1);
                self.values[at] = ValueData::from_int(next);
            }

            // Conversions
            Instruction::IntToFloat => {
                let (a, _) = self.pop()?;
                self.push(ValueData::from_float(a.as_int() as f64), ValueType::FLOAT);
            }
            Instruction::FloatToInt => {
                // Truncates toward zero, saturating at the int range. NaN is 0.
                let (a, _) = self.pop()?;
                self.push(ValueData::from_int(a.as_float() as i64), ValueType::INT);
            }

            // Arithmetic
            Instruction::NegateInt => {
                let (a, _) = self.pop()?;
                self.push(ValueData::from_int(a.as_int().wrapping_neg()), ValueType::INT);
            }
            Instruction::NegateFloat => {
                let (a, _) = self.pop()?;
                self.push(ValueData::from_float(-a.as_float()), ValueType::FLOAT);
            }
            Instruction::AddInt => self.binary_int(|a, b| Ok(a.wrapping_add(b)))?,
            Instruction::SubtractInt => self.binary_int(|a, b| Ok(a.wrapping_sub(b)))?,
            Instruction::MultiplyInt => self.binary_int(|a, b| Ok(a.wrapping_mul(b)))?,
            Instruction::DivideInt => self.binary_int(|a, b| {
                if b == 0 {
                    Err(RuntimeErrorKind::DivisionByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Instruction::AddFloat => self.binary_float(|a, b| a + b)?,
            Instruction::SubtractFloat => self.binary_float(|a, b| a - b)?,
            Instruction::MultiplyFloat => self.binary_float(|a, b| a * b)?,
            Instruction::DivideFloat => self.binary_float(|a, b| a / b)?,

            // Logic and comparison
            Instruction::Not => {
                let (a, _) = self.pop()?;
                self.push(ValueData::from_bool(!a.as_bool()), ValueType::BOOL);
            }
            Instruction::EqualBool => self.compare(|a, b| a.as_bool() == b.as_bool())?,
            Instruction::EqualInt => self.compare(|a, b| a.as_int() == b.as_int())?,
            Instruction::EqualFloat => self.compare(|a, b| a.as_float() == b.as_float())?,
            Instruction::EqualString => {
                let (b, _) = self.pop()?;
                let (a, _) = self.pop()?;
                let equal = self.heap.string(a.as_index()) == self.heap.string(b.as_index());
                self.push(ValueData::from_bool(equal), ValueType::BOOL);
            }
            Instruction::GreaterInt => self.compare(|a, b| a.as_int() > b.as_int())?,
            Instruction::GreaterFloat => self.compare(|a, b| a.as_float() > b.as_float())?,
            Instruction::LessInt => self.compare(|a, b| a.as_int() < b.as_int())?,
            Instruction::LessFloat => self.compare(|a, b| a.as_float() < b.as_float())?,

            // Control flow
            Instruction::JumpForward => {
                let offset = self.read_u16()? as usize;
                self.jump_forward(offset)?;
            }
            Instruction::JumpBackward => {
                let offset = self.read_u16()? as usize;
                let frame = self.frame_mut()?;
                frame.ip = frame.ip.checked_sub(offset).ok_or_else(|| {
                    RuntimeError::invalid_bytecode("jump before the start of the code")
                })?;
            }
            Instruction::JumpForwardIfFalse => {
                let offset = self.read_u16()? as usize;
                if !self.peek()?.as_bool() {
                    self.jump_forward(offset)?;
                }
            }
            Instruction::JumpForwardIfTrue => {
                let offset = self.read_u16()? as usize;
                if self.peek()?.as_bool() {
                    self.jump_forward(offset)?;
                }
            }
            Instruction::PopAndJumpForwardIfFalse => {
                let offset = self.read_u16()? as usize;
                let (condition, _) = self.pop()?;
                if !condition.as_bool() {
                    self.jump_forward(offset)?;
                }
            }
            Instruction::ForLoopCheck => {
                let slot = self.read_byte()? as usize;
                let at = self.local(slot, 2)?;
                let more = self.values[at].as_int() < self.values[at + 1].as_int();
                self.push(ValueData::from_bool(more), ValueType::BOOL);
            }
            Instruction::Call => {
                let args_size = self.read_byte()? as usize;
                self.call(args_size)?;
            }

            // Structs
            Instruction::SelectField => {
                let struct_size = self.read_byte()? as usize;
                let offset = self.read_byte()? as usize;
                let field_size = self.read_byte()? as usize;
                if offset + field_size > struct_size {
                    return Err(RuntimeError::invalid_bytecode("field outside its struct"));
                }
                let len = self.require(struct_size)?;
                let start = len - struct_size;
                self.values
                    .copy_within(start + offset..start + offset + field_size, start);
                self.types
                    .copy_within(start + offset..start + offset + field_size, start);
                self.truncate(start + field_size);
            }
        }

        Ok(false)
    }

    fn call(&mut self, args_size: usize) -> Result<(), RuntimeError> {
        let chunk = self.chunk;
        let len = self.require(args_size + 1)?;
        let callee = len - args_size - 1;
        let data = self.values[callee];
        let ty = self.types[callee];

        let params_size = chunk.function_type(ty).map(|f| f.params_size);
        if params_size != Some(args_size) {
            return Err(RuntimeError::invalid_bytecode(format!(
                "call with {} argument slot(s) to a value of type {}",
                args_size,
                chunk.format_type(ty)
            )));
        }

        match ty.kind() {
            ValueKind::Function => {
                let function = chunk.functions.get(data.as_index()).ok_or_else(|| {
                    RuntimeError::invalid_bytecode(format!(
                        "no function at index {}",
                        data.as_index()
                    ))
                })?;
                // The root frame is not a call.
                if self.frames.len() > self.config.max_call_depth {
                    return Err(RuntimeErrorKind::StackOverflow(self.config.max_call_depth).into());
                }
                self.frames.push(CallFrame {
                    base: callee + 1,
                    ip: function.code_offset,
                });
                Ok(())
            }
            ValueKind::NativeFunction => self.call_native(data.as_index(), callee),
            _ => Err(RuntimeError::invalid_bytecode("call of a value that is not a function")),
        }
    }

    fn call_native(&mut self, index: usize, callee: usize) -> Result<(), RuntimeError> {
        let chunk = self.chunk;
        let entry = chunk.natives.get(index).ok_or_else(|| {
            RuntimeError::invalid_bytecode(format!("no native function at index {}", index))
        })?;
        let binding = entry
            .binding
            .clone()
            .ok_or_else(|| RuntimeErrorKind::UnboundNative(entry.name.clone()))?;
        let return_type = chunk
            .function_types
            .get(entry.type_index)
            .map(|f| f.return_type)
            .ok_or_else(|| {
                RuntimeError::invalid_bytecode(format!("native '{}' has no type", entry.name))
            })?;

        {
            let mut call =
                NativeCall::new(&mut self.values, &mut self.types, &mut self.heap, callee + 1);
            binding.invoke(&mut call)?;
        }

        let size_ok = self.values.len() == callee + chunk.type_size(return_type);
        // Struct slots carry their fields' types, not the struct's.
        let type_ok = return_type.is_kind(ValueKind::Struct)
            || self.types.get(callee) == Some(&return_type);
        if !size_ok || !type_ok {
            return Err(RuntimeErrorKind::NativeResultMismatch(entry.name.clone()).into());
        }
        Ok(())
    }

    fn return_from_frame(&mut self, size: usize) -> Result<bool, RuntimeError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::invalid_bytecode("return without a frame"))?;
        let len = self.require(size)?;
        let result = len - size;

        if self.frames.is_empty() {
            // Returning from the root frame halts, leaving only the result.
            self.values.drain(..result);
            self.types.drain(..result);
            return Ok(true);
        }

        let callee = frame
            .base
            .checked_sub(1)
            .filter(|callee| *callee <= result)
            .ok_or_else(|| RuntimeError::invalid_bytecode("return below its frame"))?;
        self.values.copy_within(result..len, callee);
        self.types.copy_within(result..len, callee);
        self.truncate(callee + size);
        Ok(false)
    }

    // Stack helpers

    fn push(&mut self, data: ValueData, ty: ValueType) {
        self.values.push(data);
        self.types.push(ty);
    }

    fn pop(&mut self) -> Result<(ValueData, ValueType), RuntimeError> {
        match (self.values.pop(), self.types.pop()) {
            (Some(data), Some(ty)) => Ok((data, ty)),
            _ => Err(stack_underflow()),
        }
    }

    fn peek(&self) -> Result<ValueData, RuntimeError> {
        self.values.last().copied().ok_or_else(stack_underflow)
    }

    /// Checks that at least `n` slots are on the stack and returns its length.
    fn require(&self, n: usize) -> Result<usize, RuntimeError> {
        let len = self.values.len();
        if n > len {
            return Err(stack_underflow());
        }
        Ok(len)
    }

    fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
        self.types.truncate(len);
    }

    /// Absolute index of a frame-relative local spanning `size` slots.
    fn local(&self, slot: usize, size: usize) -> Result<usize, RuntimeError> {
        let base = self.frames.last().map(|f| f.base).unwrap_or(0);
        let at = base + slot;
        if at + size > self.values.len() {
            return Err(RuntimeError::invalid_bytecode(format!(
                "local slot {} outside the stack",
                slot
            )));
        }
        Ok(at)
    }

    fn binary_int(
        &mut self,
        op: impl Fn(i64, i64) -> Result<i64, RuntimeErrorKind>,
    ) -> Result<(), RuntimeError> {
        let (b, _) = self.pop()?;
        let (a, _) = self.pop()?;
        let result = op(a.as_int(), b.as_int())?;
        self.push(ValueData::from_int(result), ValueType::INT);
        Ok(())
    }

    fn binary_float(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let (b, _) = self.pop()?;
        let (a, _) = self.pop()?;
        self.push(
            ValueData::from_float(op(a.as_float(), b.as_float())),
            ValueType::FLOAT,
        );
        Ok(())
    }

    fn compare(&mut self, op: impl Fn(ValueData, ValueData) -> bool) -> Result<(), RuntimeError> {
        let (b, _) = self.pop()?;
        let (a, _) = self.pop()?;
        self.push(ValueData::from_bool(op(a, b)), ValueType::BOOL);
        Ok(())
    }

    // Instruction stream

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::invalid_bytecode("no active frame"))
    }

    fn read_byte(&mut self) -> Result<u8, RuntimeError> {
        let chunk = self.chunk;
        let frame = self.frame_mut()?;
        let byte = chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or_else(|| RuntimeError::invalid_bytecode("ran past the end of the code"))?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, RuntimeError> {
        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn jump_forward(&mut self, offset: usize) -> Result<(), RuntimeError> {
        let frame = self.frame_mut()?;
        frame.ip += offset;
        Ok(())
    }

    fn format_value(&self, data: ValueData, ty: ValueType) -> String {
        match ty.kind() {
            ValueKind::Unit => "{}".to_string(),
            ValueKind::Bool => data.as_bool().to_string(),
            ValueKind::Int => data.as_int().to_string(),
            ValueKind::Float => format!("{:?}", data.as_float()),
            ValueKind::String => self.heap.string(data.as_index()).unwrap_or("").to_string(),
            ValueKind::Function => match self.chunk.functions.get(data.as_index()) {
                Some(function) => format!("<fn {}>", function.name),
                None => "<fn>".to_string(),
            },
            ValueKind::NativeFunction => match self.chunk.natives.get(data.as_index()) {
                Some(native) => format!("<native fn {}>", native.name),
                None => "<native fn>".to_string(),
            },
            ValueKind::Struct | ValueKind::Custom => "<object>".to_string(),
        }
    }
}

fn stack_underflow() -> RuntimeError {
    RuntimeError::invalid_bytecode("stack underflow")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::{Compiler, compile};
    use crate::runtime::native::native;
    use crate::token::Slice;

    // ============================================================
    // Test Helpers
    // ============================================================

    /// Compile and run a program, returning what it printed
    fn run(source: &str) -> String {
        let chunk = compile(source).unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        String::from_utf8(vm.into_output()).unwrap()
    }

    fn run_err(source: &str) -> RuntimeError {
        let chunk = compile(source).unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap_err()
    }

    /// Evaluate a single expression
    fn eval<T: Marshal>(source: &str) -> T {
        let chunk = Compiler::new(source).compile_expression().unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        vm.pop_result().unwrap()
    }

    // ============================================================
    // Expressions
    // ============================================================

    #[test]
    fn test_print_sum() {
        assert_eq!(run("fn main() { print 1 + 2 }"), "3\n");
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval::<i64>("2 + 3 * 4"), 14);
        assert_eq!(eval::<i64>("(2 + 3) * 4"), 20);
        assert_eq!(eval::<i64>("7 / 2"), 3);
        assert_eq!(eval::<i64>("-7 / 2"), -3);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval::<f64>("float(3) / 2.0"), 1.5);
        assert_eq!(eval::<i64>("int(2.9)"), 2);
        assert_eq!(eval::<i64>("int(-2.9)"), -2);
    }

    #[test]
    fn test_comparisons() {
        assert!(eval::<bool>("1 < 2"));
        assert!(eval::<bool>("2 >= 2"));
        assert!(!eval::<bool>("2 <= 1"));
        assert!(eval::<bool>("1.5 > 1.0"));
        assert!(eval::<bool>("1 != 2"));
        assert!(eval::<bool>("true == true"));
        assert!(!eval::<bool>("!true"));
    }

    #[test]
    fn test_string_equality_compares_text() {
        assert!(eval::<bool>("\"ab\" == \"ab\""));
        assert!(eval::<bool>("\"ab\" != \"ba\""));
    }

    #[test]
    fn test_and_or_short_circuit_values() {
        assert!(!eval::<bool>("true and false"));
        assert!(eval::<bool>("false or true"));
        assert!(eval::<bool>("1 < 2 and 2 < 3 or false"));
    }

    #[test]
    fn test_integer_arithmetic_wraps() {
        assert_eq!(eval::<i64>("9223372036854775807 + 1"), i64::MIN);
    }

    #[test]
    fn test_if_expression_value() {
        assert_eq!(eval::<i64>("if 1 < 2 { 10 } else { 20 }"), 10);
        assert_eq!(eval::<i64>("if false { 1 } else if true { 2 } else { 3 }"), 2);
    }

    #[test]
    fn test_block_value_drops_locals() {
        assert_eq!(eval::<i64>("{ let a = 1 let b = 2 a + b }"), 3);
    }

    #[test]
    fn test_string_result() {
        assert_eq!(eval::<String>("\"pepper\""), "pepper");
    }

    #[test]
    fn test_result_type_is_checked() {
        let chunk = Compiler::new("1").compile_expression().unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        let err = vm.pop_result::<bool>().unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::ArgumentMismatch { .. }));
    }

    // ============================================================
    // Statements
    // ============================================================

    #[test]
    fn test_while_loop() {
        assert_eq!(
            run("fn main() { let mut i = 0 while i < 3 { print i i = i + 1 } }"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn test_for_loop_is_half_open() {
        assert_eq!(
            run("fn main() { let mut s = 0 for i = 0, 5 { s = s + i } print s }"),
            "10\n"
        );
        assert_eq!(run("fn main() { for i = 3, 3 { print i } }"), "");
    }

    #[test]
    fn test_break_leaves_nested_loops() {
        let output = run("fn main() {
                let mut i = 0
                while true {
                    let a = 1
                    while true {
                        let b = 2
                        print a + b
                        break 2
                    }
                }
                i = i + 1
                print i
            }");
        assert_eq!(output, "3\n1\n");
    }

    #[test]
    fn test_print_formats() {
        let output = run("fn f() {} fn main() { print true print 2.0 print \"s\" print f print {} }");
        assert_eq!(output, "true\n2.0\ns\n<fn f>\n{}\n");
    }

    // ============================================================
    // Functions
    // ============================================================

    #[test]
    fn test_recursion() {
        assert_eq!(
            run("fn fib(n: int): int { if n < 2 { n } else { fib(n - 1) + fib(n - 2) } }
                 fn main() { print fib(10) }"),
            "55\n"
        );
    }

    #[test]
    fn test_early_return() {
        assert_eq!(
            run("fn first(limit: int): int { for i = 0, limit { if i * i > 10 { return i } } 0 - 1 }
                 fn main() { print first(100) print first(2) }"),
            "4\n-1\n"
        );
    }

    #[test]
    fn test_function_values() {
        assert_eq!(
            run("fn twice(f: fn(int): int, x: int): int { f(f(x)) }
                 fn inc(x: int): int { x + 1 }
                 fn main() { print twice(inc, 1) }"),
            "3\n"
        );
    }

    #[test]
    fn test_main_result_is_left_on_stack() {
        let chunk = compile("fn main(): int { 6 * 7 }").unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        assert!(vm.is_halted());
        assert_eq!(vm.stack_len(), 1);
        assert_eq!(vm.pop_result::<i64>().unwrap(), 42);
    }

    // ============================================================
    // Structs
    // ============================================================

    #[test]
    fn test_struct_fields_through_locals_and_calls() {
        let output = run("struct P { x: int, y: int }
             fn swap(p: P): P { P(p.y, p.x) }
             fn main() {
                 let mut p = P(1, 2)
                 p = swap(p)
                 print p.x
                 print p.y
             }");
        assert_eq!(output, "2\n1\n");
    }

    #[test]
    fn test_nested_struct_field() {
        let output = run("struct P { x: int, y: int }
             struct L { a: P, b: P, on: bool }
             fn main() {
                 let l = L(P(1, 2), P(3, 4), true)
                 print l.b.x
                 print l.on
             }");
        assert_eq!(output, "3\ntrue\n");
    }

    // ============================================================
    // Locals inside pending calls and constructors
    // ============================================================

    #[test]
    fn test_local_declared_in_call_argument() {
        let output = run("fn id(a: int): int { a }
             fn add(a: int, b: int): int { a + b }
             fn main() {
                 print id({ let v = 7 v })
                 print add(1, { let v = 2 v * 10 })
             }");
        assert_eq!(output, "7\n21\n");
    }

    #[test]
    fn test_local_declared_in_constructor_field() {
        let output = run("struct P { x: int, y: int }
             fn main() {
                 let p = P(1, { let v = 7 v })
                 print p.x
                 print p.y
             }");
        assert_eq!(output, "1\n7\n");
    }

    #[test]
    fn test_break_inside_call_argument_pops_callee() {
        let chunk = compile(
            "fn id(a: int): int { a }
             fn main() {
                 while true { print id({ break 1 0 }) }
                 let j = 5
                 print j
             }",
        )
        .unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        assert_eq!(vm.stack_len(), 1);
        assert_eq!(vm.into_output(), b"5\n");
    }

    // ============================================================
    // Errors and limits
    // ============================================================

    #[test]
    fn test_division_by_zero_carries_slice() {
        let source = "fn main() { let z = 0 print 1 / z }";
        let err = run_err(source);
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        let slice = err.slice.unwrap();
        assert_eq!(slice.text(source), "/");
        assert_eq!(err.call_stack, vec!["main".to_string()]);
    }

    #[test]
    fn test_float_division_by_zero_is_infinite() {
        assert_eq!(eval::<f64>("1.0 / 0.0"), f64::INFINITY);
    }

    #[test]
    fn test_runaway_recursion_overflows() {
        let chunk = compile("fn down(n: int): int { down(n + 1) } fn main() { print down(0) }").unwrap();
        let config = VmConfig {
            max_call_depth: 50,
            ..VmConfig::default()
        };
        let mut vm = VirtualMachine::with_config(&chunk, config, Vec::new());
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow(50));
        assert!(err.call_stack.iter().all(|name| name == "down" || name == "main"));
        assert!(vm.is_halted());
    }

    #[test]
    fn test_step_limit() {
        let chunk = compile("fn main() { while true {} }").unwrap();
        let config = VmConfig {
            max_steps: Some(100),
            ..VmConfig::default()
        };
        let mut vm = VirtualMachine::with_config(&chunk, config, Vec::new());
        assert_eq!(
            vm.run().unwrap_err().kind,
            RuntimeErrorKind::StepLimitExceeded(100)
        );
    }

    #[test]
    fn test_invalid_opcode_is_an_error() {
        let mut chunk = Chunk::new();
        chunk.write_byte(0xfe, Slice::default());
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        assert!(matches!(
            vm.run().unwrap_err().kind,
            RuntimeErrorKind::InvalidBytecode(_)
        ));
    }

    #[test]
    fn test_underflow_is_an_error() {
        let mut chunk = Chunk::new();
        chunk.write_instruction(Instruction::AddInt, Slice::default());
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        assert!(matches!(
            vm.run().unwrap_err().kind,
            RuntimeErrorKind::InvalidBytecode(_)
        ));
    }

    #[test]
    fn test_tick_reports_halt() {
        let chunk = Compiler::new("true").compile_expression().unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        assert!(!vm.tick().unwrap());
        assert!(vm.tick().unwrap());
        assert!(vm.tick().unwrap());
    }

    // ============================================================
    // Natives
    // ============================================================

    #[test]
    fn test_native_call() {
        let mut chunk = Chunk::new();
        chunk
            .register_native("add", native(|(a, b): (i64, i64)| a + b))
            .unwrap();
        let chunk = Compiler::with_chunk("fn main() { print add(40, 2) }", chunk)
            .compile()
            .unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        assert_eq!(vm.into_output(), b"42\n");
    }

    #[test]
    fn test_unbound_native() {
        let mut chunk = Chunk::new();
        chunk
            .register_native("answer", native(|(): ()| 42_i64))
            .unwrap();
        let compiled = Compiler::with_chunk("fn main() { print answer() }", chunk)
            .compile()
            .unwrap();
        let decoded = Chunk::from_bytes(&compiled.to_bytes().unwrap()).unwrap();

        let mut vm = VirtualMachine::with_output(&decoded, Vec::new());
        assert_eq!(
            vm.run().unwrap_err().kind,
            RuntimeErrorKind::UnboundNative("answer".to_string())
        );
    }
}
