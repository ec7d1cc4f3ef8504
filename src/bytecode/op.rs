// =============================================================================
// INSTRUCTION - one opcode byte, followed by its operand bytes
// =============================================================================
//
// Operands are single bytes unless noted. `u16` operands are big-endian.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    /// Stop execution of the whole program.
    Halt,
    /// `size`: pop the result, drop the frame and its callee slot, push the result.
    Return,
    /// Pop one slot and print it with a trailing newline.
    Print,

    Pop,
    /// `n`: drop `n` slots.
    PopMultiple,
    /// `n, size`: move the top `size` slots down over `n` slots, dropping those.
    CopyTo,

    LoadUnit,
    LoadFalse,
    LoadTrue,
    /// `index` into the literal pool.
    LoadLiteral,
    /// `u16` index into the function table.
    LoadFunction,
    /// `u16` index into the native function table.
    LoadNativeFunction,

    /// `slot`: store the top slot into a frame slot, keeping it on the stack.
    AssignLocal,
    /// `slot, size`
    AssignLocalMultiple,
    /// `slot`
    LoadLocal,
    /// `slot, size`
    LoadLocalMultiple,
    /// `slot`: add one to an int local.
    IncrementLocal,

    IntToFloat,
    FloatToInt,

    NegateInt,
    NegateFloat,

    AddInt,
    AddFloat,
    SubtractInt,
    SubtractFloat,
    MultiplyInt,
    MultiplyFloat,
    DivideInt,
    DivideFloat,

    Not,
    EqualBool,
    EqualInt,
    EqualFloat,
    EqualString,
    GreaterInt,
    GreaterFloat,
    LessInt,
    LessFloat,

    /// `u16` forward offset.
    JumpForward,
    /// `u16` backward offset, subtracted after the operand is read.
    JumpBackward,
    /// `u16`: jump when the top bool is false, leaving it in place.
    JumpForwardIfFalse,
    /// `u16`: jump when the top bool is true, leaving it in place.
    JumpForwardIfTrue,
    /// `u16`: pop the top bool and jump when it was false.
    PopAndJumpForwardIfFalse,
    /// `slot`: push whether the int at `slot` is below the int at `slot + 1`.
    ForLoopCheck,

    /// `size` of the arguments sitting above the callee.
    Call,

    /// `struct size, field offset, field size`: replace the top struct by one of its fields.
    SelectField,
}

impl Instruction {
    const ALL: [Instruction; 46] = [
        Instruction::Halt,
        Instruction::Return,
        Instruction::Print,
        Instruction::Pop,
        Instruction::PopMultiple,
        Instruction::CopyTo,
        Instruction::LoadUnit,
        Instruction::LoadFalse,
        Instruction::LoadTrue,
        Instruction::LoadLiteral,
        Instruction::LoadFunction,
        Instruction::LoadNativeFunction,
        Instruction::AssignLocal,
        Instruction::AssignLocalMultiple,
        Instruction::LoadLocal,
        Instruction::LoadLocalMultiple,
        Instruction::IncrementLocal,
        Instruction::IntToFloat,
        Instruction::FloatToInt,
        Instruction::NegateInt,
        Instruction::NegateFloat,
        Instruction::AddInt,
        Instruction::AddFloat,
        Instruction::SubtractInt,
        Instruction::SubtractFloat,
        Instruction::MultiplyInt,
        Instruction::MultiplyFloat,
        Instruction::DivideInt,
        Instruction::DivideFloat,
        Instruction::Not,
        Instruction::EqualBool,
        Instruction::EqualInt,
        Instruction::EqualFloat,
        Instruction::EqualString,
        Instruction::GreaterInt,
        Instruction::GreaterFloat,
        Instruction::LessInt,
        Instruction::LessFloat,
        Instruction::JumpForward,
        Instruction::JumpBackward,
        Instruction::JumpForwardIfFalse,
        Instruction::JumpForwardIfTrue,
        Instruction::PopAndJumpForwardIfFalse,
        Instruction::ForLoopCheck,
        Instruction::Call,
        Instruction::SelectField,
    ];

    pub fn from_byte(byte: u8) -> Option<Instruction> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Number of operand bytes that follow the opcode.
    pub fn operand_len(self) -> usize {
        match self {
            Instruction::Return
            | Instruction::PopMultiple
            | Instruction::LoadLiteral
            | Instruction::AssignLocal
            | Instruction::LoadLocal
            | Instruction::IncrementLocal
            | Instruction::ForLoopCheck
            | Instruction::Call => 1,

            Instruction::CopyTo
            | Instruction::AssignLocalMultiple
            | Instruction::LoadLocalMultiple
            | Instruction::LoadFunction
            | Instruction::LoadNativeFunction
            | Instruction::JumpForward
            | Instruction::JumpBackward
            | Instruction::JumpForwardIfFalse
            | Instruction::JumpForwardIfTrue
            | Instruction::PopAndJumpForwardIfFalse => 2,

            Instruction::SelectField => 3,

            _ => 0,
        }
    }

    pub fn is_forward_jump(self) -> bool {
        matches!(
            self,
            Instruction::JumpForward
                | Instruction::JumpForwardIfFalse
                | Instruction::JumpForwardIfTrue
                | Instruction::PopAndJumpForwardIfFalse
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Instruction::Halt => "HALT",
            Instruction::Return => "RETURN",
            Instruction::Print => "PRINT",
            Instruction::Pop => "POP",
            Instruction::PopMultiple => "POP_MULTIPLE",
            Instruction::CopyTo => "COPY_TO",
            Instruction::LoadUnit => "LOAD_UNIT",
            Instruction::LoadFalse => "LOAD_FALSE",
            Instruction::LoadTrue => "LOAD_TRUE",
            Instruction::LoadLiteral => "LOAD_LITERAL",
            Instruction::LoadFunction => "LOAD_FUNCTION",
            Instruction::LoadNativeFunction => "LOAD_NATIVE",
            Instruction::AssignLocal => "ASSIGN_LOCAL",
            Instruction::AssignLocalMultiple => "ASSIGN_LOCAL_N",
            Instruction::LoadLocal => "LOAD_LOCAL",
            Instruction::LoadLocalMultiple => "LOAD_LOCAL_N",
            Instruction::IncrementLocal => "INC_LOCAL",
            Instruction::IntToFloat => "INT_TO_FLOAT",
            Instruction::FloatToInt => "FLOAT_TO_INT",
            Instruction::NegateInt => "NEG_INT",
            Instruction::NegateFloat => "NEG_FLOAT",
            Instruction::AddInt => "ADD_INT",
            Instruction::AddFloat => "ADD_FLOAT",
            Instruction::SubtractInt => "SUB_INT",
            Instruction::SubtractFloat => "SUB_FLOAT",
            Instruction::MultiplyInt => "MUL_INT",
            Instruction::MultiplyFloat => "MUL_FLOAT",
            Instruction::DivideInt => "DIV_INT",
            Instruction::DivideFloat => "DIV_FLOAT",
            Instruction::Not => "NOT",
            Instruction::EqualBool => "EQ_BOOL",
            Instruction::EqualInt => "EQ_INT",
            Instruction::EqualFloat => "EQ_FLOAT",
            Instruction::EqualString => "EQ_STRING",
            Instruction::GreaterInt => "GT_INT",
            Instruction::GreaterFloat => "GT_FLOAT",
            Instruction::LessInt => "LT_INT",
            Instruction::LessFloat => "LT_FLOAT",
            Instruction::JumpForward => "JUMP",
            Instruction::JumpBackward => "JUMP_BACK",
            Instruction::JumpForwardIfFalse => "JUMP_FALSE",
            Instruction::JumpForwardIfTrue => "JUMP_TRUE",
            Instruction::PopAndJumpForwardIfFalse => "POP_JUMP_FALSE",
            Instruction::ForLoopCheck => "FOR_CHECK",
            Instruction::Call => "CALL",
            Instruction::SelectField => "SELECT_FIELD",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte_round_trips_every_opcode() {
        for byte in 0..=Instruction::SelectField as u8 {
            let instruction = Instruction::from_byte(byte).expect("valid opcode");
            assert_eq!(instruction as u8, byte);
        }
    }

    #[test]
    fn test_from_byte_rejects_unknown() {
        assert_eq!(Instruction::from_byte(Instruction::SelectField as u8 + 1), None);
        assert_eq!(Instruction::from_byte(200), None);
    }

    #[test]
    fn test_operand_lengths() {
        assert_eq!(Instruction::AddInt.operand_len(), 0);
        assert_eq!(Instruction::LoadLiteral.operand_len(), 1);
        assert_eq!(Instruction::JumpBackward.operand_len(), 2);
        assert_eq!(Instruction::SelectField.operand_len(), 3);
    }
}
