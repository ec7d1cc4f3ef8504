use crate::bytecode::chunk::Chunk;
use crate::bytecode::op::Instruction;
use crate::lang::ValueKind;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub instruction: Instruction,
    pub operands: Vec<u8>,
}

impl DecodedInstruction {
    fn operand_u16(&self) -> usize {
        match self.operands.as_slice() {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as usize,
            _ => 0,
        }
    }

    /// Where a jump lands, if this is a jump.
    pub fn jump_target(&self) -> Option<usize> {
        let after = self.offset + 1 + self.operands.len();
        match self.instruction {
            Instruction::JumpBackward => after.checked_sub(self.operand_u16()),
            i if i.is_forward_jump() => Some(after + self.operand_u16()),
            _ => None,
        }
    }
}

/// Decodes the whole code stream. Stops at the first byte that is not a
/// valid opcode or at a truncated operand.
pub fn decode(chunk: &Chunk) -> Vec<DecodedInstruction> {
    let mut decoded = Vec::new();
    let mut ip = 0;

    while ip < chunk.code.len() {
        let Some(instruction) = Instruction::from_byte(chunk.code[ip]) else {
            break;
        };
        let end = ip + 1 + instruction.operand_len();
        let Some(operands) = chunk.code.get(ip + 1..end) else {
            break;
        };
        decoded.push(DecodedInstruction {
            offset: ip,
            instruction,
            operands: operands.to_vec(),
        });
        ip = end;
    }

    decoded
}

/// Print disassembly of a chunk
pub fn print_chunk(chunk: &Chunk) {
    print!("{}", disassemble(chunk));
}

/// Return disassembly as a String
pub fn disassemble(chunk: &Chunk) -> String {
    let decoded = decode(chunk);
    let jump_targets: Vec<usize> = decoded.iter().filter_map(|d| d.jump_target()).collect();
    let mut out = String::new();

    for d in &decoded {
        if let Some(header) = section_header(chunk, d.offset) {
            out.push_str("════════════════════════════════════════\n");
            out.push_str(&format!(" {}\n", header));
            out.push_str("════════════════════════════════════════\n");
        }

        if jump_targets.contains(&d.offset) {
            out.push_str("      ┌──────────────────────────────────\n");
        }

        let marker = if jump_targets.contains(&d.offset) {
            "► "
        } else {
            "  "
        };
        out.push_str(&format!("{:04} {}", d.offset, marker));
        out.push_str(&format_instruction(chunk, d));
        out.push('\n');
    }

    let decoded_len = decoded
        .last()
        .map(|d| d.offset + 1 + d.operands.len())
        .unwrap_or(0);
    if decoded_len < chunk.code.len() {
        out.push_str(&format!(
            "{:04}   ??? invalid opcode 0x{:02x}\n",
            decoded_len, chunk.code[decoded_len]
        ));
    }

    out
}

fn section_header(chunk: &Chunk, offset: usize) -> Option<String> {
    if offset == chunk.entry {
        return Some("<entry>".to_string());
    }
    chunk.functions.iter().find(|f| f.code_offset == offset).map(|f| {
        let ty = crate::lang::ValueType::with_index(ValueKind::Function, f.type_index);
        format!("{} : {}", f.name, chunk.format_type(ty))
    })
}

fn format_instruction(chunk: &Chunk, d: &DecodedInstruction) -> String {
    let name = d.instruction.mnemonic();
    let ops = &d.operands;

    match d.instruction {
        Instruction::LoadLiteral => {
            let index = ops[0] as usize;
            format!("{:<15} {} ; {}", name, index, format_literal(chunk, index))
        }
        Instruction::LoadFunction => {
            let index = d.operand_u16();
            let label = chunk
                .functions
                .get(index)
                .map(|f| f.name.as_str())
                .unwrap_or("?");
            format!("{:<15} {} ; {}", name, index, label)
        }
        Instruction::LoadNativeFunction => {
            let index = d.operand_u16();
            let label = chunk
                .natives
                .get(index)
                .map(|n| n.name.as_str())
                .unwrap_or("?");
            format!("{:<15} {} ; {}", name, index, label)
        }
        Instruction::JumpBackward => {
            let target = d.jump_target().unwrap_or(0);
            format!("{:<15} -{} ↑ (→ {:04})", name, d.operand_u16(), target)
        }
        i if i.is_forward_jump() => {
            let target = d.jump_target().unwrap_or(0);
            format!("{:<15} +{} ↓ (→ {:04})", name, d.operand_u16(), target)
        }
        _ if ops.is_empty() => name.to_string(),
        _ => {
            let operands: Vec<String> = ops.iter().map(|b| b.to_string()).collect();
            format!("{:<15} {}", name, operands.join(" "))
        }
    }
}

fn format_literal(chunk: &Chunk, index: usize) -> String {
    let (Some(data), Some(ty)) = (chunk.literal_data.get(index), chunk.literal_types.get(index))
    else {
        return "?".to_string();
    };
    match ty.kind() {
        ValueKind::Bool => data.as_bool().to_string(),
        ValueKind::Int => data.as_int().to_string(),
        ValueKind::Float => format!("{:?}", data.as_float()),
        ValueKind::String => match chunk.strings.get(data.as_index()) {
            Some(s) => format!("{:?}", s),
            None => "?".to_string(),
        },
        _ => chunk.format_type(*ty),
    }
}
