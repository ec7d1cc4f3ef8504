use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::op::Instruction;
use crate::bytecode::types::{
    FunctionType, FunctionTypeBuilder, StructField, StructType, StructTypeBuilder, TypeError,
};
use crate::lang::{ValueData, ValueKind, ValueType};
use crate::runtime::native::NativeFunction;
use crate::token::Slice;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkCodecError {
    #[error("could not encode chunk: {0}")]
    Encode(String),
    #[error("could not decode chunk: {0}")]
    Decode(String),
}

/// A script function: where its code starts and what type it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub type_index: usize,
    pub code_offset: usize,
}

/// A host function. The binding is not serialized; a decoded chunk needs
/// `bind_native` before its natives can be called.
#[derive(Clone, Serialize, Deserialize)]
pub struct NativeEntry {
    pub name: String,
    pub type_index: usize,
    #[serde(skip)]
    pub binding: Option<Rc<dyn NativeFunction>>,
}

impl std::fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEntry")
            .field("name", &self.name)
            .field("type_index", &self.type_index)
            .field("bound", &self.binding.is_some())
            .finish()
    }
}

/// A compiled program.
///
/// `code` and `slices` always have the same length: every byte remembers the
/// source it was emitted for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub slices: Vec<Slice>,

    pub literal_data: Vec<ValueData>,
    pub literal_types: Vec<ValueType>,
    pub strings: Vec<String>,

    pub function_types: Vec<FunctionType>,
    pub function_params: Vec<ValueType>,
    pub struct_types: Vec<StructType>,
    pub struct_fields: Vec<StructField>,

    pub functions: Vec<Function>,
    pub natives: Vec<NativeEntry>,

    /// Where execution starts.
    pub entry: usize,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Code
    // =========================================================================

    pub fn write_byte(&mut self, byte: u8, slice: Slice) {
        self.code.push(byte);
        self.slices.push(slice);
    }

    pub fn write_instruction(&mut self, instruction: Instruction, slice: Slice) {
        self.write_byte(instruction as u8, slice);
    }

    pub fn truncate_code(&mut self, len: usize) {
        self.code.truncate(len);
        self.slices.truncate(len);
    }

    pub fn patch_u16(&mut self, at: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        if let Some(bytes) = self.code.get_mut(at..at + 2) {
            bytes[0] = hi;
            bytes[1] = lo;
        }
    }

    pub fn read_u16(&self, at: usize) -> Option<u16> {
        let bytes = self.code.get(at..at + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    // =========================================================================
    // Literals
    // =========================================================================

    /// Returns the index of an identical literal (same type, same bits) or
    /// appends a new one.
    pub fn add_value_literal(&mut self, data: ValueData, ty: ValueType) -> usize {
        let existing = self
            .literal_data
            .iter()
            .zip(&self.literal_types)
            .position(|(d, t)| *t == ty && *d == data);

        match existing {
            Some(index) => index,
            None => {
                self.literal_data.push(data);
                self.literal_types.push(ty);
                self.literal_data.len() - 1
            }
        }
    }

    pub fn add_string_literal(&mut self, text: &str) -> usize {
        let index = match self.strings.iter().position(|s| s == text) {
            Some(index) => index,
            None => {
                self.strings.push(text.to_string());
                self.strings.len() - 1
            }
        };
        self.add_value_literal(ValueData::from_index(index), ValueType::STRING)
    }

    // =========================================================================
    // Types
    // =========================================================================

    pub fn begin_function_type(&self) -> FunctionTypeBuilder {
        FunctionTypeBuilder::default()
    }

    /// Interns a function type. Structurally equal signatures share an index.
    pub fn end_function_type(&mut self, builder: FunctionTypeBuilder) -> usize {
        let existing = self.function_types.iter().position(|ty| {
            ty.return_type == builder.return_type && self.params(ty) == builder.params.as_slice()
        });
        if let Some(index) = existing {
            return index;
        }

        let params_size = builder.params.iter().map(|p| self.type_size(*p)).sum();
        let params_start = self.function_params.len();
        self.function_params.extend_from_slice(&builder.params);
        self.function_types.push(FunctionType {
            params_start,
            params_len: builder.params.len(),
            return_type: builder.return_type,
            params_size,
        });
        self.function_types.len() - 1
    }

    pub fn begin_struct_type(&self) -> StructTypeBuilder {
        StructTypeBuilder::default()
    }

    /// Interns a struct type by name. Re-declaring an identical struct gives
    /// back the existing index, any other reuse of the name is an error.
    pub fn end_struct_type(
        &mut self,
        name: &str,
        builder: StructTypeBuilder,
    ) -> Result<usize, TypeError> {
        if let Some(index) = self.find_struct(name) {
            if self.fields(&self.struct_types[index]) == builder.fields.as_slice() {
                return Ok(index);
            }
            return Err(TypeError::DuplicateStruct(name.to_string()));
        }

        let size = builder.fields.iter().map(|f| self.type_size(f.ty)).sum();
        let fields_start = self.struct_fields.len();
        let fields_len = builder.fields.len();
        self.struct_fields.extend(builder.fields);
        self.struct_types.push(StructType {
            name: name.to_string(),
            fields_start,
            fields_len,
            size,
        });
        Ok(self.struct_types.len() - 1)
    }

    pub fn params(&self, ty: &FunctionType) -> &[ValueType] {
        self.function_params
            .get(ty.params_start..ty.params_start + ty.params_len)
            .unwrap_or(&[])
    }

    pub fn fields(&self, ty: &StructType) -> &[StructField] {
        self.struct_fields
            .get(ty.fields_start..ty.fields_start + ty.fields_len)
            .unwrap_or(&[])
    }

    /// The function type behind a `Function` or `NativeFunction` value type.
    pub fn function_type(&self, ty: ValueType) -> Option<&FunctionType> {
        if !ty.is_callable() {
            return None;
        }
        self.function_types.get(ty.index())
    }

    pub fn struct_type(&self, ty: ValueType) -> Option<&StructType> {
        if !ty.is_kind(ValueKind::Struct) {
            return None;
        }
        self.struct_types.get(ty.index())
    }

    pub fn find_struct(&self, name: &str) -> Option<usize> {
        self.struct_types.iter().position(|s| s.name == name)
    }

    /// Number of value slots a value of this type occupies.
    pub fn type_size(&self, ty: ValueType) -> usize {
        match self.struct_type(ty) {
            Some(s) => s.size,
            None if ty.is_kind(ValueKind::Struct) => 0,
            None => 1,
        }
    }

    pub fn format_type(&self, ty: ValueType) -> String {
        match ty.kind() {
            ValueKind::Unit => "{}".to_string(),
            ValueKind::Bool => "bool".to_string(),
            ValueKind::Int => "int".to_string(),
            ValueKind::Float => "float".to_string(),
            ValueKind::String => "string".to_string(),
            ValueKind::Custom => "custom".to_string(),
            ValueKind::Struct => match self.struct_type(ty) {
                Some(s) => s.name.clone(),
                None => "struct?".to_string(),
            },
            ValueKind::Function | ValueKind::NativeFunction => {
                let prefix = if ty.is_kind(ValueKind::NativeFunction) {
                    "native fn"
                } else {
                    "fn"
                };
                let Some(function) = self.function_type(ty) else {
                    return format!("{}?", prefix);
                };
                let params: Vec<String> = self
                    .params(function)
                    .iter()
                    .map(|p| self.format_type(*p))
                    .collect();
                let mut text = format!("{}({})", prefix, params.join(", "));
                if function.return_type != ValueType::UNIT {
                    text.push_str(": ");
                    text.push_str(&self.format_type(function.return_type));
                }
                text
            }
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn find_native(&self, name: &str) -> Option<usize> {
        self.natives.iter().position(|n| n.name == name)
    }

    /// Name of the script function whose code contains `offset`.
    pub fn function_at(&self, offset: usize) -> Option<&str> {
        // Function bodies are laid out in declaration order, the entry stub last.
        if offset >= self.entry {
            return None;
        }
        self.functions
            .iter()
            .filter(|f| f.code_offset <= offset)
            .max_by_key(|f| f.code_offset)
            .map(|f| f.name.as_str())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn to_bytes(&self) -> Result<Vec<u8>, ChunkCodecError> {
        postcard::to_allocvec(self).map_err(|e| ChunkCodecError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk, ChunkCodecError> {
        postcard::from_bytes(bytes).map_err(|e| ChunkCodecError::Decode(e.to_string()))
    }
}
