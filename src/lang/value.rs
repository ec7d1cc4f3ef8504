use serde::{Deserialize, Serialize};

/// The kind half of a `ValueType`. Fits in four bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Unit,
    Bool,
    Int,
    Float,
    String,
    Function,
    NativeFunction,
    Struct,
    Custom,
}

impl ValueKind {
    fn from_bits(bits: u32) -> ValueKind {
        match bits {
            1 => ValueKind::Bool,
            2 => ValueKind::Int,
            3 => ValueKind::Float,
            4 => ValueKind::String,
            5 => ValueKind::Function,
            6 => ValueKind::NativeFunction,
            7 => ValueKind::Struct,
            8 => ValueKind::Custom,
            _ => ValueKind::Unit,
        }
    }
}

const KIND_BITS: u32 = 4;
const KIND_MASK: u32 = (1 << KIND_BITS) - 1;

/// A packed type: kind in the low four bits, a type-table index above.
///
/// For `Function` and `NativeFunction` the index points into the chunk's
/// function-type table, for `Struct` into the struct-type table. Two types
/// are the same type exactly when their packed words are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType(u32);

impl ValueType {
    pub const UNIT: ValueType = ValueType::new(ValueKind::Unit);
    pub const BOOL: ValueType = ValueType::new(ValueKind::Bool);
    pub const INT: ValueType = ValueType::new(ValueKind::Int);
    pub const FLOAT: ValueType = ValueType::new(ValueKind::Float);
    pub const STRING: ValueType = ValueType::new(ValueKind::String);
    pub const CUSTOM: ValueType = ValueType::new(ValueKind::Custom);

    pub const fn new(kind: ValueKind) -> Self {
        ValueType(kind as u32)
    }

    pub const fn with_index(kind: ValueKind, index: usize) -> Self {
        ValueType(kind as u32 | ((index as u32) << KIND_BITS))
    }

    pub fn kind(self) -> ValueKind {
        ValueKind::from_bits(self.0 & KIND_MASK)
    }

    pub fn index(self) -> usize {
        (self.0 >> KIND_BITS) as usize
    }

    pub fn is_kind(self, kind: ValueKind) -> bool {
        self.kind() == kind
    }

    pub fn is_callable(self) -> bool {
        matches!(self.kind(), ValueKind::Function | ValueKind::NativeFunction)
    }
}

impl std::fmt::Debug for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            ValueKind::Function | ValueKind::NativeFunction | ValueKind::Struct => {
                write!(f, "{:?}#{}", self.kind(), self.index())
            }
            kind => write!(f, "{:?}", kind),
        }
    }
}

/// One untagged value word.
///
/// Holds a bool, an int or a float. Which one is meaningful is known only
/// from the type that travels alongside it (the compile-time type stack, or
/// the VM's runtime type stack). Strings, host objects and functions store
/// an index in the int interpretation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueData(u64);

impl ValueData {
    pub const ZERO: ValueData = ValueData(0);

    pub fn from_bool(value: bool) -> Self {
        ValueData(value as u64)
    }

    pub fn from_int(value: i64) -> Self {
        ValueData(value as u64)
    }

    pub fn from_float(value: f64) -> Self {
        ValueData(value.to_bits())
    }

    pub fn from_index(index: usize) -> Self {
        ValueData(index as u64)
    }

    pub fn as_bool(self) -> bool {
        self.0 != 0
    }

    pub fn as_int(self) -> i64 {
        self.0 as i64
    }

    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for ValueData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueData({:#x})", self.0)
    }
}
