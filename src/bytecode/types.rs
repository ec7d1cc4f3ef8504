use crate::lang::ValueType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Functions take at most this many parameters.
pub const MAX_PARAMS: usize = 8;
/// Structs hold at most this many fields.
pub const MAX_FIELDS: usize = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("struct '{0}' is already declared")]
    DuplicateStruct(String),
    #[error("field '{0}' is declared twice")]
    DuplicateField(String),
    #[error("too many fields (max {MAX_FIELDS})")]
    TooManyFields,
    #[error("too many parameters (max {MAX_PARAMS})")]
    TooManyParams,
    #[error("native function '{0}' is already registered")]
    DuplicateNative(String),
    #[error("no native function named '{0}'")]
    UnknownNative(String),
    #[error("native function '{name}' was compiled as {expected} but the binding describes {found}")]
    SignatureMismatch {
        name: String,
        expected: String,
        found: String,
    },
}

/// A structural function signature. Parameters live in the chunk's shared
/// parameter array at `params_start..params_start + params_len`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionType {
    pub params_start: usize,
    pub params_len: usize,
    pub return_type: ValueType,
    /// Total slot size of all parameters.
    pub params_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields_start: usize,
    pub fields_len: usize,
    /// Total slot size of all fields.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionTypeBuilder {
    pub params: Vec<ValueType>,
    pub return_type: ValueType,
}

impl Default for FunctionTypeBuilder {
    fn default() -> Self {
        FunctionTypeBuilder {
            params: Vec::new(),
            return_type: ValueType::UNIT,
        }
    }
}

impl FunctionTypeBuilder {
    pub fn add_param(&mut self, ty: ValueType) -> Result<(), TypeError> {
        if self.params.len() >= MAX_PARAMS {
            return Err(TypeError::TooManyParams);
        }
        self.params.push(ty);
        Ok(())
    }

    pub fn returns(&mut self, ty: ValueType) {
        self.return_type = ty;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructTypeBuilder {
    pub fields: Vec<StructField>,
}

impl StructTypeBuilder {
    /// Appends a field. Duplicate names are rejected with a linear scan; the
    /// first declaration wins.
    pub fn add_field(&mut self, name: &str, ty: ValueType) -> Result<(), TypeError> {
        if self.fields.iter().any(|f| f.name == name) {
            return Err(TypeError::DuplicateField(name.to_string()));
        }
        if self.fields.len() >= MAX_FIELDS {
            return Err(TypeError::TooManyFields);
        }
        self.fields.push(StructField {
            name: name.to_string(),
            ty,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_builder_caps_params() {
        let mut builder = FunctionTypeBuilder::default();
        for _ in 0..MAX_PARAMS {
            builder.add_param(ValueType::INT).unwrap();
        }
        assert_eq!(
            builder.add_param(ValueType::INT),
            Err(TypeError::TooManyParams)
        );
        assert_eq!(builder.params.len(), MAX_PARAMS);
    }

    #[test]
    fn test_struct_builder_keeps_first_duplicate() {
        let mut builder = StructTypeBuilder::default();
        builder.add_field("x", ValueType::INT).unwrap();
        let err = builder.add_field("x", ValueType::FLOAT).unwrap_err();

        assert!(err.to_string().contains("'x'"));
        assert_eq!(builder.fields.len(), 1);
        assert_eq!(builder.fields[0].ty, ValueType::INT);
    }

    #[test]
    fn test_struct_builder_caps_fields() {
        let mut builder = StructTypeBuilder::default();
        for i in 0..MAX_FIELDS {
            builder.add_field(&format!("f{}", i), ValueType::BOOL).unwrap();
        }
        assert_eq!(
            builder.add_field("extra", ValueType::BOOL),
            Err(TypeError::TooManyFields)
        );
    }
}
