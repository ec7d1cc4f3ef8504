//! Moving host values in and out of VM value slots.
//!
//! A host type describes itself with [`Marshal::value_type`] and reads or
//! writes its slots in declaration order. Aggregates implement the trait by
//! hand: [`StructSchema`] registers the layout, and `read`/`write` visit the
//! fields in the same order.
//!
//! ```ignore
//! struct Point { x: i64, y: i64 }
//!
//! impl Marshal for Point {
//!     fn value_type(chunk: &mut Chunk) -> Result<ValueType, TypeError> {
//!         StructSchema::new(chunk, "Point").field::<i64>("x").field::<i64>("y").finish()
//!     }
//!     fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
//!         Ok(Point { x: reader.read()?, y: reader.read()? })
//!     }
//!     fn write(self, writer: &mut SlotWriter<'_>) {
//!         writer.write(self.x);
//!         writer.write(self.y);
//!     }
//! }
//! ```

use std::any::Any;
use std::rc::Rc;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::types::{StructTypeBuilder, TypeError};
use crate::lang::{ValueData, ValueKind, ValueType};
use crate::runtime::heap::Heap;
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};

pub trait Marshal: Sized {
    /// The script type of this host type. Registers struct types in the
    /// chunk on first use.
    fn value_type(chunk: &mut Chunk) -> Result<ValueType, TypeError>;

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError>;

    fn write(self, writer: &mut SlotWriter<'_>);
}

/// Reads values slot by slot, checking each slot's runtime type.
pub struct SlotReader<'a> {
    values: &'a [ValueData],
    types: &'a [ValueType],
    heap: &'a Heap,
    cursor: usize,
}

impl<'a> SlotReader<'a> {
    pub fn new(values: &'a [ValueData], types: &'a [ValueType], heap: &'a Heap) -> Self {
        SlotReader {
            values,
            types,
            heap,
            cursor: 0,
        }
    }

    pub fn starting_at(mut self, cursor: usize) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn read<T: Marshal>(&mut self) -> Result<T, RuntimeError> {
        T::read(self)
    }

    /// Takes the next slot, which must hold a value of `kind`.
    pub fn take(&mut self, kind: ValueKind) -> Result<ValueData, RuntimeError> {
        let (Some(data), Some(ty)) = (self.values.get(self.cursor), self.types.get(self.cursor))
        else {
            return Err(RuntimeErrorKind::ArgumentMismatch {
                expected: kind_name(kind).to_string(),
                found: "nothing".to_string(),
            }
            .into());
        };
        if ty.kind() != kind {
            return Err(RuntimeErrorKind::ArgumentMismatch {
                expected: kind_name(kind).to_string(),
                found: kind_name(ty.kind()).to_string(),
            }
            .into());
        }
        self.cursor += 1;
        Ok(*data)
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.values.len().saturating_sub(self.cursor)
    }
}

/// Appends values to the value and type stacks.
pub struct SlotWriter<'a> {
    values: &'a mut Vec<ValueData>,
    types: &'a mut Vec<ValueType>,
    heap: &'a mut Heap,
}

impl<'a> SlotWriter<'a> {
    pub fn new(
        values: &'a mut Vec<ValueData>,
        types: &'a mut Vec<ValueType>,
        heap: &'a mut Heap,
    ) -> Self {
        SlotWriter {
            values,
            types,
            heap,
        }
    }

    pub fn write<T: Marshal>(&mut self, value: T) {
        value.write(self);
    }

    pub fn push(&mut self, data: ValueData, ty: ValueType) {
        self.values.push(data);
        self.types.push(ty);
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut *self.heap
    }
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Unit => "{}",
        ValueKind::Bool => "bool",
        ValueKind::Int => "int",
        ValueKind::Float => "float",
        ValueKind::String => "string",
        ValueKind::Function => "function",
        ValueKind::NativeFunction => "native function",
        ValueKind::Struct => "struct",
        ValueKind::Custom => "custom",
    }
}

impl Marshal for () {
    fn value_type(_: &mut Chunk) -> Result<ValueType, TypeError> {
        Ok(ValueType::UNIT)
    }

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
        reader.take(ValueKind::Unit).map(|_| ())
    }

    fn write(self, writer: &mut SlotWriter<'_>) {
        writer.push(ValueData::ZERO, ValueType::UNIT);
    }
}

impl Marshal for bool {
    fn value_type(_: &mut Chunk) -> Result<ValueType, TypeError> {
        Ok(ValueType::BOOL)
    }

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
        reader.take(ValueKind::Bool).map(ValueData::as_bool)
    }

    fn write(self, writer: &mut SlotWriter<'_>) {
        writer.push(ValueData::from_bool(self), ValueType::BOOL);
    }
}

impl Marshal for i64 {
    fn value_type(_: &mut Chunk) -> Result<ValueType, TypeError> {
        Ok(ValueType::INT)
    }

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
        reader.take(ValueKind::Int).map(ValueData::as_int)
    }

    fn write(self, writer: &mut SlotWriter<'_>) {
        writer.push(ValueData::from_int(self), ValueType::INT);
    }
}

impl Marshal for f64 {
    fn value_type(_: &mut Chunk) -> Result<ValueType, TypeError> {
        Ok(ValueType::FLOAT)
    }

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
        reader.take(ValueKind::Float).map(ValueData::as_float)
    }

    fn write(self, writer: &mut SlotWriter<'_>) {
        writer.push(ValueData::from_float(self), ValueType::FLOAT);
    }
}

impl Marshal for String {
    fn value_type(_: &mut Chunk) -> Result<ValueType, TypeError> {
        Ok(ValueType::STRING)
    }

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
        let index = reader.take(ValueKind::String)?.as_index();
        reader
            .heap()
            .string(index)
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::invalid_bytecode(format!("no string at heap index {}", index)))
    }

    fn write(self, writer: &mut SlotWriter<'_>) {
        let index = writer.heap_mut().push_string(self);
        writer.push(ValueData::from_index(index), ValueType::STRING);
    }
}

/// A host object scripts can hold and pass around but not look into.
#[derive(Debug)]
pub struct Opaque<T>(pub Rc<T>);

impl<T> Opaque<T> {
    pub fn new(value: T) -> Self {
        Opaque(Rc::new(value))
    }
}

impl<T> Clone for Opaque<T> {
    fn clone(&self) -> Self {
        Opaque(Rc::clone(&self.0))
    }
}

impl<T> std::ops::Deref for Opaque<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Any> Marshal for Opaque<T> {
    fn value_type(_: &mut Chunk) -> Result<ValueType, TypeError> {
        Ok(ValueType::CUSTOM)
    }

    fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
        let index = reader.take(ValueKind::Custom)?.as_index();
        let object = reader
            .heap()
            .custom(index)
            .cloned()
            .ok_or_else(|| RuntimeError::invalid_bytecode(format!("no object at heap index {}", index)))?;
        object.downcast::<T>().map(Opaque).map_err(|_| {
            RuntimeErrorKind::ArgumentMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: "a different custom object".to_string(),
            }
            .into()
        })
    }

    fn write(self, writer: &mut SlotWriter<'_>) {
        let object: Rc<dyn Any> = self.0;
        let index = writer.heap_mut().push_custom(object);
        writer.push(ValueData::from_index(index), ValueType::CUSTOM);
    }
}

/// Host tuples travel as anonymous structs named after their element types,
/// e.g. `(int, bool)`, with fields `0`, `1`, ...
pub fn tuple_type(chunk: &mut Chunk, elements: &[ValueType]) -> Result<ValueType, TypeError> {
    let names: Vec<String> = elements.iter().map(|ty| chunk.format_type(*ty)).collect();
    let name = format!("({})", names.join(", "));

    let mut builder = chunk.begin_struct_type();
    for (index, ty) in elements.iter().enumerate() {
        builder.add_field(&index.to_string(), *ty)?;
    }
    let index = chunk.end_struct_type(&name, builder)?;
    Ok(ValueType::with_index(ValueKind::Struct, index))
}

macro_rules! impl_marshal_tuple {
    ($($name:ident $index:tt),+) => {
        impl<$($name: Marshal),+> Marshal for ($($name,)+) {
            fn value_type(chunk: &mut Chunk) -> Result<ValueType, TypeError> {
                let elements = [$(<$name as Marshal>::value_type(chunk)?),+];
                tuple_type(chunk, &elements)
            }

            fn read(reader: &mut SlotReader<'_>) -> Result<Self, RuntimeError> {
                Ok(($(reader.read::<$name>()?,)+))
            }

            fn write(self, writer: &mut SlotWriter<'_>) {
                $(writer.write(self.$index);)+
            }
        }
    };
}

impl_marshal_tuple!(A 0);
impl_marshal_tuple!(A 0, B 1);
impl_marshal_tuple!(A 0, B 1, C 2);
impl_marshal_tuple!(A 0, B 1, C 2, D 3);
impl_marshal_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_marshal_tuple!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_marshal_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_marshal_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Declares a struct layout for a host aggregate.
pub struct StructSchema<'c> {
    chunk: &'c mut Chunk,
    name: String,
    builder: StructTypeBuilder,
    error: Option<TypeError>,
}

impl<'c> StructSchema<'c> {
    pub fn new(chunk: &'c mut Chunk, name: &str) -> Self {
        let builder = chunk.begin_struct_type();
        StructSchema {
            chunk,
            name: name.to_string(),
            builder,
            error: None,
        }
    }

    pub fn field<T: Marshal>(mut self, name: &str) -> Self {
        if self.error.is_none() {
            let added = T::value_type(self.chunk).and_then(|ty| self.builder.add_field(name, ty));
            if let Err(err) = added {
                self.error = Some(err);
            }
        }
        self
    }

    /// Interns the struct. Describing the same layout twice yields the same
    /// type.
    pub fn finish(self) -> Result<ValueType, TypeError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let index = self.chunk.end_struct_type(&self.name, self.builder)?;
        Ok(ValueType::with_index(ValueKind::Struct, index))
    }
}
