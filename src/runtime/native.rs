//! Host functions callable from scripts.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::bytecode::chunk::{Chunk, NativeEntry};
use crate::bytecode::types::{FunctionTypeBuilder, TypeError};
use crate::lang::{ValueData, ValueKind, ValueType};
use crate::runtime::heap::Heap;
use crate::runtime::marshal::{Marshal, SlotReader, SlotWriter};
use crate::runtime::runtime_error::RuntimeError;

/// A host function. `describe` declares the signature the compiler checks
/// calls against; `invoke` reads the arguments and produces the result.
pub trait NativeFunction {
    fn describe(&self, signature: &mut Signature<'_>);

    fn invoke(&self, call: &mut NativeCall<'_>) -> Result<(), RuntimeError>;
}

pub struct Signature<'c> {
    chunk: &'c mut Chunk,
    builder: FunctionTypeBuilder,
    error: Option<TypeError>,
}

impl<'c> Signature<'c> {
    fn new(chunk: &'c mut Chunk) -> Self {
        let builder = chunk.begin_function_type();
        Signature {
            chunk,
            builder,
            error: None,
        }
    }

    pub fn param<T: Marshal>(&mut self) -> &mut Self {
        if self.error.is_none() {
            let added = T::value_type(self.chunk).and_then(|ty| self.builder.add_param(ty));
            if let Err(err) = added {
                self.error = Some(err);
            }
        }
        self
    }

    pub fn returns<T: Marshal>(&mut self) -> &mut Self {
        if self.error.is_none() {
            match T::value_type(self.chunk) {
                Ok(ty) => self.builder.returns(ty),
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    fn finish(self) -> Result<usize, TypeError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(self.chunk.end_function_type(self.builder))
    }
}

/// The arguments of one native call and the place its result goes.
///
/// Arguments sit on the value stack from `base` upward, the callee just
/// below them. `ret` replaces callee and arguments with the result.
pub struct NativeCall<'a> {
    values: &'a mut Vec<ValueData>,
    types: &'a mut Vec<ValueType>,
    heap: &'a mut Heap,
    base: usize,
    cursor: usize,
    returned: bool,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(
        values: &'a mut Vec<ValueData>,
        types: &'a mut Vec<ValueType>,
        heap: &'a mut Heap,
        base: usize,
    ) -> Self {
        NativeCall {
            values,
            types,
            heap,
            base,
            cursor: base,
            returned: false,
        }
    }

    /// Reads the next argument.
    pub fn arg<T: Marshal>(&mut self) -> Result<T, RuntimeError> {
        if self.returned {
            return Err(RuntimeError::native("argument read after the result was written"));
        }
        let mut reader = SlotReader::new(self.values.as_slice(), self.types.as_slice(), &*self.heap)
            .starting_at(self.cursor);
        let value = reader.read::<T>()?;
        let position = reader.position();
        self.cursor = position;
        Ok(value)
    }

    pub fn ret<T: Marshal>(&mut self, value: T) {
        if !self.returned {
            self.values.truncate(self.base - 1);
            self.types.truncate(self.base - 1);
            self.returned = true;
        }
        SlotWriter::new(self.values, self.types, self.heap).write(value);
    }

    pub fn heap(&self) -> &Heap {
        &*self.heap
    }
}

/// Argument lists a closure-backed native can take. Implemented for tuples
/// of up to eight `Marshal` types.
pub trait NativeArgs: Sized {
    fn describe(signature: &mut Signature<'_>);

    fn read(call: &mut NativeCall<'_>) -> Result<Self, RuntimeError>;
}

impl NativeArgs for () {
    fn describe(_: &mut Signature<'_>) {}

    fn read(_: &mut NativeCall<'_>) -> Result<Self, RuntimeError> {
        Ok(())
    }
}

macro_rules! impl_native_args {
    ($($name:ident),+) => {
        impl<$($name: Marshal),+> NativeArgs for ($($name,)+) {
            fn describe(signature: &mut Signature<'_>) {
                $(signature.param::<$name>();)+
            }

            fn read(call: &mut NativeCall<'_>) -> Result<Self, RuntimeError> {
                Ok(($(call.arg::<$name>()?,)+))
            }
        }
    };
}

impl_native_args!(A);
impl_native_args!(A, B);
impl_native_args!(A, B, C);
impl_native_args!(A, B, C, D);
impl_native_args!(A, B, C, D, E);
impl_native_args!(A, B, C, D, E, F);
impl_native_args!(A, B, C, D, E, F, G);
impl_native_args!(A, B, C, D, E, F, G, H);

/// A native backed by a plain closure over a tuple of arguments.
pub struct FnNative<A, R, F> {
    function: F,
    marker: PhantomData<fn(A) -> R>,
}

pub fn native<A, R, F>(function: F) -> FnNative<A, R, F>
where
    A: NativeArgs,
    R: Marshal,
    F: Fn(A) -> R,
{
    FnNative {
        function,
        marker: PhantomData,
    }
}

impl<A, R, F> NativeFunction for FnNative<A, R, F>
where
    A: NativeArgs,
    R: Marshal,
    F: Fn(A) -> R,
{
    fn describe(&self, signature: &mut Signature<'_>) {
        A::describe(signature);
        signature.returns::<R>();
    }

    fn invoke(&self, call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
        let args = A::read(call)?;
        call.ret((self.function)(args));
        Ok(())
    }
}

/// Like [`FnNative`], for closures that can fail.
pub struct FallibleFnNative<A, R, F> {
    function: F,
    marker: PhantomData<fn(A) -> R>,
}

pub fn native_fallible<A, R, F>(function: F) -> FallibleFnNative<A, R, F>
where
    A: NativeArgs,
    R: Marshal,
    F: Fn(A) -> Result<R, RuntimeError>,
{
    FallibleFnNative {
        function,
        marker: PhantomData,
    }
}

impl<A, R, F> NativeFunction for FallibleFnNative<A, R, F>
where
    A: NativeArgs,
    R: Marshal,
    F: Fn(A) -> Result<R, RuntimeError>,
{
    fn describe(&self, signature: &mut Signature<'_>) {
        A::describe(signature);
        signature.returns::<R>();
    }

    fn invoke(&self, call: &mut NativeCall<'_>) -> Result<(), RuntimeError> {
        let args = A::read(call)?;
        call.ret((self.function)(args)?);
        Ok(())
    }
}

fn describe(chunk: &mut Chunk, binding: &dyn NativeFunction) -> Result<usize, TypeError> {
    let mut signature = Signature::new(chunk);
    binding.describe(&mut signature);
    signature.finish()
}

impl Chunk {
    /// Makes a host function callable by name from scripts compiled into
    /// this chunk. Register natives before compiling.
    pub fn register_native<B: NativeFunction + 'static>(
        &mut self,
        name: &str,
        binding: B,
    ) -> Result<usize, TypeError> {
        self.register_binding(name, Rc::new(binding))
    }

    pub fn register_binding(
        &mut self,
        name: &str,
        binding: Rc<dyn NativeFunction>,
    ) -> Result<usize, TypeError> {
        if self.find_native(name).is_some() {
            return Err(TypeError::DuplicateNative(name.to_string()));
        }
        let type_index = describe(self, binding.as_ref())?;
        self.natives.push(NativeEntry {
            name: name.to_string(),
            type_index,
            binding: Some(binding),
        });
        Ok(self.natives.len() - 1)
    }

    /// Attaches a host function to a native the chunk already declares, as
    /// after `Chunk::from_bytes`. The binding must describe the same
    /// signature the chunk was compiled against.
    pub fn bind_native<B: NativeFunction + 'static>(
        &mut self,
        name: &str,
        binding: B,
    ) -> Result<(), TypeError> {
        self.bind_binding(name, Rc::new(binding))
    }

    pub fn bind_binding(
        &mut self,
        name: &str,
        binding: Rc<dyn NativeFunction>,
    ) -> Result<(), TypeError> {
        let index = self
            .find_native(name)
            .ok_or_else(|| TypeError::UnknownNative(name.to_string()))?;
        let found = describe(self, binding.as_ref())?;
        let expected = self.natives[index].type_index;
        if found != expected {
            return Err(TypeError::SignatureMismatch {
                name: name.to_string(),
                expected: self.format_type(ValueType::with_index(ValueKind::Function, expected)),
                found: self.format_type(ValueType::with_index(ValueKind::Function, found)),
            });
        }
        self.natives[index].binding = Some(binding);
        Ok(())
    }

    /// Names of declared natives that have no binding.
    pub fn unbound_natives(&self) -> Vec<&str> {
        self.natives
            .iter()
            .filter(|n| n.binding.is_none())
            .map(|n| n.name.as_str())
            .collect()
    }
}
