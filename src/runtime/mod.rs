pub mod heap;
pub mod marshal;
pub mod native;
pub mod prelude;
pub mod runtime_error;
pub mod vm;

pub use heap::{Heap, HeapObject};
pub use marshal::{Marshal, Opaque, SlotReader, SlotWriter, StructSchema, tuple_type};
pub use native::{
    FallibleFnNative, FnNative, NativeArgs, NativeCall, NativeFunction, Signature, native,
    native_fallible,
};
pub use runtime_error::{RuntimeError, RuntimeErrorKind};
pub use vm::{CallFrame, VirtualMachine, VmConfig};
