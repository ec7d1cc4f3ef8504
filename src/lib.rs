//! Pepper: a small statically typed scripting language for embedding.
//!
//! Source is compiled in a single pass into a [`Chunk`] of bytecode, type
//! checked as it goes, and run on a [`VirtualMachine`]. Host functions are
//! exposed with [`native`] and [`Chunk::register_native`].
//!
//! ```ignore
//! let mut chunk = Chunk::new();
//! chunk.register_native("double", native(|(x,): (i64,)| x * 2))?;
//! let chunk = Compiler::with_chunk("fn main(): int { double(21) }", chunk).compile()?;
//!
//! let mut vm = VirtualMachine::new(&chunk);
//! vm.run()?;
//! assert_eq!(vm.pop_result::<i64>()?, 42);
//! ```

pub mod bytecode;
pub mod diagnostics;
pub mod frontend;
pub mod lang;
pub mod lexer;
pub mod runtime;
pub mod token;

pub use bytecode::{
    Chunk, ChunkCodecError, CompileError, CompileErrors, Compiler, ErrorKind, Instruction,
    TypeError, compile,
};
pub use lang::{ValueData, ValueKind, ValueType};
pub use runtime::{
    Marshal, NativeCall, NativeFunction, Opaque, RuntimeError, RuntimeErrorKind, Signature,
    SlotReader, SlotWriter, StructSchema, VirtualMachine, VmConfig, native, native_fallible,
    prelude,
};
pub use token::Slice;
