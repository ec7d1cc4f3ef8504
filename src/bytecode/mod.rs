pub mod chunk;
pub mod compile;
pub mod compile_error;
pub mod disasm;
mod expr;
pub mod op;
pub mod rules;
pub mod types;

pub use chunk::{Chunk, ChunkCodecError, Function, NativeEntry};
pub use compile::{Compiler, compile};
pub use compile_error::{CompileError, CompileErrors, ErrorKind};
pub use op::Instruction;
pub use types::{MAX_FIELDS, MAX_PARAMS, TypeError};
