//! Host functions every script gets from the command line runner.

use std::rc::Rc;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::types::TypeError;
use crate::runtime::native::{NativeFunction, native};

fn entry<B: NativeFunction + 'static>(
    name: &'static str,
    binding: B,
) -> (&'static str, Rc<dyn NativeFunction>) {
    (name, Rc::new(binding))
}

fn entries() -> Vec<(&'static str, Rc<dyn NativeFunction>)> {
    vec![
        entry("sqrt", native(|(x,): (f64,)| x.sqrt())),
        entry("abs", native(|(n,): (i64,)| n.wrapping_abs())),
        entry("len", native(|(s,): (String,)| s.chars().count() as i64)),
        entry("concat", native(|(a, b): (String, String)| a + &b)),
        entry("to_string", native(|(n,): (i64,)| n.to_string())),
    ]
}

/// Registers the prelude natives. Call before compiling.
pub fn register(chunk: &mut Chunk) -> Result<(), TypeError> {
    for (name, binding) in entries() {
        chunk.register_binding(name, binding)?;
    }
    Ok(())
}

/// Re-attaches prelude natives to a deserialized chunk. Natives the chunk
/// does not declare are skipped.
pub fn bind(chunk: &mut Chunk) -> Result<(), TypeError> {
    for (name, binding) in entries() {
        if chunk.find_native(name).is_some() {
            chunk.bind_binding(name, binding)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::runtime::vm::VirtualMachine;

    fn run_with_prelude(source: &str) -> String {
        let mut chunk = Chunk::new();
        register(&mut chunk).unwrap();
        let chunk = Compiler::with_chunk(source, chunk).compile().unwrap();
        let mut vm = VirtualMachine::with_output(&chunk, Vec::new());
        vm.run().unwrap();
        String::from_utf8(vm.into_output()).unwrap()
    }

    #[test]
    fn test_prelude_functions() {
        let output = run_with_prelude(
            "fn main() {
                print sqrt(16.0)
                print abs(0 - 5)
                print len(\"héllo\")
                print concat(\"pep\", to_string(42))
            }",
        );
        assert_eq!(output, "4.0\n5\n5\npep42\n");
    }

    #[test]
    fn test_prelude_types_are_checked() {
        let mut chunk = Chunk::new();
        register(&mut chunk).unwrap();
        let errors = Compiler::with_chunk("fn main() { print sqrt(4) }", chunk)
            .compile()
            .unwrap_err();
        assert!(errors.contains("Wrong type for argument 1. Expected float. Got int"));
    }

    #[test]
    fn test_bind_after_decode() {
        let mut chunk = Chunk::new();
        register(&mut chunk).unwrap();
        let chunk = Compiler::with_chunk("fn main() { print abs(0 - 3) }", chunk)
            .compile()
            .unwrap();

        let mut decoded = Chunk::from_bytes(&chunk.to_bytes().unwrap()).unwrap();
        bind(&mut decoded).unwrap();
        assert!(decoded.unbound_natives().is_empty());

        let mut vm = VirtualMachine::with_output(&decoded, Vec::new());
        vm.run().unwrap();
        assert_eq!(vm.into_output(), b"3\n");
    }
}
