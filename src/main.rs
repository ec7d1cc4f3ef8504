use std::{env, fs, path::Path};

use pepper::bytecode::disasm::print_chunk;
use pepper::diagnostics::{DEFAULT_CONTEXT, DEFAULT_TAB_SIZE, format_errors, format_runtime_error};
use pepper::frontend::TokenDumper;
use pepper::lexer::Lexer;
use pepper::{Chunk, Compiler, VirtualMachine, prelude};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let emit = args
        .iter()
        .position(|a| a == "--emit")
        .map(|i| match args.get(i + 1) {
            Some(out) => out.clone(),
            None => {
                eprintln!("Error: --emit needs an output file");
                std::process::exit(1);
            }
        });

    // first non-flag argument that is not the --emit target is the filename
    let filename = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with('-') && Some(*a) != emit.as_ref());

    let Some(filename) = filename else {
        print_usage();
        std::process::exit(1);
    };

    if extension(filename) == Some("pepc") {
        run_serialized(filename, bytecode);
        return;
    }

    ensure_extension(filename);
    let source = match fs::read_to_string(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    if tokens_only {
        dump_tokens(&source, no_color, pretty);
    } else {
        run_program(&source, bytecode, emit.as_deref());
    }
}

fn extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|e| e.to_str())
}

fn ensure_extension(filename: &str) {
    if extension(filename) != Some("pep") {
        eprintln!("Error: expected a .pep or .pepc file, got {}", filename);
        std::process::exit(1);
    }
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) {
    let mut dumper = TokenDumper::new();

    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }

    let tokens = Lexer::new(source).tokenize();
    dumper.dump(source, &tokens);
}

fn print_usage() {
    println!("PEPPER - Statically Typed Embeddable Scripting Language");
    println!();
    println!("Usage:");
    println!("  pepper <file.pep>                 Compile and run a program");
    println!("  pepper <file.pepc>                Run a compiled program");
    println!("  pepper --tokens <file.pep>        Show tokens only (--no-color, --pretty)");
    println!("  pepper --bc <file>                Show the bytecode instead of running");
    println!("  pepper --emit <out.pepc> <file>   Write the compiled program");
    println!("  pepper --help, -h                 Show this help");
}

fn run_program(source: &str, bytecode: bool, emit: Option<&str>) {
    let mut chunk = Chunk::new();
    if let Err(e) = prelude::register(&mut chunk) {
        eprintln!("Prelude error: {}", e);
        std::process::exit(1);
    }

    let chunk = match Compiler::with_chunk(source, chunk).compile() {
        Ok(chunk) => chunk,
        Err(errors) => {
            eprint!(
                "{}",
                format_errors(source, &errors, DEFAULT_CONTEXT, DEFAULT_TAB_SIZE)
            );
            eprintln!("{}", errors);
            std::process::exit(1);
        }
    };

    if let Some(out) = emit {
        write_chunk(&chunk, out);
        return;
    }

    if bytecode {
        print_chunk(&chunk);
        return;
    }

    let mut vm = VirtualMachine::new(&chunk);
    if let Err(e) = vm.run() {
        eprint!(
            "{}",
            format_runtime_error(source, &e, DEFAULT_CONTEXT, DEFAULT_TAB_SIZE)
        );
        std::process::exit(1);
    }
}

fn write_chunk(chunk: &Chunk, out: &str) {
    let bytes = match chunk.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = fs::write(out, bytes) {
        eprintln!("Failed to write '{}': {}", out, e);
        std::process::exit(1);
    }
}

fn run_serialized(filename: &str, bytecode: bool) {
    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    let mut chunk = match Chunk::from_bytes(&bytes) {
        Ok(chunk) => chunk,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if bytecode {
        print_chunk(&chunk);
        return;
    }

    if let Err(e) = prelude::bind(&mut chunk) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    let unbound = chunk.unbound_natives();
    if !unbound.is_empty() {
        eprintln!("Error: no binding for native function(s): {}", unbound.join(", "));
        std::process::exit(1);
    }

    // No source text for a compiled program, so errors print without context.
    let mut vm = VirtualMachine::new(&chunk);
    if let Err(e) = vm.run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
