//! Rendering errors against the source they point into.

use crate::bytecode::compile_error::CompileError;
use crate::runtime::runtime_error::RuntimeError;
use crate::token::Slice;

pub const DEFAULT_TAB_SIZE: usize = 4;
/// Source lines shown above the offending line.
pub const DEFAULT_CONTEXT: usize = 2;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAndColumn {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for LineAndColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line: {}, column: {}", self.line, self.column)
    }
}

/// Position of the byte at `index`. A tab advances the column by
/// `tab_size`.
pub fn line_and_column(source: &str, index: usize, tab_size: usize) -> LineAndColumn {
    let mut line = 1;
    let mut column = 1;

    let end = index.min(source.len());
    for &byte in &source.as_bytes()[..end] {
        match byte {
            b'\n' => {
                line += 1;
                column = 1;
            }
            b'\t' => column += tab_size,
            // UTF-8 continuation bytes do not start a new character.
            b if b & 0xc0 == 0x80 => {}
            _ => column += 1,
        }
    }

    LineAndColumn { line, column }
}

/// Lines `start..=end` (0-based) without the final line break.
pub fn source_lines(source: &str, start: usize, end: usize) -> &str {
    if start > end {
        return "";
    }

    let mut offset = 0;
    let mut from = None;
    for (number, line) in source.split_inclusive('\n').enumerate() {
        if number == start {
            from = Some(offset);
        }
        offset += line.len();
        if number == end {
            break;
        }
    }

    match from {
        Some(from) => source[from..offset].trim_end_matches(['\r', '\n']),
        None => "",
    }
}

/// Renders each compile error as its message and position, the preceding
/// `context` lines, and a caret underline.
pub fn format_errors<'a>(
    source: &str,
    errors: impl IntoIterator<Item = &'a CompileError>,
    context: usize,
    tab_size: usize,
) -> String {
    let mut out = String::new();
    for error in errors {
        format_at(&mut out, source, &error.message, error.slice, context, tab_size);
    }
    out
}

/// Renders a runtime error like a compile error when it knows where it
/// happened, followed by its call stack.
pub fn format_runtime_error(
    source: &str,
    error: &RuntimeError,
    context: usize,
    tab_size: usize,
) -> String {
    let Some(slice) = error.slice else {
        return format!("{}\n", error);
    };

    let mut out = String::new();
    let message = format!("runtime error: {}", error.kind);
    format_at(&mut out, source, &message, slice, context, tab_size);
    if !error.call_stack.is_empty() {
        out.push_str("call stack:\n");
        for (i, frame) in error.call_stack.iter().rev().enumerate() {
            out.push_str(&format!("    {}: {}\n", i, frame));
        }
    }
    out
}

fn format_at(
    out: &mut String,
    source: &str,
    message: &str,
    slice: Slice,
    context: usize,
    tab_size: usize,
) {
    let position = line_and_column(source, slice.index, tab_size);
    let last = position.line - 1;
    let lines = source_lines(source, last.saturating_sub(context), last);
    let width = slice.text(source).chars().count().max(1);

    out.push_str(&format!("{} ({})\n", message, position));
    out.push_str(&lines.replace('\t', &" ".repeat(tab_size)));
    out.push('\n');
    out.push_str(&" ".repeat(position.column - 1));
    out.push_str(&"^".repeat(width));
    out.push_str(" here\n\n");
}
