use thiserror::Error;

use crate::token::Slice;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    #[error("division by zero")]
    DivisionByZero,
    #[error("call depth limit exceeded ({0}) - possible infinite recursion")]
    StackOverflow(usize),
    #[error("stack size limit exceeded ({0})")]
    StackLimitExceeded(usize),
    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("native function '{0}' is not bound")]
    UnboundNative(String),
    #[error("native function '{0}' did not produce one result of its declared type")]
    NativeResultMismatch(String),
    #[error("type error: expected {expected}, got {found}")]
    ArgumentMismatch { expected: String, found: String },
    #[error("output error: {0}")]
    Output(String),
    #[error("{0}")]
    Native(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("runtime error: {kind}{}", format_call_stack(.call_stack))]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Source of the instruction that failed.
    pub slice: Option<Slice>,
    /// Function names, outermost first.
    pub call_stack: Vec<String>,
}

fn format_call_stack(call_stack: &[String]) -> String {
    let mut out = String::new();
    if !call_stack.is_empty() {
        out.push_str("\n  call stack:");
        for (i, frame) in call_stack.iter().rev().enumerate() {
            out.push_str(&format!("\n    {}: {}", i, frame));
        }
    }
    out
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        RuntimeError {
            kind,
            slice: None,
            call_stack: Vec::new(),
        }
    }

    /// An error raised by host code inside a native function.
    pub fn native(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Native(message.into()))
    }

    pub fn invalid_bytecode(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::InvalidBytecode(message.into()))
    }

    pub fn with_slice(mut self, slice: Slice) -> Self {
        if self.slice.is_none() {
            self.slice = Some(slice);
        }
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}
