use thiserror::Error;

use crate::token::Slice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The grammar broke down. The parser stops trusting its position and
    /// skips ahead to the next declaration.
    Hard,
    /// The code parses but is wrong (types, names, limits). Parsing goes on.
    Soft,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("compile error: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub slice: Slice,
    pub message: String,
}

impl CompileError {
    pub fn hard(slice: Slice, message: impl Into<String>) -> Self {
        CompileError {
            kind: ErrorKind::Hard,
            slice,
            message: message.into(),
        }
    }

    pub fn soft(slice: Slice, message: impl Into<String>) -> Self {
        CompileError {
            kind: ErrorKind::Soft,
            slice,
            message: message.into(),
        }
    }

    pub fn is_hard(&self) -> bool {
        self.kind == ErrorKind::Hard
    }
}

/// Every error a failed compilation produced, in source order of discovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} compile error(s), first: {}", .0.len(), first_message(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

fn first_message(errors: &[CompileError]) -> &str {
    errors.first().map(|e| e.message.as_str()).unwrap_or("")
}

impl CompileErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn soft_count(&self) -> usize {
        self.0.iter().filter(|e| e.kind == ErrorKind::Soft).count()
    }

    pub fn hard_count(&self) -> usize {
        self.0.iter().filter(|e| e.kind == ErrorKind::Hard).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|e| e.message.contains(needle))
    }
}

impl<'a> IntoIterator for &'a CompileErrors {
    type Item = &'a CompileError;
    type IntoIter = std::slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_has_prefix() {
        let err = CompileError::soft(Slice::new(0, 1), "Unused variable 'x'");
        assert_eq!(err.to_string(), "compile error: Unused variable 'x'");
        assert!(!err.is_hard());
    }

    #[test]
    fn test_errors_counts() {
        let errors = CompileErrors(vec![
            CompileError::hard(Slice::default(), "Expected expression"),
            CompileError::soft(Slice::default(), "Wrong type"),
            CompileError::soft(Slice::default(), "Unused variable"),
        ]);

        assert_eq!(errors.len(), 3);
        assert_eq!(errors.hard_count(), 1);
        assert_eq!(errors.soft_count(), 2);
        assert!(errors.contains("Wrong type"));
        assert!(errors.to_string().contains("3 compile error(s)"));
        assert!(errors.to_string().contains("Expected expression"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileError::hard(Slice::default(), "test");
        let _: &dyn std::error::Error = &err;
        let errors = CompileErrors(vec![err]);
        let _: &dyn std::error::Error = &errors;
    }
}
