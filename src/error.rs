//! Structured error model (spec.md §3.5, §4.6, §7).
//!
//! Every fallible operation in this crate returns `Result<T, Error>`. There is
//! a single error type; errors are distinguished by `kind`, not by type.

use std::fmt;

use strum::Display;

/// Coarse error classification (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    TypeError,
    NameError,
    ValueError,
    RuntimeError,
    ImportError,
}

/// Source location attached to an error, with an optional multi-character span.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Exclusive end column, for multi-character caret spans. `None` means a single caret.
    pub end_column: Option<u32>,
    /// A copy of the offending source line, used for friendly rendering.
    pub snippet: Option<String>,
}

impl Location {
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            end_column: None,
            snippet: None,
        }
    }

    #[must_use]
    pub fn with_end_column(mut self, end_column: u32) -> Self {
        self.end_column = Some(end_column);
        self
    }

    #[must_use]
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// One frame of a captured call stack, innermost first.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    pub function_name: String,
    pub location: Location,
}

/// A structured, kinded error (spec.md §3.5).
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
    pub stack: Vec<StackFrame>,
    pub cause: Option<Box<Error>>,
}

impl Error {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            stack: Vec::new(),
            cause: None,
        }
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    #[must_use]
    pub fn unsupported_operation(op: &str, type_name: &str) -> Self {
        Self::type_error(format!("unsupported operation for {type_name}: {op} on type {type_name}"))
    }

    #[must_use]
    pub fn unsupported_binary_operation(op: &str, left: &str, right: &str) -> Self {
        Self::type_error(format!("unsupported operand type(s) for {op}: '{left}' and '{right}'"))
    }

    #[must_use]
    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    #[must_use]
    pub fn undefined_variable(name: &str) -> Self {
        Self::name_error(format!("undefined variable {name}"))
    }

    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    #[must_use]
    pub fn division_by_zero() -> Self {
        Self::value_error("division by zero")
    }

    #[must_use]
    pub fn index_out_of_range(index: i64) -> Self {
        Self::value_error(format!("index out of range: {index}"))
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    #[must_use]
    pub fn import_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImportError, message)
    }

    #[must_use]
    pub fn compile_error(message: impl Into<String>) -> Self {
        // Compile-time errors are surfaced with the SyntaxError kind (spec.md §7: "Compile-time
        // errors never leave the compiler as exceptions; they return synchronously").
        Self::new(ErrorKind::SyntaxError, message)
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Friendly multi-line rendering (spec.md §4.6).
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(loc) = &self.location {
            out.push_str(&format!("{}: {} ({}:{})\n", self.kind, self.message, loc.line, loc.column));
            if let Some(snippet) = &loc.snippet {
                out.push_str(&format!(" | {snippet}\n"));
                let end = loc.end_column.unwrap_or(loc.column + 1);
                let pad = " ".repeat(loc.column as usize);
                let carets = "^".repeat((end.saturating_sub(loc.column)).max(1) as usize);
                out.push_str(&format!(" | {pad}{carets}\n"));
            }
        } else {
            out.push_str(&format!("{}: {}\n", self.kind, self.message));
        }
        if !self.stack.is_empty() {
            out.push_str("stack trace:\n");
            for frame in &self.stack {
                out.push_str(&format!(
                    "    at {} ({}:{}:{})\n",
                    frame.function_name, frame.location.file, frame.location.line, frame.location.column
                ));
            }
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
