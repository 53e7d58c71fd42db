// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT

/// Failure of a single registry, engine, supervisor or output log operation.
/// None of these conditions is fatal for the hosting process.
#[derive(Debug, thiserror::Error)]
pub enum DynFnError {
    #[error("Function '{0}' not found.")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    /// Diagnostics reported by the compiler, verbatim.
    #[error("Compilation failed:\n{}", .0.join("\n"))]
    Compile(Vec<String>),

    #[error("a function named '{0}' already exists.")]
    Conflict(String),

    #[error("Function '{0}' has no compiled artifact. Recompile or re-register it.")]
    NotCompiled(String),

    #[error("Script execution failed: {0}")]
    ExecutionFault(String),

    #[error("process timed out after {0} seconds.")]
    Timeout(u64),

    #[error("Error (exit code {code}):\n{output}")]
    ChildExit { code: i32, output: String },

    #[error("process error: {0}")]
    Process(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("No entry found for '{0}'")]
    NoLogEntry(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DynFnError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_compile_error_lists_every_diagnostic() {
        let err = DynFnError::Compile(vec!["error[E0425]: cannot find value `c`".to_string(), "error: aborting".to_string()]);
        assert_eq!(
            "Compilation failed:\nerror[E0425]: cannot find value `c`\nerror: aborting",
            err.to_string()
        );
    }

    #[test]
    fn test_child_exit_display() {
        let err = DynFnError::ChildExit {
            code: 3,
            output: "boom".to_string(),
        };
        assert_eq!("Error (exit code 3):\nboom", err.to_string());
        assert!(!err.is_not_found());
        assert!(DynFnError::NotFound("x".to_string()).is_not_found());
    }
}
