use crate::verdict::Status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Exited cleanly, the output still has to be compared
    Completed,
    Failed { status: Status, message: String },
}

/// Maps a sandbox exit to a verdict class
///
/// A non-zero exit counts as a compilation failure when the output carries
/// one of `compile_error_markers`. That is a heuristic: a program printing
/// such a marker before crashing is reported as a compilation error too.
pub fn classify(
    exit_code: Option<i64>,
    output: &str,
    compile_error_markers: &[String],
) -> Classification {
    match exit_code {
        None => Classification::Failed {
            status: Status::TimeLimitExceeded,
            message: "Execution exceeded time limit".to_string(),
        },
        Some(0) => Classification::Completed,
        Some(code) => {
            if compile_error_markers
                .iter()
                .any(|marker| output.contains(marker.as_str()))
            {
                Classification::Failed {
                    status: Status::CompilationError,
                    message: "Compilation failed".to_string(),
                }
            } else {
                Classification::Failed {
                    status: Status::RuntimeError,
                    message: format!("Non-zero exit code: {code}"),
                }
            }
        }
    }
}
