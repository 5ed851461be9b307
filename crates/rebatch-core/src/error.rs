use std::path::PathBuf;

use crate::plan::PlanStatus;

pub type Result<T> = std::result::Result<T, RenameError>;

/// Failures that stop an operation as a whole.
///
/// Per-step execution problems and walker warnings are not errors; they are
/// recorded as [`crate::StepFailure`] and [`crate::WalkWarning`] values.
#[derive(thiserror::Error, Debug)]
pub enum RenameError {
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPatternSyntax { pattern: String, message: String },
    #[error("Invalid resulting name '{name}': {reason}")]
    InvalidResultingName { name: String, reason: String },
    #[error("Plan is not valid: {0}")]
    PlanNotValid(PlanStatus),
    #[error("Plan was built as a dry run and cannot be executed")]
    PreviewPlan,
    #[error("Symlink cycle detected at {0:?}")]
    SymlinkCycleDetected(PathBuf),
    #[error("Root does not exist or is not a directory: {0:?}")]
    RootNotFound(PathBuf),
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenameError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Configuration errors are raised before anything on disk is touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidPatternSyntax { .. } | Self::InvalidResultingName { .. }
        )
    }
}
