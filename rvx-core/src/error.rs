use std::fmt::Display;

/// Ways in which a unit of work (one app under one patch source), or the whole batch, can fail.
///
/// `NotFound` and `Blocked` are soft: they only move acquisition on to the next source or
/// candidate version. `ToolFetchFailed` aborts the batch. Everything else skips the current unit.
#[derive(Debug)]
pub enum PipelineError {
    NotFound(String),
    Blocked(String),
    UnknownApp(String),
    VersionUndetermined { package: String, reason: String },
    AcquisitionFailed { app: String, reason: String },
    MergeFailed(String),
    PatchFailed(String),
    ToolFetchFailed { patch_source: String, reason: String },
}

impl PipelineError {
    /// True for errors that only drive fallback to the next source.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Blocked(_))
    }
}

impl std::error::Error for PipelineError {}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "Not found: {what}"),
            Self::Blocked(what) => write!(f, "Blocked by {what}"),
            Self::UnknownApp(key) => write!(f, "Unknown app `{key}`: no package mapping"),
            Self::VersionUndetermined { package, reason } => {
                write!(f, "Could not determine a version for {package}: {reason}")
            }
            Self::AcquisitionFailed { app, reason } => {
                write!(f, "Could not acquire a package for {app}: {reason}")
            }
            Self::MergeFailed(reason) => write!(f, "Bundle merge failed: {reason}"),
            Self::PatchFailed(reason) => write!(f, "Patching failed: {reason}"),
            Self::ToolFetchFailed {
                patch_source,
                reason,
            } => write!(f, "Tool fetch failed for {patch_source}: {reason}"),
        }
    }
}
