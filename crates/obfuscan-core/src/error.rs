//! Error taxonomy for artifact loading and the per-request pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// The uploaded file could not be read as an Android package.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read package {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid package archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("package has no AndroidManifest.xml")]
    MissingManifest,

    #[error("malformed binary manifest at offset {offset:#x}: {reason}")]
    Manifest { offset: usize, reason: String },
}

impl ParseError {
    pub(crate) fn manifest(offset: usize, reason: impl Into<String>) -> Self {
        ParseError::Manifest {
            offset,
            reason: reason.into(),
        }
    }
}

/// A startup artifact (vocabulary, classifier, background table) is missing or corrupt.
#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot read background table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid artifact {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("unsupported model format {path} (expected .json or .onnx)")]
    UnsupportedModel { path: PathBuf },

    #[error("artifact width mismatch: {artifact} has {actual} columns, expected {expected}")]
    WidthMismatch {
        artifact: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl ArtifactLoadError {
    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ArtifactLoadError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Inference failed: shape mismatch, backend error or an invalid score.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("input has {actual} features, model expects {expected}")]
    InputWidth { expected: usize, actual: usize },

    #[error("model returned {actual} scores for {expected} rows")]
    OutputShape { expected: usize, actual: usize },

    #[error("model returned a score outside [0, 1]: {0}")]
    ScoreOutOfRange(f32),

    #[error("inference backend failed: {0}")]
    Backend(String),
}

/// Attribution sampling failed; no partial attribution is produced.
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("classifier failed during attribution sampling: {0}")]
    Model(#[from] ModelError),

    #[error("input has {actual} features, background has {expected}")]
    Width { expected: usize, actual: usize },

    #[error("attribution system is numerically singular")]
    Singular,
}

/// Any failure of a single analysis request. The remaining stages never run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("feature extraction failed: {0}")]
    Parse(#[from] ParseError),

    #[error("prediction failed: {0}")]
    Model(#[from] ModelError),

    #[error("explanation failed: {0}")]
    Explain(#[from] ExplainError),

    #[error("cannot stage upload: {0}")]
    Upload(#[source] std::io::Error),
}
