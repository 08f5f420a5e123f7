//! obfuscan-core - shared library for APK obfuscation detection.
//!
//! Provides package feature extraction, permission encoding, classifier
//! inference, Kernel SHAP explanations and report formatting used by both
//! the CLI and GUI frontends.

pub mod apk;
pub mod background;
pub mod classifier;
pub mod encoder;
pub mod error;
pub mod explainer;
pub mod pipeline;
pub mod report;
pub mod upload;
pub mod vocabulary;

#[cfg(test)]
mod testing;

pub use apk::{extract, RawFeatures};
pub use background::BackgroundDataset;
pub use classifier::{load_classifier, Classifier, Prediction, Verdict};
pub use encoder::{encode, EncodedInput};
pub use error::{AnalysisError, ArtifactLoadError, ExplainError, ModelError, ParseError};
pub use explainer::{Attribution, ExplainerSettings, KernelExplainer};
pub use pipeline::{
    analyze, analyze_upload, AnalysisContext, AnalysisOptions, AnalysisProgress, ArtifactPaths,
};
pub use report::AnalysisReport;
pub use vocabulary::PermissionVocabulary;
