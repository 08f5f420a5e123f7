//! Analysis orchestration: Extract -> Encode -> Predict -> Explain.
//!
//! Artifacts are loaded once into an [`AnalysisContext`] and shared
//! read-only by every request. Each request runs to completion or stops
//! at the first failing stage; nothing is retried.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::apk::extract;
use crate::background::BackgroundDataset;
use crate::classifier::{load_classifier, Classifier};
use crate::encoder::encode;
use crate::error::{AnalysisError, ArtifactLoadError, ParseError};
use crate::explainer::{ExplainProgress, ExplainerSettings, KernelExplainer};
use crate::report::{AnalysisReport, PackageResult};
use crate::upload::{sha256_file, StagedUpload};
use crate::vocabulary::PermissionVocabulary;

/// Locations of the three startup artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub vocabulary: PathBuf,
    pub background: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Run the attribution stage.
    pub explain: bool,
    /// Where uploads are staged; the system temporary directory when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            explain: true,
            staging_dir: None,
        }
    }
}

/// Read-only, process-wide state every analysis needs.
pub struct AnalysisContext {
    vocabulary: PermissionVocabulary,
    classifier: Box<dyn Classifier>,
    background: BackgroundDataset,
    settings: ExplainerSettings,
}

impl AnalysisContext {
    /// Load and cross-check all artifacts. Any failure here means no
    /// request can be served.
    pub fn load(
        paths: &ArtifactPaths,
        settings: ExplainerSettings,
    ) -> Result<Self, ArtifactLoadError> {
        let vocabulary = PermissionVocabulary::load(&paths.vocabulary)?;
        let classifier = load_classifier(&paths.model, vocabulary.width())?;
        let background = BackgroundDataset::load(&paths.background, &vocabulary.column_names())?;
        Self::new(vocabulary, classifier, background, settings)
    }

    pub fn new(
        vocabulary: PermissionVocabulary,
        classifier: Box<dyn Classifier>,
        background: BackgroundDataset,
        settings: ExplainerSettings,
    ) -> Result<Self, ArtifactLoadError> {
        let width = vocabulary.width();
        if let Some(model_width) = classifier.input_width() {
            if model_width != width {
                return Err(ArtifactLoadError::WidthMismatch {
                    artifact: "classifier",
                    expected: width,
                    actual: model_width,
                });
            }
        }
        if background.width() != width {
            return Err(ArtifactLoadError::WidthMismatch {
                artifact: "background table",
                expected: width,
                actual: background.width(),
            });
        }

        let background = match settings.max_background {
            Some(max) if background.n_rows() > max => {
                info!(rows = background.n_rows(), kept = max, "subsampling background table");
                background.subsample(max, settings.seed)
            }
            _ => background,
        };

        info!(
            width,
            permissions = vocabulary.len(),
            background_rows = background.n_rows(),
            "analysis context ready"
        );
        Ok(Self {
            vocabulary,
            classifier,
            background,
            settings,
        })
    }

    pub fn vocabulary(&self) -> &PermissionVocabulary {
        &self.vocabulary
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn background(&self) -> &BackgroundDataset {
        &self.background
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Idle = 0,
    Extracting,
    Encoding,
    Predicting,
    Explaining,
    Done,
}

impl Stage {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Stage::Extracting,
            2 => Stage::Encoding,
            3 => Stage::Predicting,
            4 => Stage::Explaining,
            5 => Stage::Done,
            _ => Stage::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Extracting => "extracting features",
            Stage::Encoding => "encoding features",
            Stage::Predicting => "predicting",
            Stage::Explaining => "computing feature attributions",
            Stage::Done => "done",
        }
    }
}

/// Atomic progress tracking, polled by a UI thread.
#[derive(Debug, Default)]
pub struct AnalysisProgress {
    stage: AtomicU8,
    pub explain: ExplainProgress,
}

impl AnalysisProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Relaxed))
    }

    fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Relaxed);
    }
}

/// Analyze the package at `path`. Blocking; the explanation stage can take
/// tens of seconds for wide vocabularies.
pub fn analyze(
    ctx: &AnalysisContext,
    path: &Path,
    options: &AnalysisOptions,
    progress: &AnalysisProgress,
) -> Result<AnalysisReport, AnalysisError> {
    run(ctx, path, path.display().to_string(), options, progress)
}

/// Stage an uploaded byte stream in a temporary file and analyze it.
/// The temporary file is deleted on every exit path.
pub fn analyze_upload<R: Read>(
    ctx: &AnalysisContext,
    reader: R,
    source: &str,
    options: &AnalysisOptions,
    progress: &AnalysisProgress,
) -> Result<AnalysisReport, AnalysisError> {
    let staged = StagedUpload::from_reader(reader, options.staging_dir.as_deref())
        .map_err(AnalysisError::Upload)?;
    run(ctx, staged.path(), source.to_string(), options, progress)
}

fn run(
    ctx: &AnalysisContext,
    path: &Path,
    source: String,
    options: &AnalysisOptions,
    progress: &AnalysisProgress,
) -> Result<AnalysisReport, AnalysisError> {
    let result = run_stages(ctx, path, source, options, progress);
    if let Err(e) = &result {
        warn!(
            path = %path.display(),
            stage = progress.stage().label(),
            error = %e,
            "analysis failed"
        );
    }
    result
}

fn run_stages(
    ctx: &AnalysisContext,
    path: &Path,
    source: String,
    options: &AnalysisOptions,
    progress: &AnalysisProgress,
) -> Result<AnalysisReport, AnalysisError> {
    progress.set_stage(Stage::Extracting);
    let features = extract(path)?;
    let sha256 = sha256_file(path).map_err(|e| ParseError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    progress.set_stage(Stage::Encoding);
    let input = encode(&features, &ctx.vocabulary);

    progress.set_stage(Stage::Predicting);
    let prediction = ctx.classifier.predict(&input)?;
    info!(
        source = %source,
        probability = prediction.probability,
        verdict = %prediction.verdict(),
        "package classified"
    );

    let report = if options.explain {
        progress.set_stage(Stage::Explaining);
        let attribution = KernelExplainer::new(ctx.classifier(), &ctx.background, ctx.settings)
            .explain_with_progress(&input, &progress.explain)?;
        let columns = ctx.vocabulary.column_names();
        AnalysisReport::new(
            source,
            sha256,
            &features,
            prediction,
            Some((&attribution, &input, &columns)),
        )
    } else {
        AnalysisReport::new(source, sha256, &features, prediction, None)
    };

    progress.set_stage(Stage::Done);
    Ok(report)
}

/// Analyze packages one after another, recording per-package failures.
pub fn analyze_all(
    ctx: &AnalysisContext,
    paths: &[PathBuf],
    options: &AnalysisOptions,
) -> Vec<PackageResult> {
    paths
        .iter()
        .map(|path| match analyze(ctx, path, options, &AnalysisProgress::new()) {
            Ok(report) => PackageResult {
                path: path.clone(),
                report: Some(report),
                error: None,
            },
            Err(e) => PackageResult {
                path: path.clone(),
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

fn has_apk_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("apk"))
}

/// Collect package paths: files are taken as given, directories are
/// walked for `*.apk` files.
pub fn collect_packages(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
                let p = entry.into_path();
                if p.is_file() && has_apk_extension(&p) {
                    files.push(p);
                }
            }
        }
    }

    files.sort();
    files
}
