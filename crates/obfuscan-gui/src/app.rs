//! Application state and analysis management.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use obfuscan_core::pipeline::{analyze_upload, AnalysisProgress};
use obfuscan_core::{
    AnalysisContext, AnalysisOptions, AnalysisReport, ArtifactPaths, ExplainerSettings,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Analyzing,
    Complete,
}

pub struct ObfuscanApp {
    // Artifacts
    pub model_path: Option<PathBuf>,
    pub vocabulary_path: Option<PathBuf>,
    pub background_path: Option<PathBuf>,

    // Request
    pub package_path: Option<PathBuf>,
    pub explain: bool,
    pub top_features: usize,

    // State
    pub state: AnalysisState,
    pub progress: Arc<AnalysisProgress>,
    pub report: Option<AnalysisReport>,
    pub error_message: Option<String>,
    pub duration: Option<f32>,

    // Loaded once per artifact selection and shared with worker threads
    context: Option<(ArtifactPaths, Arc<AnalysisContext>)>,
    result_rx: Option<mpsc::Receiver<Outcome>>,
}

enum Outcome {
    Success {
        paths: ArtifactPaths,
        context: Arc<AnalysisContext>,
        report: AnalysisReport,
        duration: f32,
    },
    Error(String),
}

impl ObfuscanApp {
    pub fn new() -> Self {
        Self {
            model_path: None,
            vocabulary_path: None,
            background_path: None,
            package_path: None,
            explain: true,
            top_features: 20,
            state: AnalysisState::Idle,
            progress: Arc::new(AnalysisProgress::new()),
            report: None,
            error_message: None,
            duration: None,
            context: None,
            result_rx: None,
        }
    }

    fn artifact_paths(&self) -> Result<ArtifactPaths, &'static str> {
        Ok(ArtifactPaths {
            model: self.model_path.clone().ok_or("No model file selected")?,
            vocabulary: self.vocabulary_path.clone().ok_or("No vocabulary file selected")?,
            background: self.background_path.clone().ok_or("No background data selected")?,
        })
    }

    fn cached_context(&self, paths: &ArtifactPaths) -> Option<Arc<AnalysisContext>> {
        self.context.as_ref().and_then(|(cached, ctx)| {
            let same = cached.model == paths.model
                && cached.vocabulary == paths.vocabulary
                && cached.background == paths.background;
            same.then(|| Arc::clone(ctx))
        })
    }

    pub fn start_analysis(&mut self) {
        let paths = match self.artifact_paths() {
            Ok(paths) => paths,
            Err(msg) => {
                self.error_message = Some(msg.into());
                return;
            }
        };
        let Some(package) = self.package_path.clone() else {
            self.error_message = Some("No APK file selected".into());
            return;
        };

        self.error_message = None;
        self.report = None;
        self.duration = None;
        self.state = AnalysisState::Analyzing;
        self.progress = Arc::new(AnalysisProgress::new());

        let cached = self.cached_context(&paths);
        let options = AnalysisOptions {
            explain: self.explain,
            ..AnalysisOptions::default()
        };
        let progress = Arc::clone(&self.progress);
        let (tx, rx) = mpsc::channel();
        self.result_rx = Some(rx);

        std::thread::spawn(move || {
            let start = Instant::now();
            let outcome = run(paths, cached, &package, &options, &progress, start);
            let _ = tx.send(outcome);
        });
    }

    /// Poll for completion, called each frame.
    pub fn poll(&mut self) {
        let Some(rx) = &self.result_rx else { return };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => {
                Outcome::Error("Analysis stopped unexpectedly".into())
            }
        };

        match outcome {
            Outcome::Success {
                paths,
                context,
                report,
                duration,
            } => {
                self.context = Some((paths, context));
                self.report = Some(report);
                self.duration = Some(duration);
                self.state = AnalysisState::Complete;
            }
            Outcome::Error(msg) => {
                self.error_message = Some(msg);
                self.state = AnalysisState::Idle;
            }
        }
        self.result_rx = None;
    }
}

fn run(
    paths: ArtifactPaths,
    cached: Option<Arc<AnalysisContext>>,
    package: &Path,
    options: &AnalysisOptions,
    progress: &AnalysisProgress,
    start: Instant,
) -> Outcome {
    let context = match cached {
        Some(ctx) => ctx,
        None => match AnalysisContext::load(&paths, ExplainerSettings::default()) {
            Ok(ctx) => {
                info!(model = %paths.model.display(), "artifacts loaded");
                Arc::new(ctx)
            }
            Err(e) => {
                error!(error = %e, "artifact loading failed");
                return Outcome::Error(format!("Failed to load artifacts: {e}"));
            }
        },
    };

    let file = match File::open(package) {
        Ok(f) => f,
        Err(e) => return Outcome::Error(format!("Cannot open {}: {e}", package.display())),
    };
    let source = package
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| package.display().to_string());

    match analyze_upload(&context, file, &source, options, progress) {
        Ok(report) => Outcome::Success {
            paths,
            context,
            report,
            duration: start.elapsed().as_secs_f32(),
        },
        Err(e) => Outcome::Error(format!("Error processing APK: {e}")),
    }
}

impl eframe::App for ObfuscanApp {
    fn update(&mut self, ctx: &eframe::egui::Context, _frame: &mut eframe::Frame) {
        self.poll();

        if self.state == AnalysisState::Analyzing {
            ctx.request_repaint();
        }

        crate::ui::sidebar::draw_sidebar(ctx, self);
        crate::ui::result_view::draw_result_view(ctx, self);
    }
}
