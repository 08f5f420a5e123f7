//! Output formatting for analysis results.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::apk::RawFeatures;
use crate::classifier::{Prediction, Verdict};
use crate::encoder::EncodedInput;
use crate::explainer::Attribution;

/// Number of attributions shown in text output unless overridden.
pub const DEFAULT_TOP_FEATURES: usize = 20;

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone, Serialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub value: f32,
    pub attribution: f64,
}

/// Everything shown to the user about one package.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub source: String,
    pub sha256: String,
    pub verdict: Verdict,
    pub label: String,
    pub probability: f32,
    pub confidence: f32,
    pub size_bytes: u64,
    pub dex_count: usize,
    pub permission_count: usize,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    /// Largest magnitude first; empty when the explanation step was skipped.
    pub attributions: Vec<FeatureAttribution>,
}

impl AnalysisReport {
    pub fn new(
        source: String,
        sha256: String,
        features: &RawFeatures,
        prediction: Prediction,
        explained: Option<(&Attribution, &EncodedInput, &[String])>,
    ) -> Self {
        let verdict = prediction.verdict();
        let (base_value, attributions) = match explained {
            Some((attribution, input, columns)) => {
                let attributions = attribution
                    .ranked()
                    .into_iter()
                    .map(|(i, value)| FeatureAttribution {
                        feature: columns[i].clone(),
                        value: input.values()[i],
                        attribution: value,
                    })
                    .collect();
                (Some(attribution.base_value), attributions)
            }
            None => (None, Vec::new()),
        };

        Self {
            source,
            sha256,
            verdict,
            label: verdict.label().to_string(),
            probability: prediction.probability,
            confidence: prediction.confidence(),
            size_bytes: features.size,
            dex_count: features.dex_count,
            permission_count: features.permissions.len(),
            permissions: features.permissions.iter().cloned().collect(),
            base_value,
            attributions,
        }
    }

    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }
}

/// Outcome for one package in a batch: a report or the error that stopped it.
#[derive(Debug, Clone, Serialize)]
pub struct PackageResult {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {s}. Use 'text' or 'json'.")),
        }
    }
}

/// Render one report the way the analysis page lays it out.
pub fn render_text(report: &AnalysisReport, top: usize) -> String {
    TextReport { report, top }.to_string()
}

struct TextReport<'a> {
    report: &'a AnalysisReport,
    top: usize,
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "{}", "=".repeat(70))?;
        writeln!(f, "ANALYSIS RESULTS: {}", report.source)?;
        writeln!(f, "{}", "=".repeat(70))?;
        writeln!(f, "  Status:            {}", report.label)?;
        writeln!(f, "  Confidence:        {:.2}%", report.confidence)?;
        writeln!(f, "  File Size:         {:.2} KB", report.size_kb())?;
        writeln!(f, "  DEX Count:         {}", report.dex_count)?;
        writeln!(f, "  Permissions Count: {}", report.permission_count)?;
        writeln!(f, "  SHA-256:           {}", report.sha256)?;

        if !report.permissions.is_empty() {
            writeln!(f, "\nDETECTED PERMISSIONS:")?;
            for perm in &report.permissions {
                writeln!(f, "  - {perm}")?;
            }
        }

        let Some(base) = report.base_value else {
            return Ok(());
        };
        writeln!(
            f,
            "\nFEATURE IMPORTANCE (base value {:.4}, prediction {:.4}):",
            base, report.probability
        )?;
        let shown = &report.attributions[..self.top.min(report.attributions.len())];
        let max = shown.iter().map(|a| a.attribution.abs()).fold(0.0f64, f64::max);
        let name_width = shown.iter().map(|a| a.feature.len()).max().unwrap_or(0);

        for a in shown {
            let len = if max > 0.0 {
                ((a.attribution.abs() / max) * BAR_WIDTH as f64).round() as usize
            } else {
                0
            };
            writeln!(
                f,
                "  {:<name_width$}  {:+.4}  {}",
                a.feature,
                a.attribution,
                "#".repeat(len)
            )?;
        }
        if report.attributions.len() > shown.len() {
            writeln!(f, "  ... {} more", report.attributions.len() - shown.len())?;
        }
        Ok(())
    }
}

pub fn print_results(results: &[PackageResult], format: OutputFormat, top: usize) {
    match format {
        OutputFormat::Text => print_text(results, top),
        OutputFormat::Json => print_json(results),
    }
}

fn print_text(results: &[PackageResult], top: usize) {
    for r in results {
        match (&r.report, &r.error) {
            (Some(report), _) => println!("\n{}", render_text(report, top)),
            (None, err) => println!(
                "\n  [ERR ] {} -- {}",
                r.path.display(),
                err.as_deref().unwrap_or("unknown")
            ),
        }
    }

    if results.len() > 1 {
        let summary = Summary::of(results);
        println!("\nSUMMARY:");
        println!("  Total packages:      {}", results.len());
        println!("  Obfuscated:          {}", summary.obfuscated);
        println!("  Not obfuscated:      {}", summary.not_obfuscated);
        println!("  Errors:              {}", summary.errors);
        println!("{}", "=".repeat(70));
    }
}

fn print_json(results: &[PackageResult]) {
    let summary = Summary::of(results);
    let output = serde_json::json!({
        "results": results,
        "summary": {
            "total": results.len(),
            "obfuscated": summary.obfuscated,
            "not_obfuscated": summary.not_obfuscated,
            "errors": summary.errors,
        }
    });
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
}

struct Summary {
    obfuscated: usize,
    not_obfuscated: usize,
    errors: usize,
}

impl Summary {
    fn of(results: &[PackageResult]) -> Self {
        let verdicts = || results.iter().filter_map(|r| r.report.as_ref().map(|rep| rep.verdict));
        Self {
            obfuscated: verdicts().filter(|v| *v == Verdict::Obfuscated).count(),
            not_obfuscated: verdicts().filter(|v| *v == Verdict::NotObfuscated).count(),
            errors: results.iter().filter(|r| r.report.is_none()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn features() -> RawFeatures {
        RawFeatures {
            size: 5_242_880,
            dex_count: 2,
            permissions: ["INTERNET", "CAMERA"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>(),
        }
    }

    fn explained_report() -> AnalysisReport {
        let columns: Vec<String> = ["size", "dex_count", "INTERNET", "CAMERA"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let input = EncodedInput::from_vec(vec![5_242_880.0, 2.0, 1.0, 1.0]);
        let attribution = Attribution {
            base_value: 0.4,
            prediction: 0.82,
            values: vec![0.02, 0.3, -0.05, 0.15],
        };
        AnalysisReport::new(
            "app.apk".into(),
            "abc".into(),
            &features(),
            Prediction::new(0.82).unwrap(),
            Some((&attribution, &input, &columns)),
        )
    }

    #[test]
    fn report_fields_follow_prediction_and_features() {
        let report = explained_report();
        assert_eq!(report.verdict, Verdict::Obfuscated);
        assert_eq!(report.label, "Obfuscated");
        assert_eq!(report.permission_count, 2);
        assert_eq!(report.permissions, vec!["CAMERA", "INTERNET"]);
        assert_eq!(report.size_kb(), 5120.0);

        let order: Vec<&str> = report.attributions.iter().map(|a| a.feature.as_str()).collect();
        assert_eq!(order, vec!["dex_count", "CAMERA", "INTERNET", "size"]);
        assert_eq!(report.attributions[0].value, 2.0);
    }

    #[test]
    fn text_output_matches_page_layout() {
        let text = render_text(&explained_report(), 2);
        assert!(text.contains("Status:            Obfuscated"));
        assert!(text.contains("Confidence:        82.00%"));
        assert!(text.contains("File Size:         5120.00 KB"));
        assert!(text.contains("DEX Count:         2"));
        assert!(text.contains("Permissions Count: 2"));
        assert!(text.contains("  - CAMERA\n  - INTERNET"));
        assert!(text.contains(&format!("dex_count  +0.3000  {}", "#".repeat(30))));
        assert!(text.contains("... 2 more"));
    }

    #[test]
    fn unexplained_report_has_no_importance_section() {
        let report = AnalysisReport::new(
            "app.apk".into(),
            "abc".into(),
            &features(),
            Prediction::new(0.5).unwrap(),
            None,
        );
        assert_eq!(report.label, "Not Obfuscated");
        assert!(report.attributions.is_empty());
        assert!(!render_text(&report, 10).contains("FEATURE IMPORTANCE"));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("base_value").is_none());
        assert_eq!(json["verdict"], "not_obfuscated");
    }

    #[test]
    fn output_format_parses() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn summary_counts_verdicts_and_errors() {
        let ok = PackageResult {
            path: "a.apk".into(),
            report: Some(explained_report()),
            error: None,
        };
        let failed = PackageResult {
            path: "b.apk".into(),
            report: None,
            error: Some("feature extraction failed".into()),
        };
        let summary = Summary::of(&[ok, failed]);
        assert_eq!(summary.obfuscated, 1);
        assert_eq!(summary.not_obfuscated, 0);
        assert_eq!(summary.errors, 1);
    }
}
