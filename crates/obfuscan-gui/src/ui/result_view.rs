//! Main panel: stage progress, verdict, package facts and feature importance.

use eframe::egui;

use obfuscan_core::pipeline::Stage;
use obfuscan_core::report::AnalysisReport;
use obfuscan_core::Verdict;

use crate::app::{AnalysisState, ObfuscanApp};
use crate::ui::theme;

const BAR_MAX_WIDTH: f32 = 260.0;

pub fn draw_result_view(ctx: &egui::Context, app: &mut ObfuscanApp) {
    egui::CentralPanel::default().show(ctx, |ui| match app.state {
        AnalysisState::Idle => {
            ui.centered_and_justified(|ui| {
                ui.label("Upload an APK file to check whether it is obfuscated.");
            });
        }
        AnalysisState::Analyzing => draw_progress(ui, app),
        AnalysisState::Complete => {
            if let Some(report) = &app.report {
                draw_report(ui, report, app.top_features, app.duration);
            }
        }
    });
}

fn draw_progress(ui: &mut egui::Ui, app: &ObfuscanApp) {
    ui.add_space(20.0);
    ui.heading("Analyzing APK...");
    ui.add_space(8.0);

    let stage = app.progress.stage();
    let (fraction, text) = match stage {
        Stage::Explaining => {
            let fraction = app.progress.explain.fraction();
            (fraction, format!("{} ({:.0}%)", stage.label(), fraction * 100.0))
        }
        _ => (0.0, stage.label().to_string()),
    };

    ui.add(egui::ProgressBar::new(fraction).text(text).animate(true));
}

fn draw_report(ui: &mut egui::Ui, report: &AnalysisReport, top: usize, duration: Option<f32>) {
    ui.heading(format!("Analysis Results: {}", report.source));
    ui.add_space(6.0);

    let color = match report.verdict {
        Verdict::Obfuscated => theme::COLOR_OBFUSCATED,
        Verdict::NotObfuscated => theme::COLOR_NOT_OBFUSCATED,
    };

    egui::Grid::new("facts_grid")
        .num_columns(2)
        .spacing([16.0, 4.0])
        .show(ui, |ui| {
            ui.strong("Status");
            ui.colored_label(color, egui::RichText::new(&report.label).strong());
            ui.end_row();

            ui.strong("Confidence");
            ui.monospace(format!("{:.2}%", report.confidence));
            ui.end_row();

            ui.strong("File Size");
            ui.monospace(format!("{:.2} KB", report.size_kb()));
            ui.end_row();

            ui.strong("DEX Count");
            ui.monospace(report.dex_count.to_string());
            ui.end_row();

            ui.strong("Permissions Count");
            ui.monospace(report.permission_count.to_string());
            ui.end_row();

            ui.strong("SHA-256");
            ui.monospace(report.sha256.as_str());
            ui.end_row();
        });

    if let Some(dur) = duration {
        ui.small(format!("Analyzed in {dur:.1}s"));
    }
    ui.separator();

    egui::ScrollArea::vertical().auto_shrink([false, false]).show(ui, |ui| {
        egui::CollapsingHeader::new(format!("Detected Permissions ({})", report.permission_count))
            .default_open(false)
            .show(ui, |ui| {
                for perm in &report.permissions {
                    ui.monospace(perm.as_str());
                }
            });

        if let Some(base) = report.base_value {
            ui.add_space(8.0);
            ui.heading("Feature Importance");
            ui.small(format!("base value {base:.4} -> prediction {:.4}", report.probability));
            ui.add_space(4.0);
            draw_attributions(ui, report, top);
        }
    });
}

fn draw_attributions(ui: &mut egui::Ui, report: &AnalysisReport, top: usize) {
    let shown = &report.attributions[..top.min(report.attributions.len())];
    let max = shown.iter().map(|a| a.attribution.abs()).fold(0.0f64, f64::max);

    egui::Grid::new("importance_grid")
        .num_columns(3)
        .striped(true)
        .spacing([12.0, 4.0])
        .show(ui, |ui| {
            for a in shown {
                ui.monospace(a.feature.as_str());
                ui.monospace(format!("{:+.4}", a.attribution));

                let width = if max > 0.0 {
                    (a.attribution.abs() / max) as f32 * BAR_MAX_WIDTH
                } else {
                    0.0
                };
                let color = if a.attribution >= 0.0 {
                    theme::COLOR_POSITIVE
                } else {
                    theme::COLOR_NEGATIVE
                };
                let (rect, _) =
                    ui.allocate_exact_size(egui::vec2(BAR_MAX_WIDTH, 12.0), egui::Sense::hover());
                let bar =
                    egui::Rect::from_min_size(rect.min, egui::vec2(width.max(1.0), rect.height()));
                ui.painter().rect_filled(bar, 2.0, color);
                ui.end_row();
            }
        });

    let hidden = report.attributions.len() - shown.len();
    if hidden > 0 {
        ui.small(format!("... {hidden} more"));
    }
}
