//! Left panel: artifact pickers, package picker, settings, analyze button.

use std::path::PathBuf;

use eframe::egui;

use crate::app::{AnalysisState, ObfuscanApp};

fn file_picker(
    ui: &mut egui::Ui,
    label: &str,
    button: &str,
    filter: &str,
    extensions: &[&str],
    slot: &mut Option<PathBuf>,
) {
    ui.label(label);
    if ui.button(button).clicked() {
        if let Some(path) = rfd::FileDialog::new().add_filter(filter, extensions).pick_file() {
            *slot = Some(path);
        }
    }
    if let Some(p) = slot {
        ui.small(
            p.file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "?".into()),
        );
    }
    ui.add_space(4.0);
}

pub fn draw_sidebar(ctx: &egui::Context, app: &mut ObfuscanApp) {
    egui::SidePanel::left("sidebar")
        .resizable(true)
        .default_width(230.0)
        .min_width(190.0)
        .show(ctx, |ui| {
            ui.vertical(|ui| {
                ui.heading("OBFUSCATION DETECTOR");
                ui.label(concat!("v", env!("CARGO_PKG_VERSION")));
                ui.separator();

                file_picker(
                    ui,
                    "MODEL",
                    "Select Model...",
                    "Model",
                    &["json", "onnx"],
                    &mut app.model_path,
                );
                file_picker(
                    ui,
                    "VOCABULARY",
                    "Select Vocabulary...",
                    "JSON",
                    &["json"],
                    &mut app.vocabulary_path,
                );
                file_picker(
                    ui,
                    "BACKGROUND DATA",
                    "Select Background...",
                    "CSV",
                    &["csv"],
                    &mut app.background_path,
                );
                ui.separator();

                file_picker(
                    ui,
                    "APK FILE",
                    "Choose an APK file...",
                    "APK",
                    &["apk"],
                    &mut app.package_path,
                );
                ui.separator();

                ui.label("SETTINGS");
                ui.checkbox(&mut app.explain, "Explain prediction (SHAP)");
                ui.horizontal(|ui| {
                    ui.label("Top features:");
                    ui.add(egui::Slider::new(&mut app.top_features, 5..=50));
                });

                ui.add_space(8.0);

                let busy = app.state == AnalysisState::Analyzing;
                ui.add_enabled_ui(!busy, |ui| {
                    if ui
                        .add_sized([ui.available_width(), 32.0], egui::Button::new("ANALYZE"))
                        .clicked()
                    {
                        app.start_analysis();
                    }
                });

                if let Some(err) = &app.error_message {
                    ui.add_space(4.0);
                    ui.colored_label(super::theme::COLOR_ERROR, err);
                }
            });
        });
}
