//! APK obfuscation detector GUI - eframe/egui desktop application.

mod app;
mod ui;

use app::ObfuscanApp;
use tracing_subscriber::EnvFilter;

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title("APK Obfuscation Detector")
            .with_inner_size([960.0, 700.0])
            .with_min_inner_size([720.0, 480.0]),
        ..Default::default()
    };

    eframe::run_native(
        "APK Obfuscation Detector",
        options,
        Box::new(|cc| {
            ui::theme::apply_theme(&cc.egui_ctx);
            Ok(Box::new(ObfuscanApp::new()))
        }),
    )
}
