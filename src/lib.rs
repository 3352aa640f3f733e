mod types;

pub mod canvas;
pub mod controller;
pub mod events;
pub mod model;
pub mod preprocess;
pub mod presentation;
pub mod service;
#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "desktop")]
mod commands;

pub use canvas::DigitCanvas;
pub use controller::{PageController, Submission, ViewState};
pub use events::{ServiceEvent, ServiceObserver, SkipReason, TracingObserver};
pub use preprocess::{is_blank, preprocess, InputTensor, IMAGE_SIZE, INPUT_SHAPE};
pub use presentation::{PageView, ResultView};
pub use service::{DigitPredictor, ModelLoader, ModelService, ModelStatus, PredictError};
pub use types::{Bitmap, Point, PointerEvent, Prediction, PredictionSet, NUM_CLASSES};

/// ログ出力を初期化（RUST_LOG で上書き可能）
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "digit_canvas_lib=info,classify_image=info".into()),
        )
        .try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use std::sync::{Arc, Mutex};
    use tauri::Manager;

    use crate::commands::AppState;
    use crate::ml::PackageLoader;
    use crate::model::AppConfig;

    init_logging();
    let config = AppConfig::load_or_default();

    let loader = PackageLoader::from_settings_or_default(&config.model)
        .expect("default model source must be valid");
    let service = Arc::new(ModelService::new(loader));
    let controller = Arc::new(PageController::new(service, &config.controller));

    let app_state = AppState {
        canvas: Mutex::new(DigitCanvas::with_settings(config.canvas.max_size, &config.canvas)),
        controller,
    };

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .manage(app_state)
        .setup(move |app| {
            let handle = app.handle().clone();
            let state: tauri::State<AppState> = app.state();
            let controller = Arc::clone(&state.controller);
            tauri::async_runtime::spawn(async move {
                // 初回のモデル読み込みと準備完了の監視
                controller.service().start();
                controller.watch_model_ready();
                commands::forward_view_state(handle, controller).await;
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::canvas_pointer,
            commands::canvas_clear,
            commands::canvas_resize,
            commands::canvas_snapshot,
            commands::model_status,
            commands::view_state,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
