//! 手書きキャンバスのTauriコマンド

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tauri::{AppHandle, Emitter, State};

use crate::canvas::DigitCanvas;
use crate::controller::{PageController, ViewState};
use crate::ml::PackageLoader;
use crate::presentation::PageView;
use crate::service::ModelStatus;
use crate::types::{Bitmap, PointerEvent};

/// 表示状態の変更イベント名
pub const VIEW_STATE_EVENT: &str = "view-state-changed";

pub struct AppState {
    pub canvas: Mutex<DigitCanvas>,
    pub controller: Arc<PageController<PackageLoader>>,
}

impl AppState {
    fn canvas(&self) -> Result<MutexGuard<'_, DigitCanvas>, String> {
        self.canvas
            .lock()
            .map_err(|_| "キャンバスのロックが破損しています".to_string())
    }
}

/// フロントエンドへ送る表示状態
#[derive(Clone, Serialize)]
pub struct ViewPayload {
    pub state: ViewState,
    pub view: PageView,
}

impl From<ViewState> for ViewPayload {
    fn from(state: ViewState) -> Self {
        Self {
            view: PageView::from(&state),
            state,
        }
    }
}

fn submit(controller: &Arc<PageController<PackageLoader>>, bitmap: Bitmap) {
    let controller = Arc::clone(controller);
    tauri::async_runtime::spawn(async move {
        controller.handle_image_data(bitmap).await;
    });
}

/// ポインタ（マウス・タッチ）イベント。ストローク終了時に予測を開始する
///
/// 戻り値はクリアボタンを表示するかどうか。
#[tauri::command]
pub fn canvas_pointer(event: PointerEvent, state: State<AppState>) -> Result<bool, String> {
    let mut canvas = state.canvas()?;
    if let Some(bitmap) = canvas.handle_pointer(event) {
        submit(&state.controller, bitmap);
    }
    Ok(canvas.has_drawing())
}

/// キャンバスをクリア。予測結果はこのコマンドの完了時点でクリア済み
#[tauri::command]
pub async fn canvas_clear(state: State<'_, AppState>) -> Result<(), String> {
    let bitmap = state.canvas()?.clear();
    state.controller.handle_image_data(bitmap).await;
    Ok(())
}

/// コンテナ幅の変更
#[tauri::command]
pub fn canvas_resize(container_width: u32, state: State<AppState>) -> Result<u32, String> {
    let mut canvas = state.canvas()?;
    canvas.resize(container_width);
    Ok(canvas.size())
}

/// 現在のキャンバス画像（PNG data URL）
#[tauri::command]
pub fn canvas_snapshot(state: State<AppState>) -> Result<String, String> {
    state
        .canvas()?
        .to_png_data_url()
        .map_err(|e| format!("{:#}", e))
}

#[tauri::command]
pub fn model_status(state: State<AppState>) -> ModelStatus {
    state.controller.service().status()
}

#[tauri::command]
pub fn view_state(state: State<AppState>) -> ViewPayload {
    ViewPayload::from(state.controller.state())
}

/// 表示状態の変化をフロントエンドへ転送し続ける
pub async fn forward_view_state(app: AppHandle, controller: Arc<PageController<PackageLoader>>) {
    let mut rx = controller.subscribe();
    while rx.changed().await.is_ok() {
        let payload = ViewPayload::from(rx.borrow_and_update().clone());
        if let Err(e) = app.emit(VIEW_STATE_EVENT, payload) {
            tracing::warn!(error = %e, "表示状態イベントの送信に失敗しました");
        }
    }
}
