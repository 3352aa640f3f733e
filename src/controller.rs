//! 画面制御
//!
//! キャンバスから受け取ったビットマップをモデルサービスへ渡し、表示状態を更新します。
//! 空白のキャンバスは予測せずに結果をクリアします。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::ControllerSettings;
use crate::preprocess::is_blank;
use crate::service::{ModelLoader, ModelService};
use crate::types::{Bitmap, PredictionSet};

/// 表示状態
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewState {
    pub predictions: Option<PredictionSet>,
    pub is_processing: bool,
    pub model_ready: bool,
}

/// 画像受け取り後の処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// 空白のため予測せずにクリアした
    Cleared,
    /// 予測結果（None を含む）を反映した
    Published,
    /// より新しい画像が届いたため結果を破棄した
    Superseded,
}

/// 画面制御
pub struct PageController<L> {
    service: Arc<ModelService<L>>,
    delay: Duration,
    // 受け取った画像ごとに増える世代番号。古い世代の結果は反映しない
    generation: AtomicU64,
    state_tx: watch::Sender<ViewState>,
}

impl<L: ModelLoader> PageController<L> {
    pub fn new(service: Arc<ModelService<L>>, settings: &ControllerSettings) -> Self {
        let (state_tx, _) = watch::channel(ViewState {
            model_ready: service.is_ready(),
            ..ViewState::default()
        });
        Self {
            service,
            delay: settings.prediction_delay(),
            generation: AtomicU64::new(0),
            state_tx,
        }
    }

    pub fn service(&self) -> &Arc<ModelService<L>> {
        &self.service
    }

    /// 現在の表示状態
    pub fn state(&self) -> ViewState {
        self.state_tx.borrow().clone()
    }

    /// 表示状態の購読
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state_tx.subscribe()
    }

    /// モデルの準備完了を一度だけ待ち、表示状態に反映するタスクを起動
    pub fn watch_model_ready(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.service.wait_ready().await;
            controller.state_tx.send_modify(|state| state.model_ready = true);
            tracing::info!("数字認識モデルの準備ができました");
        })
    }

    /// キャンバスから受け取ったビットマップを処理
    ///
    /// 空白ならその場で結果をクリアする（予測は呼ばない）。それ以外は処理中フラグを立て、
    /// 短い待ち時間の後に予測して結果を反映する。途中で新しい画像が届いた場合、古い結果は捨てる。
    pub async fn handle_image_data(&self, bitmap: Bitmap) -> Submission {
        let blank = is_blank(&bitmap);

        // 世代の更新と状態の変更は watch のロック内で行う
        let mut generation = 0;
        self.state_tx.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if blank {
                state.predictions = None;
                state.is_processing = false;
            } else {
                state.is_processing = true;
            }
        });
        if blank {
            return Submission::Cleared;
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.is_current(generation) {
            return Submission::Superseded;
        }

        let predictions = self.service.predict(&bitmap).await;

        let published = self.state_tx.send_if_modified(|state| {
            if !self.is_current(generation) {
                return false;
            }
            state.predictions = predictions;
            state.is_processing = false;
            true
        });

        if published {
            Submission::Published
        } else {
            tracing::debug!(generation, "古い予測結果を破棄しました");
            Submission::Superseded
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}
