//! 数字認識モデルサービス
//!
//! 事前学習済みモデルを一度だけ読み込み、`predict` で順位付けされた予測結果を返します。
//!
//! 状態遷移: `Unloaded → Loading → Ready`。読み込みに失敗すると `Failed` になり、
//! 次の予測要求時に再読み込みを試みます（回数制限・バックオフなし）。

use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::events::{ServiceEvent, ServiceObserver, SkipReason, TracingObserver};
use crate::preprocess::{preprocess, InputTensor};
use crate::types::{Bitmap, PredictionSet};

/// 読み込み済みモデル（推論の差し替え口）
///
/// 入力テンソルに対して、インデックス = 数字のソフトマックス確率を返す。
pub trait DigitPredictor: Send + Sync {
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>>;
}

/// モデルの読み込み元
pub trait ModelLoader: Send + Sync + 'static {
    /// ログ用の取得先表示
    fn describe(&self) -> String;

    fn load(&self) -> impl Future<Output = Result<Arc<dyn DigitPredictor>>> + Send;
}

/// モデルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    /// 直近の読み込みに失敗（次の予測要求で再試行）
    Failed { attempts: u32 },
}

/// 予測エラーの種類
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    #[error("model is still loading")]
    NotReady,
    #[error("model could not be loaded: {0}")]
    LoadFailed(String),
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

enum Slot {
    Empty,
    Loading,
    Ready(Arc<dyn DigitPredictor>),
}

struct Inner {
    slot: Slot,
    attempts: u32,
    last_error: Option<String>,
}

/// モデルサービス
pub struct ModelService<L> {
    loader: L,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ModelStatus>,
    observer: Arc<dyn ServiceObserver>,
}

impl<L: ModelLoader> ModelService<L> {
    pub fn new(loader: L) -> Self {
        Self::with_observer(loader, Arc::new(TracingObserver))
    }

    pub fn with_observer(loader: L, observer: Arc<dyn ServiceObserver>) -> Self {
        let (status_tx, _) = watch::channel(ModelStatus::Unloaded);
        Self {
            loader,
            inner: Mutex::new(Inner {
                slot: Slot::Empty,
                attempts: 0,
                last_error: None,
            }),
            status_tx,
            observer,
        }
    }

    /// バックグラウンドで初回の読み込みを開始
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.load().await;
        })
    }

    /// モデルを読み込む
    ///
    /// 読み込み済み・読み込み中の場合は何もしない。成功時はゼロ入力でウォームアップ推論を一度行う。
    /// 戻り値は呼び出し後にモデルが利用可能かどうか。
    pub async fn load(&self) -> bool {
        let attempt = {
            let mut inner = self.lock();
            match inner.slot {
                Slot::Ready(_) => return true,
                Slot::Loading => return false,
                Slot::Empty => {}
            }
            inner.slot = Slot::Loading;
            inner.attempts += 1;
            inner.attempts
        };
        self.status_tx.send_replace(ModelStatus::Loading);
        self.observer.on_event(&ServiceEvent::LoadStarted {
            source: self.loader.describe(),
            attempt,
        });

        // 読み込み中にFutureが破棄された場合も Loading のまま残さない
        let mut guard = LoadingGuard {
            service: self,
            attempt,
            armed: true,
        };

        let started = Instant::now();
        let result = match self.loader.load().await {
            Ok(predictor) => warm_up(predictor).await,
            Err(e) => Err(e),
        };
        guard.armed = false;

        match result {
            Ok(predictor) => {
                self.lock().slot = Slot::Ready(predictor);
                self.status_tx.send_replace(ModelStatus::Ready);
                self.observer.on_event(&ServiceEvent::Loaded {
                    elapsed: started.elapsed(),
                });
                true
            }
            Err(e) => {
                let error = format!("{:#}", e);
                self.mark_failed(attempt, error.clone());
                self.observer.on_event(&ServiceEvent::LoadFailed { error, attempt });
                false
            }
        }
    }

    /// 予測を実行し、失敗時は理由をオブザーバに通知して `None` を返す
    pub async fn predict(&self, bitmap: &Bitmap) -> Option<PredictionSet> {
        match self.try_predict(bitmap).await {
            Ok(predictions) => {
                let top = predictions.top();
                self.observer.on_event(&ServiceEvent::PredictionCompleted {
                    digit: top.digit,
                    probability: top.probability,
                });
                Some(predictions)
            }
            Err(PredictError::NotReady) => {
                self.observer.on_event(&ServiceEvent::PredictionSkipped {
                    reason: SkipReason::ModelLoading,
                });
                None
            }
            Err(PredictError::LoadFailed(_)) => {
                self.observer.on_event(&ServiceEvent::PredictionSkipped {
                    reason: SkipReason::ModelUnavailable,
                });
                None
            }
            Err(e) => {
                self.observer.on_event(&ServiceEvent::PredictionFailed {
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// 予測を実行（エラー種別付き）
    ///
    /// 読み込み中なら即座に `NotReady`。未読み込み・失敗状態なら一度だけ読み込みを試みる。
    pub async fn try_predict(&self, bitmap: &Bitmap) -> Result<PredictionSet, PredictError> {
        let predictor = match self.current_predictor()? {
            Some(predictor) => predictor,
            None => {
                self.load().await;
                self.current_predictor()?
                    .ok_or_else(|| PredictError::LoadFailed(self.last_error().unwrap_or_default()))?
            }
        };

        let input = preprocess(bitmap).map_err(|e| PredictError::InvalidInput(format!("{:#}", e)))?;

        let probabilities = tokio::task::spawn_blocking(move || predictor.predict(&input))
            .await
            .map_err(|e| PredictError::Inference(e.to_string()))?
            .map_err(|e| PredictError::Inference(format!("{:#}", e)))?;

        PredictionSet::from_probabilities(&probabilities)
            .map_err(|e| PredictError::InvalidOutput(format!("{:#}", e)))
    }

    /// モデルを保持しているか
    pub fn is_ready(&self) -> bool {
        matches!(self.lock().slot, Slot::Ready(_))
    }

    pub fn status(&self) -> ModelStatus {
        *self.status_tx.borrow()
    }

    /// 状態変化の購読
    pub fn subscribe(&self) -> watch::Receiver<ModelStatus> {
        self.status_tx.subscribe()
    }

    /// モデルが利用可能になるまで待つ
    pub async fn wait_ready(&self) {
        let mut rx = self.status_tx.subscribe();
        // 送信側は self が保持しているため閉じられることはない
        let _ = rx.wait_for(|status| *status == ModelStatus::Ready).await;
    }

    /// 直近の読み込みエラー
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// 読み込み試行回数
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Ready なら推論器、未読み込みなら None、読み込み中なら NotReady
    fn current_predictor(&self) -> Result<Option<Arc<dyn DigitPredictor>>, PredictError> {
        match &self.lock().slot {
            Slot::Ready(predictor) => Ok(Some(Arc::clone(predictor))),
            Slot::Loading => Err(PredictError::NotReady),
            Slot::Empty => Ok(None),
        }
    }

    fn mark_failed(&self, attempt: u32, error: String) {
        {
            let mut inner = self.lock();
            inner.slot = Slot::Empty;
            inner.last_error = Some(error);
        }
        self.status_tx
            .send_replace(ModelStatus::Failed { attempts: attempt });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 保持中にパニックする処理はないため、破損していても状態はそのまま使える
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct LoadingGuard<'a, L: ModelLoader> {
    service: &'a ModelService<L>,
    attempt: u32,
    armed: bool,
}

impl<L: ModelLoader> Drop for LoadingGuard<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            self.service
                .mark_failed(self.attempt, "読み込みが中断されました".to_string());
        }
    }
}

/// ゼロ入力で一度推論して結果を捨てる（初回推論の初期化コストを先に払う）
async fn warm_up(predictor: Arc<dyn DigitPredictor>) -> Result<Arc<dyn DigitPredictor>> {
    let warm = Arc::clone(&predictor);
    tokio::task::spawn_blocking(move || warm.predict(&InputTensor::zeros()))
        .await
        .context("ウォームアップ推論タスクが異常終了しました")?
        .context("ウォームアップ推論に失敗しました")?;
    Ok(predictor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingObserver;
    use image::Rgba;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct FakePredictor {
        output: Result<Vec<f32>, String>,
        calls: AtomicUsize,
    }

    impl FakePredictor {
        fn ok(output: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                output: Ok(output),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl DigitPredictor for FakePredictor {
        fn predict(&self, input: &InputTensor) -> Result<Vec<f32>> {
            assert_eq!(input.shape(), [1, 28, 28, 1]);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.output {
                Ok(v) => Ok(v.clone()),
                // ウォームアップ（1回目）は成功させる
                Err(_) if call == 0 => Ok(vec![0.1; 10]),
                Err(e) => Err(anyhow::anyhow!(e.clone())),
            }
        }
    }

    /// `fail_first` 回失敗した後に成功するローダー
    struct FakeLoader {
        predictor: Option<Arc<FakePredictor>>,
        fail_first: u32,
        attempts: AtomicU32,
        gate: Option<Arc<Notify>>,
    }

    impl FakeLoader {
        fn ready(predictor: Arc<FakePredictor>) -> Self {
            Self {
                predictor: Some(predictor),
                fail_first: 0,
                attempts: AtomicU32::new(0),
                gate: None,
            }
        }

        fn unreachable() -> Self {
            Self {
                predictor: None,
                fail_first: 0,
                attempts: AtomicU32::new(0),
                gate: None,
            }
        }
    }

    impl ModelLoader for FakeLoader {
        fn describe(&self) -> String {
            "fake".to_string()
        }

        fn load(&self) -> impl Future<Output = Result<Arc<dyn DigitPredictor>>> + Send {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let predictor = self.predictor.clone();
            let fail = attempt <= self.fail_first;
            let gate = self.gate.clone();
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                match predictor {
                    Some(p) if !fail => Ok(p as Arc<dyn DigitPredictor>),
                    _ => Err(anyhow::anyhow!("connection refused")),
                }
            }
        }
    }

    fn stroke_bitmap() -> Bitmap {
        let mut bitmap = Bitmap::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        for i in 20..80 {
            bitmap.put_pixel(50, i, Rgba([0, 0, 0, 255]));
        }
        bitmap
    }

    fn seven() -> Vec<f32> {
        let mut probs = vec![0.01; 10];
        probs[7] = 0.91;
        probs
    }

    #[tokio::test]
    async fn test_load_runs_warm_up_once() {
        let predictor = FakePredictor::ok(seven());
        let service = ModelService::new(FakeLoader::ready(predictor.clone()));

        assert_eq!(service.status(), ModelStatus::Unloaded);
        assert!(service.load().await);
        assert!(service.is_ready());
        assert_eq!(service.status(), ModelStatus::Ready);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);

        // 2回目の load は何もしない
        assert!(service.load().await);
        assert_eq!(service.attempts(), 1);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_predict_returns_ranked_set() {
        let service = ModelService::new(FakeLoader::ready(FakePredictor::ok(seven())));
        service.load().await;

        let predictions = service.predict(&stroke_bitmap()).await.unwrap();
        assert_eq!(predictions.len(), 10);
        assert_eq!(predictions.top().digit, 7);
    }

    #[tokio::test]
    async fn test_unloaded_predict_loads_on_demand() {
        let predictor = FakePredictor::ok(seven());
        let service = ModelService::new(FakeLoader::ready(predictor.clone()));

        let predictions = service.predict(&stroke_bitmap()).await;
        assert!(predictions.is_some());
        assert_eq!(service.attempts(), 1);
        // ウォームアップ + 予測
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_model_never_ready() {
        let observer = Arc::new(RecordingObserver::default());
        let service = ModelService::with_observer(FakeLoader::unreachable(), observer.clone());

        assert!(!service.load().await);
        for _ in 0..3 {
            assert!(service.predict(&stroke_bitmap()).await.is_none());
            assert!(!service.is_ready());
        }
        // 予測要求のたびに再試行する
        assert_eq!(service.attempts(), 4);
        assert_eq!(service.status(), ModelStatus::Failed { attempts: 4 });
        assert!(service.last_error().unwrap().contains("connection refused"));

        let events = observer.events();
        let failures = events
            .iter()
            .filter(|e| matches!(e, ServiceEvent::LoadFailed { .. }))
            .count();
        assert_eq!(failures, 4);
        assert!(events.contains(&ServiceEvent::PredictionSkipped {
            reason: SkipReason::ModelUnavailable
        }));
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_on_next_use() {
        let mut loader = FakeLoader::ready(FakePredictor::ok(seven()));
        loader.fail_first = 1;
        let service = ModelService::new(loader);

        assert!(!service.load().await);
        assert_eq!(service.status(), ModelStatus::Failed { attempts: 1 });

        assert!(service.predict(&stroke_bitmap()).await.is_some());
        assert!(service.is_ready());
        assert_eq!(service.attempts(), 2);
    }

    #[tokio::test]
    async fn test_predict_while_loading_returns_none() {
        let gate = Arc::new(Notify::new());
        let mut loader = FakeLoader::ready(FakePredictor::ok(seven()));
        loader.gate = Some(gate.clone());
        let service = Arc::new(ModelService::new(loader));

        let mut status = service.subscribe();
        let handle = service.start();
        status
            .wait_for(|s| *s == ModelStatus::Loading)
            .await
            .unwrap();

        assert_eq!(
            service.try_predict(&stroke_bitmap()).await,
            Err(PredictError::NotReady)
        );
        assert!(service.predict(&stroke_bitmap()).await.is_none());

        gate.notify_one();
        service.wait_ready().await;
        handle.await.unwrap();
        assert!(service.predict(&stroke_bitmap()).await.is_some());
    }

    #[tokio::test]
    async fn test_inference_failure_keeps_model() {
        let observer = Arc::new(RecordingObserver::default());
        let predictor = Arc::new(FakePredictor {
            output: Err("out of memory".to_string()),
            calls: AtomicUsize::new(0),
        });
        let service = ModelService::with_observer(FakeLoader::ready(predictor), observer.clone());
        service.load().await;

        assert!(service.predict(&stroke_bitmap()).await.is_none());
        assert!(service.is_ready());
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, ServiceEvent::PredictionFailed { error } if error.contains("out of memory"))));
    }

    #[tokio::test]
    async fn test_invalid_output_is_reported() {
        let service = ModelService::new(FakeLoader::ready(FakePredictor::ok(vec![0.5, 0.5])));
        // ウォームアップは出力を検証しない
        assert!(service.load().await);

        let err = service.try_predict(&stroke_bitmap()).await.unwrap_err();
        assert!(matches!(err, PredictError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_zero_sized_bitmap_is_invalid_input() {
        let service = ModelService::new(FakeLoader::ready(FakePredictor::ok(seven())));
        service.load().await;
        let err = service.try_predict(&Bitmap::new(0, 0)).await.unwrap_err();
        assert!(matches!(err, PredictError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_dropped_load_does_not_stick_in_loading() {
        let gate = Arc::new(Notify::new());
        let mut loader = FakeLoader::ready(FakePredictor::ok(seven()));
        loader.gate = Some(gate);
        let service = ModelService::new(loader);

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(20), service.load()).await;
        assert!(result.is_err());
        assert!(matches!(service.status(), ModelStatus::Failed { .. }));
        assert!(!service.is_ready());
    }
}
