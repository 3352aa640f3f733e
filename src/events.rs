//! モデルサービスのイベント通知
//!
//! ログ出力はグローバルなコンソールではなく、注入された `ServiceObserver` を経由します。
//! 既定の `TracingObserver` は `tracing` で構造化ログを出力します。

use std::time::Duration;

/// 予測をスキップした理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// モデル読み込み中
    ModelLoading,
    /// 再読み込みしてもモデルが利用できない
    ModelUnavailable,
}

/// サービスイベント
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    LoadStarted { source: String, attempt: u32 },
    Loaded { elapsed: Duration },
    LoadFailed { error: String, attempt: u32 },
    PredictionSkipped { reason: SkipReason },
    PredictionCompleted { digit: u8, probability: f32 },
    PredictionFailed { error: String },
}

/// イベントの受け取り手
pub trait ServiceObserver: Send + Sync {
    fn on_event(&self, event: &ServiceEvent);
}

/// `tracing` へ出力する既定のオブザーバ
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ServiceObserver for TracingObserver {
    fn on_event(&self, event: &ServiceEvent) {
        match event {
            ServiceEvent::LoadStarted { source, attempt } => {
                tracing::info!(%source, attempt, "モデル読み込み開始");
            }
            ServiceEvent::Loaded { elapsed } => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "数字認識モデルの読み込みが完了しました");
            }
            ServiceEvent::LoadFailed { error, attempt } => {
                tracing::error!(%error, attempt, "数字認識モデルの読み込みに失敗しました");
            }
            ServiceEvent::PredictionSkipped { reason } => match reason {
                SkipReason::ModelLoading => tracing::info!("モデル読み込み中のため予測をスキップします"),
                SkipReason::ModelUnavailable => tracing::error!("モデルを読み込めませんでした"),
            },
            ServiceEvent::PredictionCompleted { digit, probability } => {
                tracing::debug!(digit, probability, "予測完了");
            }
            ServiceEvent::PredictionFailed { error } => {
                tracing::error!(%error, "予測エラー");
            }
        }
    }
}
