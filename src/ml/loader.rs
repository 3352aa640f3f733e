//! モデルパッケージの取得と推論エンジンの構築

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::ml::InferenceEngine;
use crate::model::{log_metadata_info, ModelSettings, ModelSource, DEFAULT_MODEL_SOURCE};
use crate::service::{DigitPredictor, ModelLoader};

/// 設定された取得先からモデルパッケージを読み込むローダー
#[derive(Debug, Clone)]
pub struct PackageLoader {
    source: ModelSource,
    timeout: Option<Duration>,
}

impl PackageLoader {
    pub fn new(source: ModelSource, timeout: Option<Duration>) -> Self {
        Self { source, timeout }
    }

    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let source = ModelSource::parse(&settings.source)?;
        Ok(Self::new(source, settings.fetch_timeout()))
    }

    /// 設定の取得先が不正な場合は警告を出して既定の取得先を使う
    pub fn from_settings_or_default(settings: &ModelSettings) -> Result<Self> {
        match Self::from_settings(settings) {
            Ok(loader) => Ok(loader),
            Err(e) => {
                tracing::warn!(
                    source = %settings.source,
                    error = %e,
                    "モデルの取得先が不正です。既定の取得先を使用します"
                );
                let source = ModelSource::parse(DEFAULT_MODEL_SOURCE)?;
                Ok(Self::new(source, settings.fetch_timeout()))
            }
        }
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }
}

impl ModelLoader for PackageLoader {
    fn describe(&self) -> String {
        self.source.to_string()
    }

    fn load(&self) -> impl Future<Output = Result<Arc<dyn DigitPredictor>>> + Send {
        let source = self.source.clone();
        let timeout = self.timeout;
        async move {
            let bytes = source.fetch(timeout).await?;

            // 重みの復元はCPU負荷が高いためブロッキングスレッドで実行
            let engine = tokio::task::spawn_blocking(move || InferenceEngine::from_bytes(&bytes))
                .await
                .context("推論エンジン初期化タスクが異常終了しました")??;
            log_metadata_info(engine.metadata());

            Ok(Arc::new(engine) as Arc<dyn DigitPredictor>)
        }
    }
}
