//! アプリケーション設定管理モジュール
//!
//! モデルの取得先やキャンバス設定などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 既定のモデルパッケージの取得先（公開配布URL）
pub const DEFAULT_MODEL_SOURCE: &str =
    "https://models.digitcanvas.app/v1/digit_classifier.tar.gz";

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// モデルパッケージの取得先（http(s) URL、file:// URL、またはローカルパス）
    pub source: String,
    /// 取得リクエストのタイムアウト秒数（None で無制限）
    pub fetch_timeout_secs: Option<u64>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_MODEL_SOURCE.to_string(),
            fetch_timeout_secs: Some(30),
        }
    }
}

impl ModelSettings {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

/// キャンバス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasSettings {
    /// キャンバスの最大サイズ（正方形、ピクセル）
    pub max_size: u32,
    /// ストロークの太さ（ピクセル）
    pub stroke_width: f32,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            max_size: 280,
            stroke_width: 20.0,
        }
    }
}

/// 画面制御の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// 予測開始前の待ち時間（ミリ秒）。表示のちらつき防止用
    pub prediction_delay_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            prediction_delay_ms: 200,
        }
    }
}

impl ControllerSettings {
    pub fn prediction_delay(&self) -> Duration {
        Duration::from_millis(self.prediction_delay_ms)
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// モデル設定
    pub model: ModelSettings,
    /// キャンバス設定
    pub canvas: CanvasSettings,
    /// 画面制御の設定
    pub controller: ControllerSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        Self::load_from_or_default(Self::default_path())
    }

    /// 指定パスから設定を読み込む、読めない場合はデフォルト設定を返す
    pub fn load_from_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "設定ファイルを読み込みました");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "設定ファイルの読み込みに失敗しました。デフォルト設定を使用します"
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// モデルの取得先を設定
    pub fn set_model_source(&mut self, source: String) {
        self.model.source = source;
    }
}
