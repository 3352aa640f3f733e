//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//!
//! ## 入力の仕様
//! - 入力: 28x28 グレースケール1チャネル、値域 0.0〜1.0（白背景 = 0.0、ストローク = 1.0）
//! - 出力: 数字 0〜9 の10クラスのソフトマックス確率

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::preprocess::IMAGE_SIZE;
use crate::types::NUM_CLASSES;

/// 現在のネットワーク構成名
pub const ARCHITECTURE: &str = "digit-cnn-v1";

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// ネットワーク構成名（読み込み時の互換性チェック用）
    pub architecture: String,

    /// クラスラベル（インデックス順）
    /// 例: ["0", "1", ..., "9"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub model_input_size: u32,

    /// 入力チャネル数
    #[serde(default = "default_channels")]
    pub num_channels: u32,

    /// モデルの作成時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_channels() -> u32 {
    1
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelMetadata {
    /// 現在のネットワーク構成用のメタデータを作成
    pub fn new() -> Self {
        Self {
            architecture: ARCHITECTURE.to_string(),
            class_labels: (0..NUM_CLASSES).map(|d| d.to_string()).collect(),
            model_input_size: IMAGE_SIZE as u32,
            num_channels: 1,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }

    /// このアプリの前処理・推論と互換性があるか検証
    pub fn validate(&self) -> Result<()> {
        if self.architecture != ARCHITECTURE {
            anyhow::bail!(
                "未対応のモデル構成です: {} (対応: {})",
                self.architecture,
                ARCHITECTURE
            );
        }
        if self.class_labels.len() != NUM_CLASSES {
            anyhow::bail!(
                "クラス数が不正です: {} (期待: {})",
                self.class_labels.len(),
                NUM_CLASSES
            );
        }
        if self.model_input_size as usize != IMAGE_SIZE || self.num_channels != 1 {
            anyhow::bail!(
                "モデル入力形状が不正です: {}x{}x{} (期待: {}x{}x1)",
                self.model_input_size,
                self.model_input_size,
                self.num_channels,
                IMAGE_SIZE,
                IMAGE_SIZE
            );
        }
        Ok(())
    }
}
