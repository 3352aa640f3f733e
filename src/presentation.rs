//! 予測結果の表示
//!
//! 表示状態から描画内容を決めるだけで、計算は行いません。

use serde::Serialize;
use std::fmt;

use crate::controller::ViewState;
use crate::types::{Prediction, PredictionSet};

/// 最上位以外に表示する候補数
pub const MAX_ALTERNATIVES: usize = 3;

/// 結果表示
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultView {
    /// 解析中（前回の結果の代わりにスピナー）
    Processing,
    /// 何も表示しない
    Empty,
    Result {
        top: Prediction,
        alternatives: Vec<Prediction>,
    },
}

impl ResultView {
    /// 予測結果が無ければ処理中でも何も表示しない（初回のストロークではスピナーは出ない）
    pub fn new(predictions: Option<&PredictionSet>, is_processing: bool) -> Self {
        match predictions {
            Some(set) if !set.is_empty() => {
                if is_processing {
                    Self::Processing
                } else {
                    Self::Result {
                        top: *set.top(),
                        alternatives: set.alternatives(MAX_ALTERNATIVES).to_vec(),
                    }
                }
            }
            _ => Self::Empty,
        }
    }
}

impl fmt::Display for ResultView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "Analyzing..."),
            Self::Empty => Ok(()),
            Self::Result { top, alternatives } => {
                writeln!(f, "Recognition Result")?;
                write!(f, "{} ({} confidence)", top.digit, percent(top.probability))?;
                if !alternatives.is_empty() {
                    write!(f, "\nOther possibilities:")?;
                    for p in alternatives {
                        write!(f, " {} ({})", p.digit, percent(p.probability))?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// 画面全体の表示内容
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    /// モデル読み込み中のバナー
    pub loading_banner: bool,
    pub result: ResultView,
}

impl From<&ViewState> for PageView {
    fn from(state: &ViewState) -> Self {
        Self {
            loading_banner: !state.model_ready,
            result: ResultView::new(state.predictions.as_ref(), state.is_processing),
        }
    }
}

impl fmt::Display for PageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loading_banner {
            writeln!(f, "Loading recognition model...")?;
        }
        write!(f, "{}", self.result)
    }
}

fn percent(probability: f32) -> String {
    format!("{:.1}%", probability * 100.0)
}
