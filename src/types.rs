use serde::{Deserialize, Serialize};

/// キャンバスのラスタ画像（RGBA、原点は左上）
pub type Bitmap = image::RgbaImage;

/// 分類クラス数（数字 0-9）
pub const NUM_CLASSES: usize = 10;

/// 確率の合計として許容する誤差
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// キャンバス上の座標
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// クライアント座標をキャンバス原点からの相対座標に変換（タッチ入力用）
    pub fn relative_to(self, origin: Point) -> Self {
        Self {
            x: self.x - origin.x,
            y: self.y - origin.y,
        }
    }
}

/// ポインタ（マウス・タッチ）入力イベント
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointerEvent {
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up,
    Leave,
}

/// 単一の予測結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub digit: u8,
    pub probability: f32,
}

/// 確率の降順に並んだ10件の予測結果
///
/// ラベルは0-9がちょうど1回ずつ現れ、確率の合計はおよそ1.0になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionSet(Vec<Prediction>);

impl PredictionSet {
    /// モデル出力（ソフトマックス確率、インデックス = 数字）から順位付けした結果を作成
    pub fn from_probabilities(probabilities: &[f32]) -> anyhow::Result<Self> {
        if probabilities.len() != NUM_CLASSES {
            anyhow::bail!(
                "モデル出力の要素数が不正です: {} (期待: {})",
                probabilities.len(),
                NUM_CLASSES
            );
        }
        if let Some(bad) = probabilities
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0 + PROBABILITY_SUM_TOLERANCE)
        {
            anyhow::bail!("確率値が範囲外です: {}", bad);
        }
        let sum: f32 = probabilities.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            anyhow::bail!("確率の合計が1になりません: {}", sum);
        }

        let mut ranked: Vec<Prediction> = probabilities
            .iter()
            .enumerate()
            .map(|(digit, &probability)| Prediction {
                digit: digit as u8,
                probability: probability.min(1.0),
            })
            .collect();
        // 同率の場合は数字の小さい順（安定ソート）
        ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        Ok(Self(ranked))
    }

    /// 最上位の予測
    pub fn top(&self) -> &Prediction {
        &self.0[0]
    }

    /// 2位以下の候補を最大 `n` 件
    pub fn alternatives(&self, n: usize) -> &[Prediction] {
        let end = (1 + n).min(self.0.len());
        &self.0[1..end]
    }

    pub fn as_slice(&self) -> &[Prediction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a PredictionSet {
    type Item = &'a Prediction;
    type IntoIter = std::slice::Iter<'a, Prediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_except(digit: usize, value: f32) -> Vec<f32> {
        let rest = (1.0 - value) / (NUM_CLASSES as f32 - 1.0);
        (0..NUM_CLASSES)
            .map(|i| if i == digit { value } else { rest })
            .collect()
    }

    #[test]
    fn test_ranking_sorted_descending() {
        let probs = [0.01, 0.02, 0.5, 0.03, 0.04, 0.1, 0.05, 0.15, 0.06, 0.04];
        let set = PredictionSet::from_probabilities(&probs).unwrap();

        assert_eq!(set.len(), NUM_CLASSES);
        assert_eq!(set.top().digit, 2);
        assert_eq!(set.as_slice()[1].digit, 7);
        assert_eq!(set.as_slice()[2].digit, 5);
        for pair in set.as_slice().windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }
    }

    #[test]
    fn test_ranking_labels_are_permutation() {
        let set = PredictionSet::from_probabilities(&uniform_except(9, 0.91)).unwrap();
        let mut digits: Vec<u8> = set.iter().map(|p| p.digit).collect();
        digits.sort_unstable();
        assert_eq!(digits, (0..10).collect::<Vec<u8>>());
        let sum: f32 = set.iter().map(|p| p.probability).sum();
        assert!((sum - 1.0).abs() < PROBABILITY_SUM_TOLERANCE);
    }

    #[test]
    fn test_ties_keep_digit_order() {
        let set = PredictionSet::from_probabilities(&[0.1; 10]).unwrap();
        let digits: Vec<u8> = set.iter().map(|p| p.digit).collect();
        assert_eq!(digits, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_rejects_wrong_length_and_bad_sum() {
        assert!(PredictionSet::from_probabilities(&[0.5, 0.5]).is_err());
        assert!(PredictionSet::from_probabilities(&[0.5; 10]).is_err());
        let mut nan = uniform_except(0, 0.55);
        nan[3] = f32::NAN;
        assert!(PredictionSet::from_probabilities(&nan).is_err());
    }

    #[test]
    fn test_alternatives_are_capped() {
        let set = PredictionSet::from_probabilities(&uniform_except(4, 0.64)).unwrap();
        assert_eq!(set.alternatives(3).len(), 3);
        assert_eq!(set.alternatives(20).len(), 9);
        assert!(set.alternatives(3).iter().all(|p| p.digit != 4));
    }

    #[test]
    fn test_pointer_event_json() {
        let event: PointerEvent = serde_json::from_str(r#"{"kind":"down","x":3.0,"y":4.5}"#).unwrap();
        assert_eq!(event, PointerEvent::Down { x: 3.0, y: 4.5 });
        let event: PointerEvent = serde_json::from_str(r#"{"kind":"leave"}"#).unwrap();
        assert_eq!(event, PointerEvent::Leave);
    }

    #[test]
    fn test_relative_point() {
        let p = Point::new(110.0, 65.0).relative_to(Point::new(100.0, 50.0));
        assert_eq!(p, Point::new(10.0, 15.0));
    }
}
