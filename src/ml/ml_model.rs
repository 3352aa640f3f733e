//! 数字認識モデルの共通定義
//!
//! 手書き数字分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 10)]
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 28)]
    pub image_size: usize,
    /// 全結合層の隠れ次元
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl ModelConfig {
    /// Flatten後の特徴次元
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2, stride 2): size -> size / 2（切り捨て）
    pub fn feature_size(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        32 * after_pool2 * after_pool2
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> anyhow::Result<DigitClassifier<B>> {
        let d = self.feature_size();
        if d == 0 {
            anyhow::bail!("入力サイズが小さすぎます: {} (最小10x10が必要)", self.image_size);
        }

        tracing::debug!(
            image_size = self.image_size,
            feature_size = d,
            hidden_size = self.hidden_size,
            num_classes = self.num_classes,
            "モデル構成"
        );

        Ok(DigitClassifier {
            // Conv1: 3x3 (no padding, stride 1)
            conv1: Conv2dConfig::new([1, 16], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // Conv2: 3x3 (no padding, stride 1)
            conv2: Conv2dConfig::new([16, 32], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            // 全結合層
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),

            activation: Relu::new(),
        })
    }
}

/// 手書き数字分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層 (1 -> 16 -> 32 チャネル)
/// - Flatten
/// - FC: d -> hidden + ReLU
/// - FC: hidden -> num_classes
/// - Softmax (分類時)
///
/// 28x28入力の場合: 28 -> 26 -> 13 -> 11 -> 5、d = 32 * 5 * 5 = 800
#[derive(Module, Debug)]
pub struct DigitClassifier<B: Backend> {
    conv1: Conv2d<B>, // 1 -> 16
    pool1: MaxPool2d, // 2x2
    conv2: Conv2d<B>, // 16 -> 32
    pool2: MaxPool2d, // 2x2

    fc1: Linear<B>, // d -> hidden
    fc2: Linear<B>, // hidden -> num_classes

    activation: Relu,
}

impl<B: Backend> DigitClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// クラスごとの確率（ソフトマックス）
    ///
    /// # 戻り値
    /// - [batch_size, num_classes]、各行の合計は1
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}
