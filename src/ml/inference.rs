//! モデル推論機能

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use std::path::Path;
use std::sync::Mutex;

use crate::ml::{DigitClassifier, ModelConfig};
use crate::model::{load_model_package, load_model_package_from_bytes, ModelMetadata, ModelPackage};
use crate::preprocess::{InputTensor, IMAGE_SIZE};
use crate::service::DigitPredictor;

/// 推論に使用するバックエンド（CPU）
pub type InferenceBackend = NdArray;

/// 推論エンジン
pub struct InferenceEngine {
    model: Mutex<DigitClassifier<InferenceBackend>>,
    metadata: ModelMetadata,
    device: NdArrayDevice,
}

impl InferenceEngine {
    /// モデルパッケージから推論エンジンを初期化
    pub fn from_package(package: ModelPackage) -> Result<Self> {
        package.metadata.validate()?;

        let device = NdArrayDevice::default();

        let model_config = ModelConfig::new()
            .with_num_classes(package.metadata.class_labels.len())
            .with_image_size(package.metadata.model_input_size as usize);
        let model = model_config.init::<InferenceBackend>(&device)?;

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(package.model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        Ok(Self {
            model: Mutex::new(model),
            metadata: package.metadata,
            device,
        })
    }

    /// 取得済みのパッケージのバイト列から初期化
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_package(load_model_package_from_bytes(bytes)?)
    }

    /// パッケージファイルから初期化
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::from_package(load_model_package(model_path.as_ref())?)
    }

    /// 1枚の入力テンソルに対するクラスごとの確率（インデックス = 数字）
    pub fn classify(&self, input: &InputTensor) -> Result<Vec<f32>> {
        // チャネル数が1なので NHWC [1, 28, 28, 1] と NCHW [1, 1, 28, 28] は同じ並び
        let data = TensorData::new(input.as_slice().to_vec(), [1, 1, IMAGE_SIZE, IMAGE_SIZE]);
        let tensor = Tensor::<InferenceBackend, 4>::from_data(data, &self.device);

        let probabilities = {
            let model = self
                .model
                .lock()
                .map_err(|_| anyhow::anyhow!("モデルのロックが破損しています"))?;
            model.predict_proba(tensor)
        };

        probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

impl DigitPredictor for InferenceEngine {
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>> {
        self.classify(input)
    }
}

/// モデルの重みをバイナリ（model.bin の中身）に変換
pub fn model_to_bytes<B: Backend>(model: DigitClassifier<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
}
