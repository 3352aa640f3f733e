//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、入力サイズなど）
//! - model.bin       - モデルの重み（burnのバイナリレコード）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 読み込んだモデルパッケージ
#[derive(Debug, Clone)]
pub struct ModelPackage {
    pub metadata: ModelMetadata,
    pub model_binary: Vec<u8>,
}

/// メタデータと共にモデルをTar.gz形式で保存
pub fn save_model_package(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let file = File::create(output_path)
        .context(format!("Failed to create tar.gz file: {:?}", output_path))?;
    write_model_package(file, metadata, model_binary)?;
    Ok(())
}

/// パッケージをバイト列として生成
pub fn model_package_to_bytes(metadata: &ModelMetadata, model_binary: &[u8]) -> Result<Vec<u8>> {
    write_model_package(Vec::new(), metadata, model_binary)
}

fn write_model_package<W: Write>(
    writer: W,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<W> {
    // Gzip圧縮を設定
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?;
    encoder.finish().context("Failed to finish gzip stream")
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .context(format!("Failed to add {} to tar", name))
}

/// Tar.gzファイルからモデルパッケージを読み込む
pub fn load_model_package(tar_gz_path: &Path) -> Result<ModelPackage> {
    let file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    read_model_package(file)
}

/// 取得済みのバイト列からモデルパッケージを読み込む
pub fn load_model_package_from_bytes(bytes: &[u8]) -> Result<ModelPackage> {
    read_model_package(bytes)
}

fn read_model_package<R: Read>(reader: R) -> Result<ModelPackage> {
    let decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    // 両方のファイルを読み込む
    for entry in archive.entries().context("Failed to read tar.gz archive")? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(model_binary)) => Ok(ModelPackage {
            metadata,
            model_binary,
        }),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    tracing::info!(
        architecture = %metadata.architecture,
        classes = %metadata.class_labels.join(", "),
        input = %format!("{}x{}x{}", metadata.model_input_size, metadata.model_input_size, metadata.num_channels),
        trained_at = %metadata.trained_at,
        "モデルメタデータ"
    );
}
