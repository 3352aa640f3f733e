//! 手書き数字画像を認識するコマンドラインツール
//!
//! 使い方: classify_image [--config <path>] [--model <source>] <png>...

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use digit_canvas_lib::ml::PackageLoader;
use digit_canvas_lib::model::AppConfig;
use digit_canvas_lib::{init_logging, is_blank, ModelService, PageView, ViewState};

struct Args {
    config: Option<PathBuf>,
    model: Option<String>,
    images: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        model: None,
        images: Vec::new(),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config には設定ファイルのパスが必要です")?;
                args.config = Some(PathBuf::from(path));
            }
            "--model" => {
                args.model = Some(iter.next().context("--model にはモデルの取得先が必要です")?);
            }
            flag if flag.starts_with("--") => bail!("不明なオプション: {}", flag),
            _ => args.images.push(PathBuf::from(arg)),
        }
    }
    if args.images.is_empty() {
        bail!("使い方: classify_image [--config <path>] [--model <source>] <png>...");
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };
    if let Some(model) = args.model {
        config.set_model_source(model);
    }

    let loader = PackageLoader::from_settings(&config.model)?;
    let service = ModelService::new(loader);
    if !service.load().await {
        bail!(
            "モデルの読み込みに失敗しました: {}",
            service.last_error().unwrap_or_default()
        );
    }

    println!("=== 手書き数字認識 ===");
    for path in &args.images {
        println!("\n{}", path.display());
        let bitmap = match image::open(path) {
            Ok(image) => image.to_rgba8(),
            Err(e) => {
                eprintln!("✗ 画像を開けません: {}", e);
                continue;
            }
        };

        // 空白画像はモデルを呼ばない
        let predictions = if is_blank(&bitmap) {
            None
        } else {
            service.predict(&bitmap).await
        };
        let state = ViewState {
            predictions,
            is_processing: false,
            model_ready: true,
        };
        println!("{}", PageView::from(&state));
    }

    Ok(())
}
