//! モデルパッケージの読み込みから予測までの結合テスト（ml 機能が必要）
#![cfg(feature = "ml")]

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use digit_canvas_lib::ml::{model_to_bytes, InferenceBackend, ModelConfig, PackageLoader};
use digit_canvas_lib::model::{
    model_package_to_bytes, save_model_package, ControllerSettings, ModelMetadata, ModelSettings,
};
use digit_canvas_lib::{DigitCanvas, ModelService, PageController, PointerEvent, Submission};

fn package_bytes() -> Vec<u8> {
    let model = ModelConfig::new()
        .init::<InferenceBackend>(&Default::default())
        .unwrap();
    let binary = model_to_bytes(model).unwrap();
    model_package_to_bytes(&ModelMetadata::new(), &binary).unwrap()
}

fn scribble() -> digit_canvas_lib::Bitmap {
    let mut canvas = DigitCanvas::new(140);
    canvas.handle_pointer(PointerEvent::Down { x: 30.0, y: 30.0 });
    canvas.handle_pointer(PointerEvent::Move { x: 110.0, y: 30.0 });
    canvas.handle_pointer(PointerEvent::Move { x: 40.0, y: 120.0 });
    canvas.handle_pointer(PointerEvent::Up).unwrap()
}

/// 1回だけ応答する最小のHTTPサーバ
async fn serve_once(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await.unwrap();
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/gzip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.shutdown().await.unwrap();
    });
    format!("http://{}/digit_classifier.tar.gz", addr)
}

#[tokio::test]
async fn test_local_package_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("digit_classifier.tar.gz");
    let model = ModelConfig::new()
        .init::<InferenceBackend>(&Default::default())
        .unwrap();
    save_model_package(&path, &ModelMetadata::new(), &model_to_bytes(model).unwrap()).unwrap();

    let loader = PackageLoader::from_settings(&ModelSettings {
        source: path.to_string_lossy().to_string(),
        fetch_timeout_secs: None,
    })
    .unwrap();
    let service = Arc::new(ModelService::new(loader));
    let controller = Arc::new(PageController::new(
        Arc::clone(&service),
        &ControllerSettings {
            prediction_delay_ms: 0,
        },
    ));
    let watcher = controller.watch_model_ready();
    assert!(service.load().await);
    watcher.await.unwrap();

    assert_eq!(
        controller.handle_image_data(scribble()).await,
        Submission::Published
    );
    let state = controller.state();
    assert!(state.model_ready);
    let predictions = state.predictions.expect("predictions published");
    assert_eq!(predictions.len(), 10);
    let sum: f32 = predictions.iter().map(|p| p.probability).sum();
    assert!((sum - 1.0).abs() < 1e-3);
    let mut digits: Vec<u8> = predictions.iter().map(|p| p.digit).collect();
    digits.sort_unstable();
    assert_eq!(digits, (0..10).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_remote_package_download() {
    let url = serve_once(package_bytes()).await;
    let loader = PackageLoader::from_settings(&ModelSettings {
        source: url,
        fetch_timeout_secs: Some(10),
    })
    .unwrap();
    let service = ModelService::new(loader);

    assert!(service.load().await);
    let predictions = service.predict(&scribble()).await.unwrap();
    assert_eq!(predictions.len(), 10);
}

#[tokio::test]
async fn test_corrupt_package_reports_failure() {
    let url = serve_once(b"not a tarball".to_vec()).await;
    let loader = PackageLoader::from_settings(&ModelSettings {
        source: url,
        fetch_timeout_secs: Some(10),
    })
    .unwrap();
    let service = ModelService::new(loader);

    assert!(!service.load().await);
    assert!(!service.is_ready());
    assert!(service.last_error().is_some());
}
