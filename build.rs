fn main() {
    // デスクトップシェル有効時のみTauriのビルド処理を実行
    #[cfg(feature = "desktop")]
    tauri_build::build();
}
