//! モデルパッケージの取得
//!
//! 設定された取得先（http(s) URL、file:// URL、ローカルパス）からパッケージのバイト列を読み込みます。

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// モデルの取得先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Remote(Url),
    Local(PathBuf),
}

impl ModelSource {
    /// 設定文字列から取得先を判定
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            bail!("モデルの取得先が空です");
        }
        match Url::parse(source) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::Local)
                    .map_err(|_| anyhow::anyhow!("不正なファイルURLです: {}", source)),
                // Windowsのドライブレター（C:\...）はスキームとして解釈される
                scheme if scheme.len() == 1 => Ok(Self::Local(PathBuf::from(source))),
                scheme => bail!("未対応のスキームです: {}", scheme),
            },
            Err(_) => Ok(Self::Local(PathBuf::from(source))),
        }
    }

    /// パッケージのバイト列を取得
    pub async fn fetch(&self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        match self {
            Self::Remote(url) => download(url, timeout).await,
            Self::Local(path) => tokio::fs::read(path)
                .await
                .context(format!("Failed to read model package: {:?}", path)),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{}", url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

async fn download(url: &Url, timeout: Option<Duration>) -> Result<Vec<u8>> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder.build().context("Failed to create HTTP client")?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .context(format!("Fetching {}", url))?;

    if response.status() != StatusCode::OK {
        bail!("Failed to fetch {}: {}", url, response.status());
    }

    let bytes = response
        .bytes()
        .await
        .context(format!("Reading response body from {}", url))?;
    Ok(bytes.to_vec())
}
