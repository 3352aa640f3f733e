//! 手書き画像 → モデル入力テンソル変換
//!
//! 任意サイズのRGBAビットマップを、分類モデルが要求する
//! `[1, 28, 28, 1]`（NHWC）の正規化済みグレースケールテンソルに変換します。

use anyhow::Result;
use image::imageops;
use image::GrayImage;

use crate::types::Bitmap;

/// モデル入力画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 28;

/// モデル入力テンソルの形状 [batch, height, width, channels]
pub const INPUT_SHAPE: [usize; 4] = [1, IMAGE_SIZE, IMAGE_SIZE, 1];

/// モデル入力テンソル
///
/// 値は0.0（背景）〜1.0（ストローク）。行優先で平坦化したデータを保持する。
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
}

impl InputTensor {
    /// ゼロ埋めテンソル（ウォームアップ推論用）
    pub fn zeros() -> Self {
        Self {
            data: vec![0.0; IMAGE_SIZE * IMAGE_SIZE],
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        INPUT_SHAPE
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// (x, y) の値
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * IMAGE_SIZE + x]
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// すべての画素が純白（R=G=B=255）かどうか。アルファは無視する。
pub fn is_blank(bitmap: &Bitmap) -> bool {
    bitmap
        .pixels()
        .all(|p| p[0] == 255 && p[1] == 255 && p[2] == 255)
}

/// ビットマップをモデル入力テンソルに変換
///
/// 1. グレースケール化（imageクレート標準のRGB→輝度変換）
/// 2. バイリニア補間（4近傍）で28x28にリサイズ
/// 3. 反転正規化 `1 - raw / 255`（黒いストローク → 1.0、白背景 → 0.0）
/// 4. 先頭にバッチ次元を付与して [1, 28, 28, 1]
pub fn preprocess(bitmap: &Bitmap) -> Result<InputTensor> {
    let (width, height) = bitmap.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("画像サイズが不正です: {}x{}", width, height);
    }

    let gray = imageops::grayscale(bitmap);
    let data = resize_bilinear(&gray, IMAGE_SIZE as u32, IMAGE_SIZE as u32)
        .into_iter()
        .map(|v| (1.0 - v).clamp(0.0, 1.0))
        .collect();

    Ok(InputTensor { data })
}

/// 4近傍のバイリニア補間で縮小・拡大し、0.0〜1.0の値を返す
///
/// 出力画素 (x, y) は入力座標 `(x * w_in / w_out, y * h_in / h_out)` をサンプリングする
/// （角合わせ・半画素中心補正なし）。縮小時も周辺画素の平均は取らない。
fn resize_bilinear(gray: &GrayImage, out_width: u32, out_height: u32) -> Vec<f32> {
    let (width, height) = gray.dimensions();
    let scale_x = width as f32 / out_width as f32;
    let scale_y = height as f32 / out_height as f32;
    let value = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f32 / 255.0;

    let mut data = Vec::with_capacity((out_width * out_height) as usize);
    for y in 0..out_height {
        let src_y = y as f32 * scale_y;
        let y0 = (src_y.floor() as u32).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let dy = src_y - y0 as f32;
        for x in 0..out_width {
            let src_x = x as f32 * scale_x;
            let x0 = (src_x.floor() as u32).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let dx = src_x - x0 as f32;

            let top = value(x0, y0) + (value(x1, y0) - value(x0, y0)) * dx;
            let bottom = value(x0, y1) + (value(x1, y1) - value(x0, y1)) * dx;
            data.push(top + (bottom - top) * dy);
        }
    }
    data
}
