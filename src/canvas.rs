//! 手書き入力キャンバス
//!
//! 白背景の正方形ビットマップにストロークを描画し、ストローク終了時・クリア時に
//! 現在のビットマップを呼び出し元へ返します。

use anyhow::{Context, Result};
use base64::Engine;
use image::Rgba;
use std::io::Cursor;

use crate::model::CanvasSettings;
use crate::types::{Bitmap, Point, PointerEvent};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 描画キャンバス
pub struct DigitCanvas {
    bitmap: Bitmap,
    max_size: u32,
    stroke_width: f32,
    is_drawing: bool,
    has_drawing: bool,
    // 現在のパスの最終座標
    cursor: Option<Point>,
}

impl DigitCanvas {
    /// デフォルト設定でキャンバスを作成
    pub fn new(container_width: u32) -> Self {
        Self::with_settings(container_width, &CanvasSettings::default())
    }

    pub fn with_settings(container_width: u32, settings: &CanvasSettings) -> Self {
        let size = fit_size(container_width, settings.max_size);
        Self {
            bitmap: Bitmap::from_pixel(size, size, WHITE),
            max_size: settings.max_size,
            stroke_width: settings.stroke_width,
            is_drawing: false,
            has_drawing: false,
            cursor: None,
        }
    }

    /// 一辺のピクセル数
    pub fn size(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn is_drawing(&self) -> bool {
        self.is_drawing
    }

    /// クリア後に一度でもストロークを開始したか（クリアボタンの表示用）
    pub fn has_drawing(&self) -> bool {
        self.has_drawing
    }

    /// ストローク開始: 新しいパスを開始する
    pub fn start_stroke(&mut self, point: Point) {
        self.is_drawing = true;
        self.has_drawing = true;
        self.cursor = Some(point);
    }

    /// ストローク継続: パスを延長してその区間を即座に描画する
    pub fn extend_stroke(&mut self, point: Point) {
        if !self.is_drawing {
            return;
        }
        if let Some(from) = self.cursor {
            self.draw_segment(from, point);
        }
        self.cursor = Some(point);
    }

    /// ストローク終了: パスを閉じて現在のビットマップを返す
    ///
    /// 描画中でなければ何も返さない。
    pub fn end_stroke(&mut self) -> Option<Bitmap> {
        if !self.is_drawing {
            return None;
        }
        self.is_drawing = false;
        self.cursor = None;
        Some(self.bitmap.clone())
    }

    /// 全面を白で塗りつぶし、空のビットマップを返す
    pub fn clear(&mut self) -> Bitmap {
        self.has_drawing = false;
        self.is_drawing = false;
        self.cursor = None;
        for pixel in self.bitmap.pixels_mut() {
            *pixel = WHITE;
        }
        self.bitmap.clone()
    }

    /// コンテナのリサイズ
    ///
    /// 既存の画素を新しいサイズのキャンバスの左上にコピーする。はみ出した部分は切り捨て。
    pub fn resize(&mut self, container_width: u32) {
        let size = fit_size(container_width, self.max_size);
        if size == self.size() {
            return;
        }
        let mut resized = Bitmap::from_pixel(size, size, WHITE);
        image::imageops::replace(&mut resized, &self.bitmap, 0, 0);
        self.bitmap = resized;
    }

    /// ポインタイベントを処理し、ストローク終了時はビットマップを返す
    pub fn handle_pointer(&mut self, event: PointerEvent) -> Option<Bitmap> {
        match event {
            PointerEvent::Down { x, y } => {
                self.start_stroke(Point::new(x, y));
                None
            }
            PointerEvent::Move { x, y } => {
                self.extend_stroke(Point::new(x, y));
                None
            }
            PointerEvent::Up | PointerEvent::Leave => self.end_stroke(),
        }
    }

    /// 現在のビットマップをPNGのdata URLとして取得
    pub fn to_png_data_url(&self) -> Result<String> {
        let mut bytes = Vec::new();
        self.bitmap
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .context("キャンバスのPNGエンコードに失敗しました")?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(format!("data:image/png;base64,{}", encoded))
    }

    /// 線分を丸端・丸結合の太線として黒で描画
    ///
    /// 線分からの距離が半径以内の画素を塗る（カプセル形状）。境界1ピクセルはカバレッジで減衰。
    fn draw_segment(&mut self, from: Point, to: Point) {
        let radius = self.stroke_width / 2.0;
        let size = self.size() as f32;

        let min_x = (from.x.min(to.x) - radius - 1.0).floor().max(0.0);
        let max_x = (from.x.max(to.x) + radius + 1.0).ceil().min(size);
        let min_y = (from.y.min(to.y) - radius - 1.0).floor().max(0.0);
        let max_y = (from.y.max(to.y) + radius + 1.0).ceil().min(size);
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        for y in min_y as u32..max_y as u32 {
            for x in min_x as u32..max_x as u32 {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let distance = distance_to_segment(center, from, to);
                let coverage = (radius + 0.5 - distance).clamp(0.0, 1.0);
                if coverage <= 0.0 {
                    continue;
                }
                let pixel = self.bitmap.get_pixel_mut(x, y);
                for channel in 0..3 {
                    let value = pixel[channel] as f32 * (1.0 - coverage);
                    pixel[channel] = value.round() as u8;
                }
                pixel[3] = 255;
            }
        }
    }
}

/// コンテナ幅を最大サイズで制限した一辺のサイズ（幅不明時は最大サイズ）
fn fit_size(container_width: u32, max_size: u32) -> u32 {
    if container_width == 0 {
        max_size
    } else {
        container_width.min(max_size)
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}
