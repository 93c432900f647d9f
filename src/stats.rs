// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/stats.rs - 像素统计
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{DynamicImage, imageops::FilterType};
use serde::Serialize;

use crate::frame::INPUT_SIZE;

/// 亮度低于该值的像素视为暗像素
pub const DARK_PIXEL_THRESHOLD: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelStatistics {
  /// 平均亮度 (0 - 255)
  pub avg_brightness: f32,
  /// 亮度标准差
  pub contrast: f32,
  /// 暗像素比例 (0 - 1)
  pub dark_pixel_ratio: f32,
}

impl PixelStatistics {
  /// 在固定分辨率下统计图像亮度
  pub fn analyze(image: &DynamicImage) -> Self {
    let size = INPUT_SIZE as u32;
    let luma = image
      .resize_exact(size, size, FilterType::Triangle)
      .to_luma8();

    let count = luma.as_raw().len().max(1) as f64;
    let (sum, sum_sq, dark) = luma
      .as_raw()
      .iter()
      .fold((0f64, 0f64, 0usize), |(s, sq, d), &v| {
        let v64 = v as f64;
        (s + v64, sq + v64 * v64, d + usize::from(v < DARK_PIXEL_THRESHOLD))
      });

    let mean = sum / count;
    let variance = (sum_sq / count - mean * mean).max(0.0);

    Self {
      avg_brightness: mean as f32,
      contrast: variance.sqrt() as f32,
      dark_pixel_ratio: (dark as f64 / count) as f32,
    }
  }
}
