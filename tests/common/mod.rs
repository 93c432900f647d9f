// 该文件是 Xiongpian （胸片） 项目的一部分。
// tests/common/mod.rs - 测试用图像
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

#![allow(dead_code)]

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
  bytes
}

/// 单色 PNG
pub fn solid_png(value: u8) -> Vec<u8> {
  encode(
    DynamicImage::ImageRgb8(RgbImage::from_pixel(96, 80, Rgb([value; 3]))),
    ImageFormat::Png,
  )
}

/// 左暗右亮的灰度 JPEG，近似胸片的明暗分布
pub fn chest_like_jpeg() -> Vec<u8> {
  let image = GrayImage::from_fn(120, 100, |x, y| {
    let lung = if (20..50).contains(&x) || (70..100).contains(&x) { 40 } else { 200 };
    Luma([(lung + (y % 7) * 3) as u8])
  });
  encode(DynamicImage::ImageLuma8(image).to_rgb8().into(), ImageFormat::Jpeg)
}
