// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use image::{DynamicImage, RgbImage, imageops::FilterType};
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::frame::{FrameError, INPUT_SIZE, ImageTensor, PixelRange, RGB_CHANNELS};
use crate::tensor::TensorLedger;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像张量构造失败: {0}")]
  Frame(#[from] FrameError),
}

/// 缩放时的采样方式。两者数值上并不等价，每个后端固定使用其中一种。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
  Nearest,
  Bilinear,
}

impl Resampling {
  fn filter(&self) -> FilterType {
    match self {
      Resampling::Nearest => FilterType::Nearest,
      Resampling::Bilinear => FilterType::Triangle,
    }
  }
}

/// 通道布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
  /// 保留原始 RGB
  Rgb,
  /// 转为亮度后复制到三个通道
  LuminanceReplicated,
}

/// 单个后端的预处理约定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
  pub resampling: Resampling,
  pub layout: ChannelLayout,
  pub range: PixelRange,
}

/// 解码原始字节
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
  Ok(image::load_from_memory(bytes)?)
}

impl Preprocessor {
  pub const fn new(resampling: Resampling, layout: ChannelLayout, range: PixelRange) -> Self {
    Self {
      resampling,
      layout,
      range,
    }
  }

  /// 解码并转换为 `[1, S, S, 3]` 张量
  pub fn preprocess(
    &self,
    bytes: &[u8],
    ledger: &TensorLedger,
  ) -> Result<ImageTensor, PreprocessError> {
    let image = decode(bytes)?;
    self.preprocess_image(&image, ledger)
  }

  /// 对已解码的图像做同样的转换
  pub fn preprocess_image(
    &self,
    image: &DynamicImage,
    ledger: &TensorLedger,
  ) -> Result<ImageTensor, PreprocessError> {
    debug!(
      "预处理图像: {}x{} -> {}x{}, {:?}",
      image.width(),
      image.height(),
      INPUT_SIZE,
      INPUT_SIZE,
      self
    );

    let resized = self.resize(image);
    let mut data = Array4::<f32>::zeros((1, INPUT_SIZE, INPUT_SIZE, RGB_CHANNELS));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..RGB_CHANNELS {
        data[[0, y as usize, x as usize, c]] = self.range.scale(pixel[c]);
      }
    }

    Ok(ImageTensor::new(ledger, data)?)
  }

  fn resize(&self, image: &DynamicImage) -> RgbImage {
    let size = INPUT_SIZE as u32;
    let resized = image.resize_exact(size, size, self.resampling.filter());
    match self.layout {
      ChannelLayout::Rgb => resized.to_rgb8(),
      ChannelLayout::LuminanceReplicated => DynamicImage::ImageLuma8(resized.to_luma8()).to_rgb8(),
    }
  }
}
