// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/task.rs - 检测任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::{
  backend::BackendError,
  input::Scan,
  output::Render,
  report::DetectionReport,
  service::{DetectionService, ServiceError},
};

#[allow(async_fn_in_trait)]
pub trait Task<I, O>: Sized {
  type Error;
  async fn run_task(self, input: I, service: &DetectionService, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<RE, I, O> Task<I, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Scan>,
  O: Render<Scan, DetectionReport, Error = RE>,
{
  type Error = anyhow::Error;

  async fn run_task(self, mut input: I, service: &DetectionService, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let scan = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("读取 {} 成功，开始检测...", scan.name);
    let now = Instant::now();
    let report = service.classify(&scan.bytes).await?;
    let elapsed = now.elapsed();
    info!("检测完成，耗时: {:.2?}", elapsed);
    output.render_result(&scan, &report)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一张图像反复检测，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
  warm_up: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat: 100,
      warm_up: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }

  fn average(&self, times: &[Duration]) -> Option<Duration> {
    let measured = times.get(self.warm_up..).filter(|t| !t.is_empty()).unwrap_or(times);
    (!measured.is_empty()).then(|| measured.iter().sum::<Duration>() / measured.len() as u32)
  }
}

impl<RE, I, O> Task<I, O> for RepeatShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Scan>,
  O: Render<Scan, DetectionReport, Error = RE>,
{
  type Error = anyhow::Error;

  async fn run_task(self, mut input: I, service: &DetectionService, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let scan = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("读取 {} 成功，开始检测...", scan.name);
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let report = service.classify(&scan.bytes).await?;
      let elapsed = now.elapsed();
      info!("({})检测完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&scan, &report)?;
      times.push(elapsed);
    }

    if let Some(average) = self.average(&times) {
      warn!("平均检测时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 依次检测输入中的每张图像，收到中断信号或达到数量上限时停止
#[derive(Default, Debug)]
pub struct ContinuousTask {
  scan_limit: Option<usize>,
}

impl ContinuousTask {
  pub fn with_scan_limit(mut self, scan_limit: Option<usize>) -> Self {
    self.scan_limit = scan_limit;
    self
  }
}

fn install_interrupt_flag() -> Arc<AtomicBool> {
  let flag = Arc::new(AtomicBool::new(false));
  let handler_flag = flag.clone();
  if let Err(e) = ctrlc::set_handler(move || {
    info!("收到中断信号，处理完当前图像后退出...");
    handler_flag.store(true, Ordering::SeqCst);
  }) {
    warn!("无法注册中断处理: {}", e);
  }
  flag
}

impl<RE, I, O> Task<I, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Scan>,
  O: Render<Scan, DetectionReport, Error = RE>,
{
  type Error = anyhow::Error;

  async fn run_task(self, input: I, service: &DetectionService, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupted = install_interrupt_flag();

    let mut processed = 0usize;
    let mut rejected = 0usize;
    for scan in input {
      processed += 1;
      info!("处理第 {} 张图像: {}", processed, scan.name);
      let now = Instant::now();
      match service.classify(&scan.bytes).await {
        Ok(report) => {
          let elapsed_a = now.elapsed();
          output.render_result(&scan, &report)?;
          info!("检测完成，耗时: {:.2?} / {:.2?}", elapsed_a, now.elapsed());
        }
        // 文件头正确但内容损坏的图像与未通过检查的一样跳过
        Err(e @ (ServiceError::Intake(_) | ServiceError::Backend(BackendError::Decode(_)))) => {
          rejected += 1;
          error!("{} 无法检测，跳过: {}", scan.name, e);
        }
        Err(e) => return Err(e.into()),
      }

      if self.scan_limit.is_some_and(|n| processed >= n) {
        info!("达到指定数量 {}, 退出任务循环", processed);
        break;
      }
      if interrupted.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 张，拒绝 {} 张", processed, rejected);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{cell::RefCell, convert::Infallible, io::Cursor};

  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

  use crate::backend::BackendConfig;

  /// 只记下收到结果的图像名
  #[derive(Default)]
  struct Collect(RefCell<Vec<String>>);

  impl Render<Scan, DetectionReport> for &Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &Scan, _: &DetectionReport) -> Result<(), Self::Error> {
      self.0.borrow_mut().push(frame.name.clone());
      Ok(())
    }
  }

  fn png(value: u8) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([value; 3])));
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
    bytes
  }

  #[tokio::test]
  async fn continuous_task_skips_images_that_fail_to_decode() {
    let service = DetectionService::new(BackendConfig::CompactCnn { seed: 3 });
    service.initialize().await.unwrap();

    let mut corrupt = png(90);
    corrupt.truncate(20);
    let scans = vec![
      Scan::new("a.png", png(30)),
      Scan::new("broken.png", corrupt),
      Scan::new("c.png", png(220)),
    ];
    let sink = Collect::default();
    ContinuousTask::default()
      .run_task(scans.into_iter(), &service, &sink)
      .await
      .unwrap();
    assert_eq!(*sink.0.borrow(), ["a.png", "c.png"]);
  }

  #[test]
  fn average_skips_warm_up_runs() {
    let task = RepeatShotTask::default();
    let times = [100, 50, 10, 20].map(Duration::from_millis);
    assert_eq!(task.average(&times), Some(Duration::from_millis(15)));
    assert_eq!(task.average(&times[..1]), Some(Duration::from_millis(100)));
    assert_eq!(task.average(&[]), None);
  }
}
