// 该文件是 Shanan SSD 项目的一部分。
// src/output/overlay.rs - 检测框与性能面板绘制
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

use std::time::Duration;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use super::OutputError;
use crate::frame::{Frame, ToRgbImage};
use crate::input::FrameTotal;
use crate::model::{Detection, LabelTable};
use crate::telemetry::ms;

/// 画面下方性能面板的高度
pub const PANEL_HEIGHT: u32 = 105;

/// 8 色调色板，按 `class_id & 7` 取色
pub const PALETTE: [Rgb<u8>; 8] = [
  Rgb([128, 128, 128]), // 灰
  Rgb([128, 128, 255]), // 蓝
  Rgb([255, 128, 128]), // 红
  Rgb([255, 128, 255]), // 品红
  Rgb([128, 255, 128]), // 绿
  Rgb([128, 255, 255]), // 青
  Rgb([255, 255, 128]), // 黄
  Rgb([255, 255, 255]), // 白
];

const LABEL_BACKGROUND_WIDTH: u32 = 160;
const LABEL_BACKGROUND_HEIGHT: u32 = 20;
const LABEL_FONT_SIZE: f32 = 15.0;
const LABEL_TEXT_OFFSET: i32 = 3;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

const PANEL_FONT_SIZE: f32 = 14.0;
const PANEL_LINE_HEIGHT: i32 = 15;
const PANEL_LEFT: i32 = 10;
const PANEL_TEXT_COLOR: Rgb<u8> = Rgb([128, 128, 255]);

pub fn palette_color(class_id: i32) -> Rgb<u8> {
  PALETTE[(class_id & 0x7) as usize]
}

/// 标签表中有对应项时返回标签，否则返回类别编号
pub fn display_name(class_id: i32, labels: &LabelTable) -> String {
  labels
    .get(class_id)
    .map(str::to_string)
    .unwrap_or_else(|| class_id.to_string())
}

/// 控制台/日志中每个检测结果的一行
pub fn detection_line(detection: &Detection, labels: &LabelTable) -> String {
  let b = &detection.bbox;
  format!(
    "Class={:15}({:3})  Confidence={:.6}  Location=({},{})-({},{})",
    display_name(detection.class_id, labels),
    detection.class_id,
    detection.confidence,
    b.left,
    b.top,
    b.right,
    b.bottom
  )
}

/// 面板显示的数据；渲染耗时与帧时间来自上一帧
#[derive(Debug, Clone, Copy)]
pub struct PanelStats {
  pub frame_number: u64,
  pub total: FrameTotal,
  pub inference_time: Duration,
  pub decode_time: Duration,
  pub render_time: Duration,
  pub frame_time: Option<Duration>,
}

impl PanelStats {
  pub fn lines(&self) -> [String; 5] {
    let frame_time = match self.frame_time {
      Some(t) if !t.is_zero() => format!(
        "Frame time     : {:.3} ms    {:.2} fps",
        ms(t),
        1.0 / t.as_secs_f64()
      ),
      _ => "Frame time     : ---".to_string(),
    };
    [
      format!("frame_number   : {:5} / {}", self.frame_number, self.total),
      format!("Inference time : {:.3} ms", ms(self.inference_time)),
      format!("parse time     : {:.3} ms", ms(self.decode_time)),
      format!("Rendering time : {:.3} ms", ms(self.render_time)),
      frame_time,
    ]
  }
}

pub struct OverlayRenderer {
  font: FontArc,
  label_scale: PxScale,
  panel_scale: PxScale,
}

impl OverlayRenderer {
  pub fn new() -> Result<Self, OutputError> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).map_err(|_| OutputError::FontError)?;
    Ok(Self {
      font,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      panel_scale: PxScale::from(PANEL_FONT_SIZE),
    })
  }

  /// 生成显示帧：原图加检测框，下方附带面板
  pub fn compose(
    &self,
    frame: &Frame,
    detections: &[Detection],
    labels: &LabelTable,
    panel: &PanelStats,
  ) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for detection in detections {
      self.draw_detection(&mut image, detection, labels);
    }

    let (width, height) = image.dimensions();
    let mut canvas = RgbImage::new(width, height + PANEL_HEIGHT);
    imageops::replace(&mut canvas, &image, 0, 0);
    self.draw_panel(&mut canvas, height, panel);
    canvas
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection, labels: &LabelTable) {
    let color = palette_color(detection.class_id);
    let b = &detection.bbox;

    let (width, height) = image.dimensions();
    // 线宽 2 像素；坐标收敛到画布外两像素内，画布外的边保持不可见
    let clamp_x = |v: i32| v.clamp(-2, width as i32 + 1);
    let clamp_y = |v: i32| v.clamp(-2, height as i32 + 1);
    if b.right >= b.left && b.bottom >= b.top {
      let (left, top) = (clamp_x(b.left), clamp_y(b.top));
      let (right, bottom) = (clamp_x(b.right), clamp_y(b.bottom));
      let w = (right - left + 1) as u32;
      let h = (bottom - top + 1) as u32;
      draw_hollow_rect_mut(image, Rect::at(left, top).of_size(w, h), color);
      if w > 2 && h > 2 {
        let inner = Rect::at(left + 1, top + 1).of_size(w - 2, h - 2);
        draw_hollow_rect_mut(image, inner, color);
      }
    }

    let label_x = b
      .left
      .clamp(-(LABEL_BACKGROUND_WIDTH as i32), width as i32);
    let label_y = b
      .top
      .clamp(-(LABEL_BACKGROUND_HEIGHT as i32), height as i32);
    let background =
      Rect::at(label_x, label_y).of_size(LABEL_BACKGROUND_WIDTH, LABEL_BACKGROUND_HEIGHT);
    draw_filled_rect_mut(image, background, color);

    let text = format!(
      "{} {:.1}%",
      display_name(detection.class_id, labels),
      detection.confidence * 100.0
    );
    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      label_x,
      label_y + LABEL_TEXT_OFFSET,
      self.label_scale,
      &self.font,
      &text,
    );
  }

  fn draw_panel(&self, canvas: &mut RgbImage, frame_height: u32, panel: &PanelStats) {
    for (i, line) in panel.lines().iter().enumerate() {
      let y = frame_height as i32 + PANEL_LINE_HEIGHT * i as i32 + 3;
      draw_text_mut(
        canvas,
        PANEL_TEXT_COLOR,
        PANEL_LEFT,
        y,
        self.panel_scale,
        &self.font,
        line,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ChannelOrder;
  use crate::model::{BoundingBox, DetectionDecoder, DetectionTensors, TensorShape};

  fn detection(class_id: i32, bbox: (i32, i32, i32, i32)) -> Detection {
    Detection {
      class_id,
      confidence: 0.8765,
      bbox: BoundingBox {
        top: bbox.0,
        left: bbox.1,
        bottom: bbox.2,
        right: bbox.3,
      },
    }
  }

  fn panel() -> PanelStats {
    PanelStats {
      frame_number: 7,
      total: FrameTotal(None),
      inference_time: Duration::from_micros(12_345),
      decode_time: Duration::from_micros(210),
      render_time: Duration::from_millis(3),
      frame_time: None,
    }
  }

  #[test]
  fn palette_wraps_every_eight_ids() {
    assert_eq!(palette_color(1), palette_color(9));
    assert_eq!(palette_color(0), Rgb([128, 128, 128]));
    assert_eq!(palette_color(7), Rgb([255, 255, 255]));
  }

  #[test]
  fn missing_label_falls_back_to_numeric_id() {
    let labels = LabelTable::from_lines("???\nperson\n");
    assert_eq!(display_name(1, &labels), "person");
    assert_eq!(display_name(5, &labels), "5");
    assert_eq!(display_name(3, &LabelTable::default()), "3");
  }

  #[test]
  fn detection_line_layout() {
    let labels = LabelTable::from_lines("???\nperson\n");
    assert_eq!(
      detection_line(&detection(1, (20, 10, 200, 100)), &labels),
      "Class=person         (  1)  Confidence=0.876500  Location=(10,20)-(100,200)"
    );
  }

  #[test]
  fn panel_lines() {
    let lines = panel().lines();
    assert_eq!(lines[0], "frame_number   :     7 / -1");
    assert_eq!(lines[1], "Inference time : 12.345 ms");
    assert_eq!(lines[2], "parse time     : 0.210 ms");
    assert_eq!(lines[3], "Rendering time : 3.000 ms");
    assert_eq!(lines[4], "Frame time     : ---");

    let mut stats = panel();
    stats.frame_time = Some(Duration::from_millis(40));
    assert_eq!(stats.lines()[4], "Frame time     : 40.000 ms    25.00 fps");
  }

  #[test]
  fn composed_frame_has_panel_below() {
    let renderer = OverlayRenderer::new().unwrap();
    let frame = Frame::from_raw(64, 48, ChannelOrder::Bgr, vec![0; 64 * 48 * 3]).unwrap();
    let dets = [detection(2, (5, 5, 30, 40))];
    let image = renderer.compose(&frame, &dets, &LabelTable::default(), &panel());
    assert_eq!(image.dimensions(), (64, 48 + PANEL_HEIGHT));
    // 检测框左上角使用调色板颜色
    assert_eq!(image.get_pixel(40, 30), &palette_color(2));
  }

  #[test]
  fn boxes_outside_the_frame_do_not_panic() {
    let renderer = OverlayRenderer::new().unwrap();
    let frame = Frame::from_raw(32, 32, ChannelOrder::Rgb, vec![0; 32 * 32 * 3]).unwrap();
    let dets = [
      detection(1, (-50, -60, 400, 500)),
      detection(2, (100, 100, 120, 120)),
      detection(3, (10, 10, 5, 5)),
      detection(4, (i32::MIN, i32::MIN, i32::MAX, i32::MAX)),
      detection(5, (i32::MAX, i32::MAX, i32::MAX, i32::MAX)),
    ];
    let image = renderer.compose(&frame, &dets, &LabelTable::default(), &panel());
    assert_eq!(image.dimensions(), (32, 32 + PANEL_HEIGHT));
  }

  #[test]
  fn saturated_boxes_from_the_decoder_render() {
    let renderer = OverlayRenderer::new().unwrap();
    let frame = Frame::from_raw(64, 48, ChannelOrder::Rgb, vec![0; 64 * 48 * 3]).unwrap();
    let tensors = DetectionTensors {
      boxes: vec![-1e8, -1e8, 1e8, 1e8].into(),
      classes: vec![0.0].into(),
      scores: vec![0.9].into(),
      count: 1.0,
    };
    let dets = DetectionDecoder::new(0.5, TensorShape::nhwc(300, 300, 3), 64, 48)
      .decode(&tensors)
      .unwrap();
    assert_eq!(dets.len(), 1);
    let image = renderer.compose(&frame, &dets, &LabelTable::default(), &panel());
    assert_eq!(image.dimensions(), (64, 48 + PANEL_HEIGHT));
  }
}
