// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器接口 (Detector)
//!
//! 推理阶段只通过这个 trait 使用检测器:
//! letterbox 图像 → predict (写入输出层) → 平滑 → decode_boxes

use image::RgbImage;

use super::types::{Detection, OutputLayer};
use crate::error::Result;

pub trait Detector: Send {
    /// 网络输入尺寸 (宽, 高)
    fn input_size(&self) -> (u32, u32);

    fn class_count(&self) -> usize;

    /// 前向推理, 结果写入内部输出层
    fn predict(&mut self, input: &RgbImage) -> Result<()>;

    /// 输出层 (按固定顺序)
    fn output_layers(&self) -> &[OutputLayer];

    fn output_layers_mut(&mut self) -> &mut [OutputLayer];

    /// 从当前输出层解码检测框, 坐标换算到 frame_w x frame_h 的原始帧
    fn decode_boxes(&self, frame_w: u32, frame_h: u32, thresh: f32, hier: f32) -> Vec<Detection>;

    /// 所有输出层元素总数 (平滑缓冲区长度)
    fn total_outputs(&self) -> usize {
        self.output_layers().iter().map(OutputLayer::len).sum()
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn class_count(&self) -> usize {
        (**self).class_count()
    }

    fn predict(&mut self, input: &RgbImage) -> Result<()> {
        (**self).predict(input)
    }

    fn output_layers(&self) -> &[OutputLayer] {
        (**self).output_layers()
    }

    fn output_layers_mut(&mut self) -> &mut [OutputLayer] {
        (**self).output_layers_mut()
    }

    fn decode_boxes(&self, frame_w: u32, frame_h: u32, thresh: f32, hier: f32) -> Vec<Detection> {
        (**self).decode_boxes(frame_w, frame_h, thresh, hier)
    }
}
