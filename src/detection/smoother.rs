// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测平滑器 (Detection Smoother)
//!
//! 保存最近 N 帧的检测器原始输出, 取逐元素平均值后写回输出层,
//! 后续的框解码就在平滑后的得分上进行, 抑制单帧抖动。
//!
//! 启动后前 N-1 个周期, 还没写入的位置是全零, 会拉低平均值。这是接受的行为。

use super::types::OutputLayer;
use crate::error::{PipelineError, Result};

/// 默认平滑窗口
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

#[derive(Debug, Clone)]
pub struct DetectionSmoother {
    ring: Vec<Vec<f32>>,
    average: Vec<f32>,
    cursor: usize,
}

impl DetectionSmoother {
    /// `window` 个位置, 每个长度 `total` (所有输出层元素总数), 启动时一次性分配
    pub fn new(window: usize, total: usize) -> Result<Self> {
        if window == 0 {
            return Err(PipelineError::Config("平滑窗口必须 >= 1".to_string()));
        }
        Ok(Self {
            ring: vec![vec![0.0; total]; window],
            average: vec![0.0; total],
            cursor: 0,
        })
    }

    pub fn window(&self) -> usize {
        self.ring.len()
    }

    pub fn total(&self) -> usize {
        self.average.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 按层顺序拼接各输出层, 写入当前位置, 然后游标前进
    pub fn remember(&mut self, layers: &[OutputLayer]) -> Result<()> {
        let total: usize = layers.iter().map(OutputLayer::len).sum();
        if total != self.total() {
            return Err(PipelineError::DecodeStage(format!(
                "输出层尺寸 {} 与平滑缓冲区 {} 不一致",
                total,
                self.total()
            )));
        }

        let slot = &mut self.ring[self.cursor];
        let mut offset = 0;
        for layer in layers {
            for (dst, src) in slot[offset..offset + layer.len()]
                .iter_mut()
                .zip(layer.data.iter())
            {
                *dst = *src;
            }
            offset += layer.len();
        }
        self.cursor = (self.cursor + 1) % self.ring.len();
        Ok(())
    }

    /// 直接写入一个拼接好的得分向量
    pub fn remember_scores(&mut self, scores: &[f32]) -> Result<()> {
        if scores.len() != self.total() {
            return Err(PipelineError::DecodeStage(format!(
                "得分向量长度 {} 与平滑缓冲区 {} 不一致",
                scores.len(),
                self.total()
            )));
        }
        self.ring[self.cursor].copy_from_slice(scores);
        self.cursor = (self.cursor + 1) % self.ring.len();
        Ok(())
    }

    /// 重新计算 N 个位置的平均值
    pub fn average(&mut self) -> &[f32] {
        let scale = 1.0 / self.ring.len() as f32;
        self.average.iter_mut().for_each(|v| *v = 0.0);
        for scores in &self.ring {
            for (avg, s) in self.average.iter_mut().zip(scores) {
                *avg += scale * s;
            }
        }
        &self.average
    }

    /// 计算平均值并写回输出层
    pub fn average_into(&mut self, layers: &mut [OutputLayer]) -> Result<()> {
        let total: usize = layers.iter().map(OutputLayer::len).sum();
        if total != self.total() {
            return Err(PipelineError::DecodeStage(format!(
                "输出层尺寸 {} 与平滑缓冲区 {} 不一致",
                total,
                self.total()
            )));
        }
        self.average();

        let mut offset = 0;
        for layer in layers.iter_mut() {
            let len = layer.len();
            for (dst, src) in layer
                .data
                .iter_mut()
                .zip(&self.average[offset..offset + len])
            {
                *dst = *src;
            }
            offset += len;
        }
        Ok(())
    }
}
