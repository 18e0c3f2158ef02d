// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 三缓冲帧环 (Triple Frame Buffer)
//!
//! 3 个原始帧槽 + 3 个 letterbox 槽, 共享一个写游标 `idx`。
//! 每周期:
//! - 取帧阶段写 `idx` 槽
//! - 推理阶段读 `(idx+2)%3` 的 letterbox 槽
//! - 显示阶段读 `(idx+2)%3` 的原始帧槽
//!
//! 写槽和推理槽在派发时整体移交给对应的工作线程, 汇合时归还, 所以槽上没有锁。

use image::RgbImage;

use super::letterbox::Letterbox;
use super::Stage;
use crate::error::{PipelineError, Result};

pub const RING_DEPTH: usize = 3;

/// 移交给取帧阶段的写槽
#[derive(Debug)]
pub struct FrameSlot {
    pub index: usize,
    pub raw: RgbImage,
    pub letterboxed: RgbImage,
}

#[derive(Debug)]
pub struct TripleFrameBuffer {
    raw: [Option<RgbImage>; RING_DEPTH],
    letterboxed: [Option<RgbImage>; RING_DEPTH],
    idx: usize,
}

impl TripleFrameBuffer {
    /// 用启动时同步拉取的第一帧填满三个槽 (槽0持有原帧, 槽1/2为拷贝)
    pub fn seed(first: RgbImage, letterbox: &mut Letterbox) -> Result<Self> {
        let boxed = letterbox.apply(&first)?;
        let (copy1, copy2) = (first.clone(), first.clone());
        Ok(Self {
            raw: [Some(first), Some(copy1), Some(copy2)],
            letterboxed: [Some(boxed.clone()), Some(boxed.clone()), Some(boxed)],
            idx: 0,
        })
    }

    /// `idx = (idx+1) % 3`, 返回新的写游标
    pub fn advance(&mut self) -> usize {
        self.idx = (self.idx + 1) % RING_DEPTH;
        self.idx
    }

    pub fn write_index(&self) -> usize {
        self.idx
    }

    /// 上一周期写完的槽, 显示与推理都读它
    pub fn read_index(&self) -> usize {
        (self.idx + 2) % RING_DEPTH
    }

    /// 取出写槽交给取帧阶段
    pub fn checkout_write(&mut self) -> Result<FrameSlot> {
        let index = self.idx;
        match (self.raw[index].take(), self.letterboxed[index].take()) {
            (Some(raw), Some(letterboxed)) => Ok(FrameSlot {
                index,
                raw,
                letterboxed,
            }),
            (raw, letterboxed) => {
                self.raw[index] = raw;
                self.letterboxed[index] = letterboxed;
                Err(PipelineError::dispatch(
                    Stage::Fetch,
                    format!("写槽 {} 已被移出", index),
                ))
            }
        }
    }

    pub fn checkin_write(&mut self, slot: FrameSlot) {
        self.raw[slot.index] = Some(slot.raw);
        self.letterboxed[slot.index] = Some(slot.letterboxed);
    }

    /// 取出读槽的 letterbox 图像交给推理阶段
    pub fn checkout_detect_input(&mut self) -> Result<RgbImage> {
        let index = self.read_index();
        self.letterboxed[index].take().ok_or_else(|| {
            PipelineError::dispatch(Stage::Infer, format!("推理槽 {} 已被移出", index))
        })
    }

    pub fn checkin_detect_input(&mut self, image: RgbImage) {
        let index = self.read_index();
        self.letterboxed[index] = Some(image);
    }

    /// 显示阶段读取的原始帧
    pub fn display_frame(&self) -> Result<&RgbImage> {
        let index = self.read_index();
        self.raw[index].as_ref().ok_or_else(|| {
            PipelineError::dispatch(Stage::Display, format!("显示槽 {} 为空", index))
        })
    }
}
