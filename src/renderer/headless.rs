// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 无窗口显示: 把检测框画到帧的拷贝上, 按间隔保存 PNG 快照

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info};

use super::{class_color, Key, Overlay, PresentationSink};
use crate::error::{PipelineError, Result};

pub struct HeadlessSink {
    classes: usize,
    font: Option<FontVec>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
    presented: u64,
}

impl HeadlessSink {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            font: None,
            snapshot_dir: None,
            snapshot_every: 1,
            presented: 0,
        }
    }

    /// 每 `every` 帧保存一张快照到 `dir`
    pub fn with_snapshots(mut self, dir: impl Into<PathBuf>, every: u64) -> Self {
        self.snapshot_dir = Some(dir.into());
        self.snapshot_every = every.max(1);
        self
    }

    /// 加载标签字体; 没有字体时只画框
    pub fn with_font(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            PipelineError::PresentationInit(format!("无法读取字体 {}: {}", path.display(), e))
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|e| {
            PipelineError::PresentationInit(format!("字体无效 {}: {}", path.display(), e))
        })?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// 把叠加层画到图像上
    pub fn render(&self, frame: &RgbImage, overlay: &Overlay) -> RgbImage {
        let mut canvas = frame.clone();
        let (w, h) = canvas.dimensions();
        let thickness = (h as i32 / 240).max(1);

        for b in &overlay.boxes {
            let color = Rgb(class_color(b.class_id, self.classes));
            for t in 0..thickness {
                let left = (b.left + t).min(w as i32 - 1);
                let top = (b.top + t).min(h as i32 - 1);
                let width = (b.right - b.left - 2 * t).max(1) as u32;
                let height = (b.bottom - b.top - 2 * t).max(1) as u32;
                draw_hollow_rect_mut(&mut canvas, Rect::at(left, top).of_size(width, height), color);
            }
            if let Some(font) = &self.font {
                let y = (b.top - 18).max(0);
                draw_text_mut(&mut canvas, color, b.left, y, PxScale::from(16.0), font, &b.label);
            }
        }

        if let Some(font) = &self.font {
            draw_text_mut(
                &mut canvas,
                Rgb([255, 255, 0]),
                8,
                8,
                PxScale::from(18.0),
                font,
                &overlay.hud.text(),
            );
        }
        canvas
    }
}

impl PresentationSink for HeadlessSink {
    fn create_window(
        &mut self,
        title: &str,
        width: u32,
        height: u32,
        _fullscreen: bool,
    ) -> Result<()> {
        if let Some(dir) = &self.snapshot_dir {
            fs::create_dir_all(dir).map_err(|e| {
                PipelineError::PresentationInit(format!("无法创建快照目录 {}: {}", dir.display(), e))
            })?;
            info!("📷 {} 无窗口模式 ({}x{}), 快照目录: {}", title, width, height, dir.display());
        } else {
            info!("📷 {} 无窗口模式 ({}x{})", title, width, height);
        }
        Ok(())
    }

    async fn present(&mut self, frame: &RgbImage, overlay: &Overlay) -> Result<Option<Key>> {
        self.presented += 1;

        // 只有要保存快照的帧才需要叠加
        if let Some(dir) = &self.snapshot_dir {
            if self.presented % self.snapshot_every == 0 {
                let path = dir.join(format!("frame_{:06}.png", self.presented));
                self.render(frame, overlay).save(&path).map_err(|e| {
                    PipelineError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("保存快照失败 {}: {}", path.display(), e),
                    ))
                })?;
                debug!("💾 快照: {}", path.display());
            }
        }
        Ok(None)
    }
}
