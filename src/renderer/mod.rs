// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 显示系统 (Presentation)
///
/// 显示阶段在主控线程上运行, 通过 `PresentationSink` 输出画面并读取按键
/// - MacroquadSink: macroquad 窗口 (GPU纹理)
/// - HeadlessSink:  无窗口, imageproc 叠加后可选保存 PNG 快照
pub mod headless;
pub mod macroquad_sink;

pub use headless::HeadlessSink;
pub use macroquad_sink::MacroquadSink;

use image::RgbImage;

use crate::detection::Detection;
use crate::error::Result;

/// 显示阶段返回的按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Up,
    Down,
    Left,
    Right,
    Other(u32),
}

impl Key {
    /// 解码原始按键码 (先按 256 取模); -1 表示没有按键
    pub fn from_code(code: i32) -> Option<Key> {
        if code < 0 {
            return None;
        }
        Some(match code % 256 {
            27 => Key::Escape,
            81 => Key::Left,
            82 => Key::Up,
            83 => Key::Right,
            84 => Key::Down,
            other => Key::Other(other as u32),
        })
    }
}

/// 一个待绘制的检测框 (像素坐标)
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub class_id: usize,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hud {
    pub fps: f32,
    pub thresh: f32,
    pub hier: f32,
}

impl Hud {
    pub fn text(&self) -> String {
        format!(
            "FPS:{:.1}  thresh:{:.2}  hier:{:.2}",
            self.fps, self.thresh, self.hier
        )
    }
}

/// 叠加到显示帧上的内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    pub boxes: Vec<OverlayBox>,
    pub hud: Hud,
}

impl Overlay {
    /// 每个检测框的标签是所有超过阈值的类别名, 颜色取第一个类别
    pub fn build(
        detections: &[Detection],
        frame_w: u32,
        frame_h: u32,
        names: &[String],
        thresh: f32,
        hud: Hud,
    ) -> Self {
        let boxes = detections
            .iter()
            .filter_map(|det| {
                let mut classes = det.classes_above(thresh).peekable();
                let (class_id, _) = *classes.peek()?;
                let label = classes
                    .map(|(id, _)| names.get(id).cloned().unwrap_or_else(|| id.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let (left, top, right, bottom) = det.bbox.to_pixels(frame_w, frame_h);
                Some(OverlayBox {
                    left,
                    top,
                    right,
                    bottom,
                    class_id,
                    label,
                })
            })
            .collect();
        Self { boxes, hud }
    }
}

/// 类别颜色 (RGB)
pub fn class_color(class_id: usize, classes: usize) -> [u8; 3] {
    const PALETTE: [[f32; 3]; 6] = [
        [1.0, 0.0, 1.0],
        [0.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
        [1.0, 0.0, 0.0],
    ];
    let offset = (class_id * 123457) % classes.max(1);
    let channel = |c: usize| {
        let ratio = offset as f32 / classes.max(1) as f32 * 5.0;
        let i = ratio.floor() as usize;
        let j = (i + 1).min(5);
        let frac = ratio - i as f32;
        let v = (1.0 - frac) * PALETTE[i.min(5)][c] + frac * PALETTE[j][c];
        (v * 255.0) as u8
    };
    [channel(2), channel(1), channel(0)]
}

#[allow(async_fn_in_trait)]
pub trait PresentationSink {
    /// 创建窗口 / 输出目标
    fn create_window(&mut self, title: &str, width: u32, height: u32, fullscreen: bool)
        -> Result<()>;

    /// 显示一帧并叠加检测结果, 返回本帧读到的按键
    async fn present(&mut self, frame: &RgbImage, overlay: &Overlay) -> Result<Option<Key>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoxXywh;

    #[test]
    fn test_key_codes() {
        assert_eq!(Key::from_code(-1), None);
        assert_eq!(Key::from_code(27), Some(Key::Escape));
        assert_eq!(Key::from_code(82), Some(Key::Up));
        assert_eq!(Key::from_code(84), Some(Key::Down));
        assert_eq!(Key::from_code(83), Some(Key::Right));
        assert_eq!(Key::from_code(81), Some(Key::Left));
        // 高位被掩掉
        assert_eq!(Key::from_code(65536 + 82), Some(Key::Up));
        assert_eq!(Key::from_code(97), Some(Key::Other(97)));
    }

    #[test]
    fn test_overlay_joins_labels_above_threshold() {
        let names = vec!["person".to_string(), "dog".to_string(), "cat".to_string()];
        let dets = vec![
            Detection {
                bbox: BoxXywh::new(0.5, 0.5, 0.5, 0.5),
                prob: vec![0.9, 0.0, 0.6],
                objectness: 0.9,
            },
            Detection {
                bbox: BoxXywh::new(0.2, 0.2, 0.1, 0.1),
                prob: vec![0.1, 0.0, 0.0],
                objectness: 0.7,
            },
        ];
        let overlay = Overlay::build(&dets, 100, 100, &names, 0.5, Hud::default());
        assert_eq!(overlay.boxes.len(), 1);
        let b = &overlay.boxes[0];
        assert_eq!(b.label, "person, cat");
        assert_eq!(b.class_id, 0);
        assert_eq!((b.left, b.top, b.right, b.bottom), (25, 25, 75, 75));
    }

    #[test]
    fn test_class_colors_differ() {
        assert_ne!(class_color(0, 80), class_color(1, 80));
    }
}
