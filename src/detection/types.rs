// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果类型

use ndarray::ArrayD;

/// 中心点格式的边框, 坐标归一化到原始帧 (0..1)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoxXywh {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoxXywh {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn left(&self) -> f32 {
        self.x - self.w / 2.0
    }

    pub fn right(&self) -> f32 {
        self.x + self.w / 2.0
    }

    pub fn top(&self) -> f32 {
        self.y - self.h / 2.0
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h / 2.0
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn intersection_area(&self, other: &BoxXywh) -> f32 {
        let w = self.right().min(other.right()) - self.left().max(other.left());
        let h = self.bottom().min(other.bottom()) - self.top().max(other.top());
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        w * h
    }

    pub fn iou(&self, other: &BoxXywh) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// 映射到像素坐标 (left, top, right, bottom), 裁剪到画面内
    pub fn to_pixels(&self, width: u32, height: u32) -> (i32, i32, i32, i32) {
        let w = width as f32;
        let h = height as f32;
        let clamp = |v: f32, max: f32| v.max(0.0).min(max - 1.0) as i32;
        (
            clamp(self.left() * w, w),
            clamp(self.top() * h, h),
            clamp(self.right() * w, w),
            clamp(self.bottom() * h, h),
        )
    }
}

/// 单个检测目标
///
/// 每周期由平滑后的得分重新生成, 抑制之后不再修改, 渲染完即丢弃。
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoxXywh,
    /// 每个类别的概率 (objectness * class score), 低于阈值的置 0
    pub prob: Vec<f32>,
    pub objectness: f32,
}

impl Detection {
    /// 超过阈值的所有类别
    pub fn classes_above(&self, thresh: f32) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.prob
            .iter()
            .copied()
            .enumerate()
            .filter(move |(_, p)| *p > thresh)
    }
}

/// 检测器的一个输出层: 输出张量 + 解码所需的元数据
#[derive(Debug, Clone)]
pub struct OutputLayer {
    pub name: String,
    /// NCHW: [1, anchors * (5 + classes), grid_h, grid_w]
    pub data: ArrayD<f32>,
    /// 该层使用的锚框 (像素, 相对网络输入)
    pub anchors: Vec<(f32, f32)>,
}

impl OutputLayer {
    pub fn new(name: impl Into<String>, data: ArrayD<f32>, anchors: Vec<(f32, f32)>) -> Self {
        Self {
            name: name.into(),
            data,
            anchors,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// (grid_h, grid_w); 形状不是4维时返回 None
    pub fn grid(&self) -> Option<(usize, usize)> {
        match self.data.shape() {
            [_, _, h, w] => Some((*h, *w)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoxXywh::new(0.5, 0.5, 0.2, 0.2);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = BoxXywh::new(0.1, 0.1, 0.1, 0.1);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BoxXywh::new(0.5, 0.5, 0.2, 0.2);
        let b = BoxXywh::new(0.6, 0.5, 0.2, 0.2);
        // 交集 0.1*0.2, 并集 0.04+0.04-0.02
        assert!((a.iou(&b) - 0.02 / 0.06).abs() < 1e-5);
    }

    #[test]
    fn test_to_pixels_clamps() {
        let b = BoxXywh::new(0.05, 0.5, 0.2, 0.2);
        let (l, t, r, btm) = b.to_pixels(100, 50);
        assert_eq!(l, 0);
        assert_eq!(t, 20);
        assert_eq!(r, 15);
        assert_eq!(btm, 30);
    }
}
