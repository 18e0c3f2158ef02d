// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::cmp::Ordering;

use super::types::Detection;

/// 默认的 NMS 重叠阈值
pub const DEFAULT_NMS_OVERLAP: f32 = 0.4;

/// 按 objectness 的类别无关 NMS
///
/// 按 objectness 降序排序, 与更高分框 IoU 超过 `overlap` 的框被移除。
/// 已被抑制的框不再参与抑制其他框。
pub fn suppress(detections: &mut Vec<Detection>, overlap: f32) {
    // objectness 为0的框先剔除
    detections.retain(|d| d.objectness > 0.0);
    detections.sort_by(|a, b| {
        b.objectness
            .partial_cmp(&a.objectness)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let mut drop = false;
        for prev in 0..kept {
            if detections[prev].bbox.iou(&detections[index].bbox) > overlap {
                drop = true;
                break;
            }
        }
        if !drop {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
