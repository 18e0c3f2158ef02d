// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLO 输出层解码 (darknet yolo layer 格式)
//!
//! 每层形状 [1, A*(5+C), H, W], 每个锚框的通道依次为 tx, ty, tw, th, obj, cls0..clsC。
//! tx/ty/obj/cls 已经过 sigmoid, tw/th 保持原值。

use ndarray::Axis;

use super::labels::ClassHierarchy;
use super::types::{BoxXywh, Detection, OutputLayer};
use crate::pipeline::letterbox::fit_within;

/// YOLOv3 默认锚框, 按输出层顺序 (stride 32, 16, 8)
pub const YOLOV3_ANCHORS: [[f32; 6]; 3] = [
    [116.0, 90.0, 156.0, 198.0, 373.0, 326.0],
    [30.0, 61.0, 62.0, 45.0, 59.0, 119.0],
    [10.0, 13.0, 16.0, 30.0, 33.0, 23.0],
];

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 对 x, y, obj, cls 通道就地做 sigmoid (w/h 不做)
pub fn activate_layer(layer: &mut OutputLayer, classes: usize) {
    if layer.grid().is_none() {
        return;
    }
    let per_anchor = 5 + classes;
    for (c, mut plane) in layer.data.axis_iter_mut(Axis(1)).enumerate() {
        let k = c % per_anchor;
        if k == 2 || k == 3 {
            continue;
        }
        plane.mapv_inplace(sigmoid);
    }
}

/// 解码参数
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub classes: usize,
    pub net_w: u32,
    pub net_h: u32,
    pub frame_w: u32,
    pub frame_h: u32,
    pub thresh: f32,
    pub hier: f32,
}

/// 解码所有输出层, 坐标换算回原始帧
pub fn decode_layers(
    layers: &[OutputLayer],
    params: &DecodeParams,
    hierarchy: &ClassHierarchy,
) -> Vec<Detection> {
    let mut dets = Vec::new();
    for layer in layers {
        decode_layer(layer, params, hierarchy, &mut dets);
    }
    correct_boxes(&mut dets, params);
    dets
}

fn decode_layer(
    layer: &OutputLayer,
    params: &DecodeParams,
    hierarchy: &ClassHierarchy,
    out: &mut Vec<Detection>,
) {
    let Some((grid_h, grid_w)) = layer.grid() else {
        return;
    };
    let per_anchor = 5 + params.classes;
    let data = &layer.data;
    let channels = data.shape()[1];
    let use_hierarchy = !hierarchy.is_empty();
    let mut scores = vec![0.0f32; params.classes];

    for (n, &(anchor_w, anchor_h)) in layer.anchors.iter().enumerate() {
        let base = n * per_anchor;
        if base + per_anchor > channels {
            break;
        }
        for row in 0..grid_h {
            for col in 0..grid_w {
                let objectness = data[[0, base + 4, row, col]];
                if objectness <= params.thresh {
                    continue;
                }

                let bbox = BoxXywh::new(
                    (col as f32 + data[[0, base, row, col]]) / grid_w as f32,
                    (row as f32 + data[[0, base + 1, row, col]]) / grid_h as f32,
                    data[[0, base + 2, row, col]].exp() * anchor_w / params.net_w as f32,
                    data[[0, base + 3, row, col]].exp() * anchor_h / params.net_h as f32,
                );

                for (j, score) in scores.iter_mut().enumerate() {
                    *score = objectness * data[[0, base + 5 + j, row, col]];
                }
                let prob = scores
                    .iter()
                    .enumerate()
                    .map(|(j, &p)| {
                        let gated = !use_hierarchy || hierarchy.passes(j, &scores, params.hier);
                        if p > params.thresh && gated {
                            p
                        } else {
                            0.0
                        }
                    })
                    .collect();

                out.push(Detection {
                    bbox,
                    prob,
                    objectness,
                });
            }
        }
    }
}

/// 把相对 letterbox 输入的坐标换算为相对原始帧的坐标
fn correct_boxes(dets: &mut [Detection], params: &DecodeParams) {
    let (new_w, new_h) = fit_within(params.frame_w, params.frame_h, params.net_w, params.net_h);
    let net_w = params.net_w as f32;
    let net_h = params.net_h as f32;
    let new_w = new_w as f32;
    let new_h = new_h as f32;

    for det in dets.iter_mut() {
        let b = &mut det.bbox;
        b.x = (b.x - (net_w - new_w) / 2.0 / net_w) / (new_w / net_w);
        b.y = (b.y - (net_h - new_h) / 2.0 / net_h) / (new_h / net_h);
        b.w *= net_w / new_w;
        b.h *= net_h / new_h;
    }
}
