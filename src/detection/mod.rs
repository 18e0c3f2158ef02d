// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 由推理阶段独占使用
/// - Detector:  网络前向推理 + 框解码
/// - Smoother:  最近 N 帧输出的时间平均
/// - suppress:  按 objectness 的类别无关 NMS
pub mod detector;
pub mod labels;
pub mod nms;
pub mod ort_backend;
pub mod smoother;
pub mod types;
pub mod yolo;

pub use detector::Detector;
pub use labels::{load_names, ClassHierarchy};
pub use nms::{suppress, DEFAULT_NMS_OVERLAP};
pub use ort_backend::OrtDetector;
pub use smoother::{DetectionSmoother, DEFAULT_SMOOTHING_WINDOW};
pub use types::{BoxXywh, Detection, OutputLayer};
