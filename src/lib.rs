// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 软实时目标检测流水线
//!
//! 三缓冲帧环 + 取帧/推理/显示三阶段并行 + 周期任务调控。

pub mod config; // 命令行 + JSON 配置
pub mod detection; // 检测器、平滑、解码、NMS
pub mod error; // 错误类型
pub mod input; // 视频输入
pub mod launch; // 启动流程
pub mod pipeline; // 帧环与阶段调度
pub mod realtime; // 周期任务调控
pub mod renderer; // 显示输出

pub use crate::config::{Args, PipelineConfig};
pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::{run_governed, PipelineScheduler, PipelineSettings, RunSummary};
pub use crate::realtime::{PeriodicGovernor, PeriodicTaskParams, ReleaseGroup, WallClockAuthority};
