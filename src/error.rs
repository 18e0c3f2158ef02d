// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线错误类型
//! Pipeline error taxonomy
//!
//! 所有错误都直接上抛到主控循环并终止进程,不做重试:
//! 实时流中跳帧继续会破坏周期节拍。

use thiserror::Error;

use crate::pipeline::Stage;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// 视频流结束 (正常退出,不是故障)
    #[error("视频流已结束")]
    SourceExhausted,

    #[error("视频源不可用: {0}")]
    SourceUnavailable(String),

    #[error("周期任务参数被拒绝: {0}")]
    SchedulingConfig(String),

    #[error("任务超出执行预算: 耗时 {used_ms:.1}ms > 预算 {budget_ms:.1}ms")]
    BudgetExceeded { used_ms: f64, budget_ms: f64 },

    #[error("窗口/渲染器创建失败: {0}")]
    PresentationInit(String),

    #[error("检测阶段失败: {0}")]
    DecodeStage(String),

    #[error("{stage:?} 阶段派发失败: {reason}")]
    Dispatch { stage: Stage, reason: String },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// 流结束是干净退出,其余都是致命错误
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, PipelineError::SourceExhausted)
    }

    pub(crate) fn dispatch(stage: Stage, reason: impl Into<String>) -> Self {
        PipelineError::Dispatch {
            stage,
            reason: reason.into(),
        }
    }
}

impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        PipelineError::DecodeStage(format!("ONNX Runtime: {}", err))
    }
}

impl From<fast_image_resize::ResizeError> for PipelineError {
    fn from(err: fast_image_resize::ResizeError) -> Self {
        PipelineError::DecodeStage(format!("letterbox缩放失败: {}", err))
    }
}

impl From<fast_image_resize::ImageBufferError> for PipelineError {
    fn from(err: fast_image_resize::ImageBufferError) -> Self {
        PipelineError::DecodeStage(format!("letterbox缓冲区错误: {}", err))
    }
}
