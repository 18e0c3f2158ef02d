// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// 取帧阶段只通过 `FrameSource` 拉帧, 不关心背后是文件、RTSP 还是摄像头
/// - FfmpegSource: ez-ffmpeg 后台解码线程 + 有界通道
/// - RgbFrameFilter: YUV420P → RGB 的帧过滤器
pub mod decode_filter;
pub mod decoder;

pub use decode_filter::RgbFrameFilter;
pub use decoder::FfmpegSource;

use image::RgbImage;

use crate::error::Result;

pub trait FrameSource: Send {
    /// 拉取下一帧; `Ok(None)` 表示流已结束
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// 视频流标称帧率
    fn nominal_fps(&self) -> Option<f64> {
        None
    }

    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn nominal_fps(&self) -> Option<f64> {
        (**self).nominal_fps()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
