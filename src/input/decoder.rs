// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg 视频源
/// Video file / RTSP / camera source decoded by ez-ffmpeg on a background thread
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{info, warn};

use super::decode_filter::RgbFrameFilter;
use super::FrameSource;
use crate::error::{PipelineError, Result};

/// 解码线程与取帧阶段之间的缓冲深度
const CHANNEL_DEPTH: usize = 2;

pub struct FfmpegSource {
    uri: String,
    fps: Option<f64>,
    rx: Option<Receiver<RgbImage>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl FfmpegSource {
    /// 打开视频源并启动解码线程
    pub fn open(uri: &str) -> Result<Self> {
        let fps = match find_video_stream_info(uri) {
            Ok(Some(StreamInfo::Video { fps, .. })) if fps > 0.0 => Some(fps as f64),
            Ok(_) => {
                warn!("⚠️ 无法获取 {} 的帧率", uri);
                None
            }
            Err(e) => {
                return Err(PipelineError::SourceUnavailable(format!("{}: {}", uri, e)));
            }
        };

        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let filter = RgbFrameFilter::new(tx, Arc::clone(&stop));

        let input = if uri.starts_with("rtsp://") {
            Input::new(uri).set_input_opts(
                [("rtsp_transport", "tcp"), ("rtsp_flags", "prefer_tcp")].into(),
            )
        } else {
            Input::new(uri)
        };

        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("rgb", Box::new(filter));
        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc("format=yuv420p")
            .output(create_null_output().add_frame_pipeline(pipe))
            .build()
            .map_err(|e| PipelineError::SourceUnavailable(format!("构建失败: {}", e)))?;

        let closed = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                let sch = ctx
                    .start()
                    .map_err(|e| PipelineError::SourceUnavailable(format!("启动失败: {}", e)))?;
                match sch.wait() {
                    // close() 主动中止的不算错误
                    Err(e) if !closed.load(Ordering::Relaxed) => {
                        Err(PipelineError::SourceUnavailable(format!("解码失败: {}", e)))
                    }
                    _ => Ok(()),
                }
            })?;

        info!(
            "🎬 视频源已打开: {} ({})",
            uri,
            fps.map(|f| format!("{:.2}fps", f))
                .unwrap_or_else(|| "帧率未知".to_string())
        );

        Ok(Self {
            uri: uri.to_string(),
            fps,
            rx: Some(rx),
            stop,
            handle: Some(handle),
        })
    }

    fn join_decoder(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                PipelineError::SourceUnavailable(format!("{} 解码线程崩溃", self.uri))
            })?,
            None => Ok(()),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(_) => {
                // 发送端已关闭: 解码结束或失败
                self.rx = None;
                self.join_decoder()?;
                info!("📭 视频流结束: {}", self.uri);
                Ok(None)
            }
        }
    }

    fn nominal_fps(&self) -> Option<f64> {
        self.fps
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // 先丢弃接收端, 解除过滤器的阻塞发送
        self.rx = None;
        if let Err(e) = self.join_decoder() {
            warn!("⚠️ 关闭视频源: {}", e);
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}
