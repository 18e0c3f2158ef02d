// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg解码过滤器: 视频流 → RGB帧 → 有界通道
/// FFmpeg decode filter feeding RGB frames into a bounded channel
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, info, warn};

/// 最大支持分辨率
const MAX_DIMENSION: u32 = 8192;

pub struct RgbFrameFilter {
    tx: Sender<RgbImage>,
    stop: Arc<AtomicBool>,
    count: usize,
    last: Instant,
    total_frames: usize,
    dropped_frames: usize,
}

impl RgbFrameFilter {
    pub fn new(tx: Sender<RgbImage>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            stop,
            count: 0,
            last: Instant::now(),
            total_frames: 0,
            dropped_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) -> Result<Option<Frame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
        Ok(None)
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.stop.load(Ordering::Relaxed) {
            return Err("frame source closed".to_string());
        }
        self.total_frames += 1;

        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            return self.drop_frame("空帧/损坏帧");
        }

        // SAFETY: 上面已检查指针非空, 帧在本次回调内有效
        let image = unsafe {
            let raw = &*frame.as_ptr();
            let (w, h) = (raw.width as u32, raw.height as u32);
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                return self.drop_frame(&format!("非法分辨率 {}x{}", w, h));
            }

            // 缺少参考帧 / 无效比特流
            if raw.decode_error_flags & 0x03 != 0 {
                return self.drop_frame(&format!("解码错误标志=0x{:02x}", raw.decode_error_flags));
            }

            let planes = [raw.data[0], raw.data[1], raw.data[2]];
            if planes.iter().any(|p| p.is_null()) {
                return self.drop_frame("YUV指针为空");
            }
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                return self.drop_frame(&format!(
                    "步长异常 y_stride={} uv_stride={}",
                    y_stride, uv_stride
                ));
            }

            let mut buffer = vec![0u8; (w * h * 3) as usize];
            yuv420p_to_rgb(
                planes[0],
                planes[1],
                planes[2],
                y_stride,
                uv_stride,
                &mut buffer,
                w as usize,
                h as usize,
            );
            match RgbImage::from_raw(w, h, buffer) {
                Some(image) => image,
                None => return self.drop_frame("RGB缓冲区尺寸不符"),
            }
        };

        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            debug!(
                "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{}",
                self.count as f64 / elapsed,
                self.total_frames,
                self.dropped_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        // 阻塞直到取帧阶段消费; 接收端已关闭则结束解码
        if self.tx.send(image).is_err() {
            return Err("frame receiver dropped".to_string());
        }
        Ok(Some(frame))
    }
}

/// YUV420P → RGB (BT.601 定点近似)
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;
        for x in 0..width {
            let luma = *y_plane.add(y_row + x) as i32;
            let u = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let [r, g, b] = yuv_to_rgb(luma, u, v);
            buffer[out] = r;
            buffer[out + 1] = g;
            buffer[out + 2] = b;
            out += 3;
        }
    }
}

#[inline]
fn yuv_to_rgb(luma: i32, u: i32, v: i32) -> [u8; 3] {
    [
        (luma + ((v * 179) >> 7)).clamp(0, 255) as u8,
        (luma - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u8,
        (luma + ((u * 227) >> 7)).clamp(0, 255) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_maps_to_gray() {
        assert_eq!(yuv_to_rgb(128, 0, 0), [128, 128, 128]);
        assert_eq!(yuv_to_rgb(0, 0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_conversion_saturates() {
        let [r, _, b] = yuv_to_rgb(250, 127, 127);
        assert_eq!(r, 255);
        assert_eq!(b, 255);
    }

    #[test]
    fn test_plane_conversion_uses_half_resolution_chroma() {
        // 2x2 像素, 色度平面 1x1
        let y = [16u8, 16, 235, 235];
        let u = [128u8];
        let v = [128u8];
        let mut rgb = vec![0u8; 12];
        unsafe { yuv420p_to_rgb(y.as_ptr(), u.as_ptr(), v.as_ptr(), 2, 1, &mut rgb, 2, 2) };
        assert_eq!(&rgb[..3], &[16, 16, 16]);
        assert_eq!(&rgb[9..], &[235, 235, 235]);
    }
}
