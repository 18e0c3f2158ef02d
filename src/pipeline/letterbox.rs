// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Letterbox: 保持宽高比缩放到网络输入尺寸, 居中, 四周填充中灰色 (127)

use fast_image_resize as fr;
use image::{imageops, Rgb, RgbImage};

use crate::error::Result;

pub const PAD_VALUE: u8 = 127;

/// 保持宽高比放进 dst_w x dst_h 后的内容尺寸 (整数除法, 与框坐标还原共用)
pub fn fit_within(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (dst_w, dst_h);
    }
    let (new_w, new_h) = if (dst_w as f32 / src_w as f32) < (dst_h as f32 / src_h as f32) {
        (dst_w, (src_h as u64 * dst_w as u64 / src_w as u64) as u32)
    } else {
        ((src_w as u64 * dst_h as u64 / src_h as u64) as u32, dst_h)
    };
    (new_w.max(1), new_h.max(1))
}

pub struct Letterbox {
    width: u32,
    height: u32,
    resizer: fr::Resizer,
    options: fr::ResizeOptions,
    scaled: Vec<u8>,
}

impl Letterbox {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resizer: fr::Resizer::new(),
            options: fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            scaled: Vec::new(),
        }
    }

    /// 内容区域 (偏移x, 偏移y, 宽, 高)
    pub fn geometry(&self, src_w: u32, src_h: u32) -> (u32, u32, u32, u32) {
        let (new_w, new_h) = fit_within(src_w, src_h, self.width, self.height);
        (
            (self.width - new_w) / 2,
            (self.height - new_h) / 2,
            new_w,
            new_h,
        )
    }

    pub fn apply(&mut self, src: &RgbImage) -> Result<RgbImage> {
        let mut dst = RgbImage::new(self.width, self.height);
        self.apply_into(src, &mut dst)?;
        Ok(dst)
    }

    /// 写入已有的目标图像; 尺寸不对时重新分配
    pub fn apply_into(&mut self, src: &RgbImage, dst: &mut RgbImage) -> Result<()> {
        if dst.dimensions() != (self.width, self.height) {
            *dst = RgbImage::new(self.width, self.height);
        }
        for p in dst.pixels_mut() {
            *p = Rgb([PAD_VALUE; 3]);
        }

        let (off_x, off_y, new_w, new_h) = self.geometry(src.width(), src.height());
        let src_ref =
            fr::images::ImageRef::new(src.width(), src.height(), src.as_raw(), fr::PixelType::U8x3)?;

        let mut buf = std::mem::take(&mut self.scaled);
        buf.resize((new_w * new_h * 3) as usize, 0);
        let mut scaled = fr::images::Image::from_vec_u8(new_w, new_h, buf, fr::PixelType::U8x3)?;
        self.resizer.resize(&src_ref, &mut scaled, Some(&self.options))?;

        let scaled = RgbImage::from_raw(new_w, new_h, scaled.into_vec()).ok_or_else(|| {
            crate::error::PipelineError::DecodeStage("letterbox缓冲区尺寸不符".to_string())
        })?;
        imageops::replace(dst, &scaled, off_x as i64, off_y as i64);
        self.scaled = scaled.into_raw();
        Ok(())
    }
}
