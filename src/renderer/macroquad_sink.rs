// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! macroquad 窗口显示
//!
//! 必须在 `#[macroquad::main]` 的主线程上使用。

use image::RgbImage;
use macroquad::prelude::*;
use tracing::info;

use super::{class_color, Key, Overlay, PresentationSink};
use crate::error::{PipelineError, Result};

pub struct MacroquadSink {
    texture: Option<Texture2D>,
    rgba: Vec<u8>,
    classes: usize,
}

impl MacroquadSink {
    pub fn new(classes: usize) -> Self {
        Self {
            texture: None,
            rgba: Vec::new(),
            classes,
        }
    }

    fn upload(&mut self, frame: &RgbImage) -> Result<()> {
        let (w, h) = frame.dimensions();
        if w > u16::MAX as u32 || h > u16::MAX as u32 {
            return Err(PipelineError::PresentationInit(format!(
                "帧尺寸 {}x{} 超出纹理上限",
                w, h
            )));
        }

        self.rgba.clear();
        self.rgba.reserve((w * h * 4) as usize);
        for p in frame.pixels() {
            self.rgba.extend_from_slice(&[p[0], p[1], p[2], 255]);
        }

        // 只在分辨率变化时重建纹理
        let rebuild = match &self.texture {
            Some(tex) => tex.width() != w as f32 || tex.height() != h as f32,
            None => true,
        };
        if rebuild {
            let texture = Texture2D::from_rgba8(w as u16, h as u16, &self.rgba);
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            let img = Image {
                bytes: std::mem::take(&mut self.rgba),
                width: w as u16,
                height: h as u16,
            };
            tex.update(&img);
            self.rgba = img.bytes;
        }
        Ok(())
    }
}

fn map_key(code: KeyCode) -> Key {
    match code {
        KeyCode::Escape => Key::Escape,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        other => Key::Other(other as u32),
    }
}

impl PresentationSink for MacroquadSink {
    fn create_window(
        &mut self,
        title: &str,
        width: u32,
        height: u32,
        fullscreen: bool,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::PresentationInit(format!(
                "窗口尺寸无效: {}x{}",
                width, height
            )));
        }
        request_new_screen_size(width as f32, height as f32);
        set_fullscreen(fullscreen);
        // 关闭窗口按退出键处理
        prevent_quit();
        info!("🖥️ 窗口: {} ({}x{}{})", title, width, height, if fullscreen { ", 全屏" } else { "" });
        Ok(())
    }

    async fn present(&mut self, frame: &RgbImage, overlay: &Overlay) -> Result<Option<Key>> {
        self.upload(frame)?;
        clear_background(BLACK);

        if let Some(texture) = &self.texture {
            let scale_x = screen_width() / texture.width();
            let scale_y = screen_height() / texture.height();
            draw_texture_ex(
                texture,
                0.0,
                0.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(screen_width(), screen_height())),
                    ..Default::default()
                },
            );

            for b in &overlay.boxes {
                let [r, g, bl] = class_color(b.class_id, self.classes);
                let color = Color::from_rgba(r, g, bl, 255);
                let x1 = b.left as f32 * scale_x;
                let y1 = b.top as f32 * scale_y;
                let x2 = b.right as f32 * scale_x;
                let y2 = b.bottom as f32 * scale_y;
                draw_rectangle_lines(x1, y1, x2 - x1, y2 - y1, 3.0, color);
                draw_text(&b.label, x1, (y1 - 5.0).max(16.0), 20.0, color);
            }
        }

        draw_text(&overlay.hud.text(), 10.0, 24.0, 24.0, YELLOW);

        next_frame().await;

        if is_quit_requested() {
            return Ok(Some(Key::Escape));
        }
        Ok(get_last_key_pressed().map(map_key))
    }
}
