// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 窗口实时检测 (macroquad)
///
/// 取帧/推理在工作线程, 显示在 macroquad 主线程, 外层按周期节拍运行。
/// Esc 退出, ↑/↓ 调整置信度阈值, ←/→ 调整层级阈值。
///
/// cargo run --bin rt-demo --release -- -s video.mp4 -m models/yolov3.onnx
use anyhow::Context;
use clap::Parser;
use macroquad::window::Conf;
use mimalloc::MiMalloc;
use tracing::info;
use yolo_rt::config::{Args, DisplayConfig, PipelineConfig};
use yolo_rt::launch;
use yolo_rt::renderer::MacroquadSink;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn window_conf() -> Conf {
    let args = Args::parse();
    let display = PipelineConfig::from_args(&args)
        .map(|config| config.display)
        .unwrap_or_else(|_| DisplayConfig::default());
    Conf {
        window_title: display.title,
        window_width: display.width as i32,
        window_height: display.height as i32,
        fullscreen: display.fullscreen,
        high_dpi: true,
        ..Default::default()
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PipelineConfig::from_args(&args).context("配置无效")?;

    let mut prepared = launch::prepare(config)?;
    let mut sink = MacroquadSink::new(prepared.classes);
    let summary = launch::run(&mut prepared, &mut sink).await?;

    info!(
        "✅ 共 {} 个周期, 跳过周期边界 {} 次",
        summary.cycles, summary.skipped_periods
    );
    Ok(())
}

#[macroquad::main(window_conf)]
async fn main() {
    launch::init_tracing();

    if let Err(err) = run().await {
        if launch::is_clean_exit(&err) {
            info!("📭 视频流为空, 退出");
            return;
        }
        eprintln!("❌ {:#}", err);
        std::process::exit(1);
    }
}
