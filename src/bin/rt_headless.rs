// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 无窗口实时检测
///
/// 与 rt-demo 相同的周期流水线, 显示阶段换成 HeadlessSink:
/// 检测框画到帧的拷贝上, 指定 --snapshot-dir 时按间隔保存 PNG。
///
/// cargo run --bin rt-headless --release -- -s video.mp4 --snapshot-dir out --max-frames 300
use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::info;
use yolo_rt::config::{Args, PipelineConfig};
use yolo_rt::launch;
use yolo_rt::renderer::HeadlessSink;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PipelineConfig::from_args(&args).context("配置无效")?;

    let mut prepared = launch::prepare(config)?;
    let display = &prepared.config.display;
    let mut sink = HeadlessSink::new(prepared.classes);
    if let Some(dir) = &display.snapshot_dir {
        sink = sink.with_snapshots(dir, display.snapshot_every);
    }
    if let Some(font) = &display.font {
        sink = sink.with_font(font).context("无法加载字体")?;
    }

    let summary = pollster::block_on(launch::run(&mut prepared, &mut sink))?;
    info!(
        "✅ 共 {} 个周期, {} 帧, 输出 {} 帧",
        summary.cycles,
        summary.frames,
        sink.presented()
    );
    Ok(())
}

fn main() {
    launch::init_tracing();

    if let Err(err) = run() {
        if launch::is_clean_exit(&err) {
            info!("📭 视频流为空, 退出");
            return;
        }
        eprintln!("❌ {:#}", err);
        std::process::exit(1);
    }
}
