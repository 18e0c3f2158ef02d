// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 启动流程 (两个可执行文件共用)
//!
//! 加载类别 → 构建检测器 → 打开视频源 → 设置周期参数 → 启动调度器 → 建窗口 → 周期运行

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::detection::{load_names, ClassHierarchy, OrtDetector};
use crate::error::PipelineError;
use crate::input::{FfmpegSource, FrameSource};
use crate::pipeline::{run_governed, PipelineScheduler, RunSummary};
use crate::realtime::{PeriodicGovernor, ReleaseGroup, WallClockAuthority};
use crate::renderer::PresentationSink;

/// 日志: 默认 info, RUST_LOG 覆盖
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 已就绪但尚未进入实时模式的流水线
pub struct Prepared {
    pub config: PipelineConfig,
    pub classes: usize,
    pub scheduler: PipelineScheduler,
    pub governor: PeriodicGovernor<WallClockAuthority>,
}

pub fn prepare(config: PipelineConfig) -> anyhow::Result<Prepared> {
    let names = load_names(&config.detector.names)
        .with_context(|| format!("无法加载类别名称 {}", config.detector.names))?;
    let hierarchy = match &config.detector.hierarchy {
        Some(path) => {
            ClassHierarchy::load(path).with_context(|| format!("无法加载类别层级 {}", path))?
        }
        None => ClassHierarchy::flat(names.len()),
    };
    if hierarchy.len() != names.len() {
        bail!(
            "类别层级有 {} 个节点, 类别名称有 {} 个",
            hierarchy.len(),
            names.len()
        );
    }
    let classes = names.len();
    info!("📦 检测模型: {} ({} 类)", config.detector.model, classes);

    let detector = OrtDetector::new(&config.detector, classes, hierarchy)
        .with_context(|| format!("无法加载模型 {}", config.detector.model))?;

    info!("📹 视频源: {}", config.source);
    let source = FfmpegSource::open(&config.source)
        .with_context(|| format!("无法打开视频源 {}", config.source))?;

    // 周期参数在启动工作线程之前设置, 被拒绝时直接退出
    let params = config.task_params(source.nominal_fps())?;
    let mut governor = PeriodicGovernor::new(WallClockAuthority::new());
    governor.configure(params)?;

    let scheduler = PipelineScheduler::start(source, detector, config.settings(names))?;

    Ok(Prepared {
        config,
        classes,
        scheduler,
        governor,
    })
}

pub async fn run<P: PresentationSink>(
    prepared: &mut Prepared,
    sink: &mut P,
) -> anyhow::Result<RunSummary> {
    let display = &prepared.config.display;
    sink.create_window(&display.title, display.width, display.height, display.fullscreen)
        .context("无法创建显示窗口")?;

    let group = ReleaseGroup::solo();
    let summary = run_governed(
        &mut prepared.scheduler,
        &mut prepared.governor,
        &group,
        sink,
    )
    .await?;
    Ok(summary)
}

/// 视频流在第一帧之前就结束时不算失败
pub fn is_clean_exit(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<PipelineError>())
        .any(PipelineError::is_clean_exit)
}
