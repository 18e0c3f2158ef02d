// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 实时检测流水线 (Real-time Detection Pipeline)
///
/// 一个主控线程 + 两个阶段工作线程:
/// - Fetch:   取帧并 letterbox (工作线程)
/// - Infer:   推理 + 平滑 + 解码 + NMS (工作线程)
/// - Display: 叠加检测结果并显示 (主控线程)
///
/// 外层节拍由 `realtime::PeriodicGovernor` 控制。
pub mod context;
pub mod letterbox;
pub mod ring;
pub mod scheduler;
pub mod stage;

pub use context::{AtomicThreshold, PipelineContext, THRESHOLD_STEP};
pub use letterbox::Letterbox;
pub use ring::{FrameSlot, TripleFrameBuffer, RING_DEPTH};
pub use scheduler::{CycleReport, PipelineScheduler, PipelineSettings, StageTimings};
pub use stage::{StageDone, StageJob, StageWorker};

use tracing::info;

use crate::error::Result;
use crate::realtime::{PeriodicGovernor, ReleaseGroup, SchedulingAuthority};
use crate::renderer::PresentationSink;

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Infer,
    Display,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Infer => "infer",
            Stage::Display => "display",
        }
    }
}

/// 一次完整运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub frames: u64,
    pub overruns: u64,
    pub deadline_misses: u64,
    pub skipped_periods: u64,
}

/// 在周期调控下运行流水线: 每个周期边界执行一个周期, 直到 done
///
/// 离开时 (正常结束、退出键、阶段错误) 实时区段的 drop 会把任务放回后台模式。
pub async fn run_governed<A, P>(
    scheduler: &mut PipelineScheduler,
    governor: &mut PeriodicGovernor<A>,
    group: &ReleaseGroup,
    sink: &mut P,
) -> Result<RunSummary>
where
    A: SchedulingAuthority,
    P: PresentationSink,
{
    let mut summary = RunSummary::default();
    let mut section = governor.enter_real_time(group)?;

    while !scheduler.is_done() {
        let tick = section.wait_next_period()?;
        summary.overruns += tick.overran as u64;
        summary.deadline_misses += tick.missed_deadline as u64;
        summary.skipped_periods += tick.skipped;

        scheduler.run_cycle(sink).await?;
        summary.cycles += 1;
    }
    drop(section);

    summary.frames = scheduler.context().frames_fetched();
    info!(
        "🏁 运行结束: {} 周期, {} 帧, 超支 {} 次, 错过截止 {} 次",
        summary.cycles, summary.frames, summary.overruns, summary.deadline_misses
    );
    Ok(summary)
}
