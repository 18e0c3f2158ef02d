// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线调度器 (Pipeline Scheduler)
//!
//! 一个周期 = 取帧 + 推理 + 显示:
//! 1. 写游标前进
//! 2. 把写槽派发给取帧线程, 把上一帧的 letterbox 图像派发给推理线程
//! 3. 主控线程上显示读槽, 叠加上一周期的检测结果
//! 4. 汇合两个工作线程, 归还槽位, 处理按键

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::context::PipelineContext;
use super::letterbox::Letterbox;
use super::ring::TripleFrameBuffer;
use super::stage::{FetchOutcome, FetchStage, InferStage, StageDone, StageJob, StageWorker};
use super::Stage;
use crate::detection::{Detection, DetectionSmoother, Detector, DEFAULT_NMS_OVERLAP};
use crate::error::{PipelineError, Result};
use crate::input::FrameSource;
use crate::renderer::{Hud, Key, Overlay, PresentationSink};

/// 调度器运行参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub thresh: f32,
    pub hier: f32,
    pub nms_overlap: f32,
    pub smoothing_window: usize,
    pub max_frames: Option<u64>,
    pub names: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            thresh: 0.5,
            hier: 0.5,
            nms_overlap: DEFAULT_NMS_OVERLAP,
            smoothing_window: crate::detection::DEFAULT_SMOOTHING_WINDOW,
            max_frames: None,
            names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub fetch: Duration,
    pub infer: Duration,
    pub display: Duration,
}

/// 每个周期的执行报告
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub write_index: usize,
    pub read_index: usize,
    pub key: Option<Key>,
    pub fetched: bool,
    pub detections: usize,
    pub timings: StageTimings,
}

pub struct PipelineScheduler {
    ctx: Arc<PipelineContext>,
    ring: TripleFrameBuffer,
    fetch: StageWorker,
    infer: StageWorker,
    /// 上一周期推理的结果, 汇合之后才替换
    latest: Arc<Vec<Detection>>,
    names: Arc<[String]>,
    last_cycle_start: Instant,
    stats_last: Instant,
    stats_cycles: u64,
}

impl PipelineScheduler {
    /// 同步拉取第一帧填满帧环, 然后启动取帧/推理工作线程
    pub fn start<S, D>(mut source: S, detector: D, settings: PipelineSettings) -> Result<Self>
    where
        S: FrameSource + 'static,
        D: Detector + 'static,
    {
        if !settings.names.is_empty() && settings.names.len() != detector.class_count() {
            return Err(PipelineError::Config(format!(
                "类别名称有 {} 个, 检测器输出 {} 类",
                settings.names.len(),
                detector.class_count()
            )));
        }

        let first = source.next_frame()?.ok_or(PipelineError::SourceExhausted)?;
        let (net_w, net_h) = detector.input_size();
        let mut letterbox = Letterbox::new(net_w, net_h);
        let ring = TripleFrameBuffer::seed(first, &mut letterbox)?;

        let ctx = Arc::new(PipelineContext::new(
            settings.thresh,
            settings.hier,
            settings.max_frames,
        ));
        ctx.record_frame();

        let smoother = DetectionSmoother::new(settings.smoothing_window, detector.total_outputs())?;
        let names: Arc<[String]> = settings.names.into();

        let fetch = StageWorker::spawn(
            Stage::Fetch,
            FetchStage::new(source, letterbox, Arc::clone(&ctx)),
        )?;
        let infer = StageWorker::spawn(
            Stage::Infer,
            InferStage::new(
                detector,
                smoother,
                Arc::clone(&ctx),
                Arc::clone(&names),
                settings.nms_overlap,
            ),
        )?;

        info!(
            "🚀 流水线启动: 网络输入 {}x{}, 平滑窗口 {}, NMS {:.2}",
            net_w, net_h, settings.smoothing_window, settings.nms_overlap
        );

        let now = Instant::now();
        Ok(Self {
            ctx,
            ring,
            fetch,
            infer,
            latest: Arc::new(Vec::new()),
            names,
            last_cycle_start: now,
            stats_last: now,
            stats_cycles: 0,
        })
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn is_done(&self) -> bool {
        self.ctx.is_done()
    }

    /// 最近一次推理 (已抑制) 的检测结果
    pub fn latest_detections(&self) -> Arc<Vec<Detection>> {
        Arc::clone(&self.latest)
    }

    /// 执行一个完整周期
    pub async fn run_cycle<P: PresentationSink>(&mut self, sink: &mut P) -> Result<CycleReport> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_cycle_start).as_secs_f32();
        if dt > 0.0 {
            self.ctx.set_fps(1.0 / dt);
        }
        self.last_cycle_start = now;

        let write_index = self.ring.advance();
        self.ctx.set_write_index(write_index);
        let cycle = self.ctx.next_cycle();
        let read_index = self.ring.read_index();

        let slot = self.ring.checkout_write()?;
        let input = self.ring.checkout_detect_input()?;
        let frame_size = self.ring.display_frame()?.dimensions();
        self.fetch.dispatch(StageJob::Fetch { slot })?;
        self.infer.dispatch(StageJob::Infer { input, frame_size })?;

        // 显示阶段: 上一周期的检测结果
        let t = Instant::now();
        let displayed = self.display(sink).await;
        let display_elapsed = t.elapsed();

        // 显示失败也要先汇合, 不留在途任务
        let fetched = self.fetch.join();
        let inferred = self.infer.join();
        let key = displayed?;

        let (fetch_elapsed, outcome) = match fetched? {
            StageDone::Fetched {
                slot,
                outcome,
                elapsed,
            } => {
                self.ring.checkin_write(slot);
                (elapsed, outcome)
            }
            done => return Err(self.stage_failure(Stage::Fetch, done)),
        };
        let (infer_elapsed, count) = match inferred? {
            StageDone::Inferred {
                input,
                detections,
                elapsed,
            } => {
                self.ring.checkin_detect_input(input);
                let count = detections.len();
                self.latest = Arc::new(detections);
                (elapsed, count)
            }
            done => return Err(self.stage_failure(Stage::Infer, done)),
        };

        if let Some(key) = key {
            self.ctx.apply_key(key);
        }
        self.log_stats();

        Ok(CycleReport {
            cycle,
            write_index,
            read_index,
            key,
            fetched: outcome == FetchOutcome::Frame,
            detections: count,
            timings: StageTimings {
                fetch: fetch_elapsed,
                infer: infer_elapsed,
                display: display_elapsed,
            },
        })
    }

    /// 循环执行直到 done (流结束 / 帧数上限 / 退出键)
    pub async fn run_until_done<P: PresentationSink>(&mut self, sink: &mut P) -> Result<u64> {
        while !self.is_done() {
            self.run_cycle(sink).await?;
        }
        Ok(self.ctx.cycles())
    }

    async fn display<P: PresentationSink>(&self, sink: &mut P) -> Result<Option<Key>> {
        let frame = self.ring.display_frame()?;
        let detections = self.latest_detections();
        let thresh = self.ctx.thresh.get();
        let hud = Hud {
            fps: self.ctx.fps(),
            thresh,
            hier: self.ctx.hier.get(),
        };
        let overlay = Overlay::build(
            &detections,
            frame.width(),
            frame.height(),
            &self.names,
            thresh,
            hud,
        );
        sink.present(frame, &overlay).await
    }

    fn stage_failure(&self, expected: Stage, done: StageDone) -> PipelineError {
        match done {
            StageDone::Failed { stage, error } => {
                error!("❌ {} 阶段失败: {}", stage.name(), error);
                self.ctx.set_done();
                error
            }
            _ => PipelineError::dispatch(expected, "收到不匹配的完成消息"),
        }
    }

    fn log_stats(&mut self) {
        self.stats_cycles += 1;
        let elapsed = self.stats_last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            info!(
                "📊 {:.1} 周期/秒 | 当前 {:.1}fps | 已取帧 {} | 检测 {}",
                self.stats_cycles as f64 / elapsed,
                self.ctx.fps(),
                self.ctx.frames_fetched(),
                self.latest.len()
            );
            self.stats_last = Instant::now();
            self.stats_cycles = 0;
        }
    }
}
