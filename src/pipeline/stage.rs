// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线阶段工作线程
//!
//! 取帧和推理各自占用一个长期存活的线程, 每周期通过通道接收一个任务、
//! 返回一个完成消息, 同一时刻最多只有一个周期在途。

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbImage;
use tracing::{debug, error, info};

use super::context::PipelineContext;
use super::letterbox::Letterbox;
use super::ring::FrameSlot;
use super::Stage;
use crate::detection::{suppress, Detection, DetectionSmoother, Detector};
use crate::error::{PipelineError, Result};
use crate::input::FrameSource;

/// 派发给工作线程的任务
#[derive(Debug)]
pub enum StageJob {
    Fetch { slot: FrameSlot },
    Infer { input: RgbImage, frame_size: (u32, u32) },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Frame,
    EndOfStream,
}

/// 工作线程返回的完成消息
#[derive(Debug)]
pub enum StageDone {
    Fetched {
        slot: FrameSlot,
        outcome: FetchOutcome,
        elapsed: Duration,
    },
    Inferred {
        input: RgbImage,
        detections: Vec<Detection>,
        elapsed: Duration,
    },
    Failed {
        stage: Stage,
        error: PipelineError,
    },
}

/// 在工作线程里执行的阶段逻辑
pub trait StageTask: Send + 'static {
    fn run(&mut self, job: StageJob) -> StageDone;

    /// 工作线程退出前调用
    fn finish(&mut self) {}
}

pub struct StageWorker {
    stage: Stage,
    jobs: Sender<StageJob>,
    done: Receiver<StageDone>,
    handle: Option<JoinHandle<()>>,
}

impl StageWorker {
    pub fn spawn<T: StageTask>(stage: Stage, mut task: T) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<StageJob>(1);
        let (done_tx, done_rx) = bounded::<StageDone>(1);

        let handle = thread::Builder::new()
            .name(format!("stage-{}", stage.name()))
            .spawn(move || {
                debug!("🧵 {} 工作线程启动", stage.name());
                while let Ok(job) = job_rx.recv() {
                    if matches!(job, StageJob::Shutdown) {
                        break;
                    }
                    if done_tx.send(task.run(job)).is_err() {
                        break;
                    }
                }
                task.finish();
                debug!("🧵 {} 工作线程退出", stage.name());
            })?;

        Ok(Self {
            stage,
            jobs: job_tx,
            done: done_rx,
            handle: Some(handle),
        })
    }

    pub fn dispatch(&self, job: StageJob) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| PipelineError::dispatch(self.stage, "工作线程已退出"))
    }

    /// 等待本周期的完成消息
    pub fn join(&self) -> Result<StageDone> {
        self.done
            .recv()
            .map_err(|_| PipelineError::dispatch(self.stage, "工作线程未返回结果"))
    }
}

impl Drop for StageWorker {
    fn drop(&mut self) {
        let _ = self.jobs.send(StageJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("❌ {} 工作线程崩溃", self.stage.name());
            }
        }
    }
}

/// 取帧阶段: 拉一帧写入写槽并生成 letterbox
pub struct FetchStage<S: FrameSource> {
    source: S,
    letterbox: Letterbox,
    ctx: Arc<PipelineContext>,
    exhausted: bool,
}

impl<S: FrameSource> FetchStage<S> {
    pub fn new(source: S, letterbox: Letterbox, ctx: Arc<PipelineContext>) -> Self {
        Self {
            source,
            letterbox,
            ctx,
            exhausted: false,
        }
    }

    fn fetch(&mut self, slot: &mut FrameSlot) -> Result<FetchOutcome> {
        // 流结束后不再读取
        if self.exhausted {
            self.ctx.set_done();
            return Ok(FetchOutcome::EndOfStream);
        }
        match self.source.next_frame()? {
            Some(frame) => {
                slot.raw = frame;
                self.letterbox.apply_into(&slot.raw, &mut slot.letterboxed)?;
                self.ctx.record_frame();
                Ok(FetchOutcome::Frame)
            }
            None => {
                self.exhausted = true;
                self.ctx.set_done();
                info!("📭 视频流结束, 共 {} 帧", self.ctx.frames_fetched());
                Ok(FetchOutcome::EndOfStream)
            }
        }
    }
}

impl<S: FrameSource + 'static> StageTask for FetchStage<S> {
    fn run(&mut self, job: StageJob) -> StageDone {
        let StageJob::Fetch { mut slot } = job else {
            return StageDone::Failed {
                stage: Stage::Fetch,
                error: PipelineError::dispatch(Stage::Fetch, "收到非取帧任务"),
            };
        };
        let t = Instant::now();
        match self.fetch(&mut slot) {
            Ok(outcome) => StageDone::Fetched {
                slot,
                outcome,
                elapsed: t.elapsed(),
            },
            Err(error) => StageDone::Failed {
                stage: Stage::Fetch,
                error,
            },
        }
    }

    fn finish(&mut self) {
        self.source.close();
    }
}

/// 推理阶段: 前向推理 → 记忆/平均 → 解码 → NMS
pub struct InferStage<D: Detector> {
    detector: D,
    smoother: DetectionSmoother,
    ctx: Arc<PipelineContext>,
    names: Arc<[String]>,
    overlap: f32,
}

impl<D: Detector> InferStage<D> {
    pub fn new(
        detector: D,
        smoother: DetectionSmoother,
        ctx: Arc<PipelineContext>,
        names: Arc<[String]>,
        overlap: f32,
    ) -> Self {
        Self {
            detector,
            smoother,
            ctx,
            names,
            overlap,
        }
    }

    fn infer(&mut self, input: &RgbImage, frame_size: (u32, u32)) -> Result<Vec<Detection>> {
        self.detector.predict(input)?;
        self.smoother.remember(self.detector.output_layers())?;
        self.smoother.average_into(self.detector.output_layers_mut())?;

        let thresh = self.ctx.thresh.get();
        let hier = self.ctx.hier.get();
        let mut dets = self
            .detector
            .decode_boxes(frame_size.0, frame_size.1, thresh, hier);
        suppress(&mut dets, self.overlap);

        if tracing::enabled!(tracing::Level::DEBUG) {
            for det in &dets {
                for (class_id, prob) in det.classes_above(thresh) {
                    let name = self.names.get(class_id).map(String::as_str).unwrap_or("?");
                    debug!("🔍 {}: {:.0}%", name, prob * 100.0);
                }
            }
        }
        Ok(dets)
    }
}

impl<D: Detector + 'static> StageTask for InferStage<D> {
    fn run(&mut self, job: StageJob) -> StageDone {
        let StageJob::Infer { input, frame_size } = job else {
            return StageDone::Failed {
                stage: Stage::Infer,
                error: PipelineError::dispatch(Stage::Infer, "收到非推理任务"),
            };
        };
        let t = Instant::now();
        match self.infer(&input, frame_size) {
            Ok(detections) => StageDone::Inferred {
                input,
                detections,
                elapsed: t.elapsed(),
            },
            Err(error) => StageDone::Failed {
                stage: Stage::Infer,
                error,
            },
        }
    }
}
