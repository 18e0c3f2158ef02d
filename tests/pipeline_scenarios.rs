// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 整条流水线的场景测试: 假视频源 + 假检测器 + 脚本化显示

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use ndarray::{ArrayD, IxDyn};
use yolo_rt::detection::{BoxXywh, Detection, Detector, OutputLayer};
use yolo_rt::input::FrameSource;
use yolo_rt::pipeline::{run_governed, PipelineScheduler, PipelineSettings};
use yolo_rt::realtime::{
    PeriodicGovernor, PeriodicTaskParams, ReleaseGroup, TaskMode, WallClockAuthority,
};
use yolo_rt::renderer::{Key, Overlay, PresentationSink};
use yolo_rt::{PipelineError, Result};

/// 第 i 帧的像素值都是 i
struct CountingSource {
    frames: u8,
    next: u8,
    reads: Arc<AtomicUsize>,
    reads_after_end: Arc<AtomicUsize>,
}

impl CountingSource {
    fn new(frames: u8) -> Self {
        Self {
            frames,
            next: 0,
            reads: Arc::new(AtomicUsize::new(0)),
            reads_after_end: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FrameSource for CountingSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.next > self.frames {
            self.reads_after_end.fetch_add(1, Ordering::SeqCst);
        }
        if self.next >= self.frames {
            self.next = self.frames + 1;
            return Ok(None);
        }
        let frame = RgbImage::from_pixel(64, 48, Rgb([self.next; 3]));
        self.next += 1;
        Ok(Some(frame))
    }
}

/// 单层单锚框单类别; 每次推理输出固定得分
struct FixedDetector {
    layers: Vec<OutputLayer>,
    score: f32,
    calls: usize,
    fail_on: Option<usize>,
}

impl FixedDetector {
    fn new(score: f32) -> Self {
        Self {
            layers: vec![OutputLayer::new(
                "out",
                ArrayD::zeros(IxDyn(&[1, 6, 1, 1])),
                vec![(10.0, 13.0)],
            )],
            score,
            calls: 0,
            fail_on: None,
        }
    }

    fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }
}

impl Detector for FixedDetector {
    fn input_size(&self) -> (u32, u32) {
        (32, 32)
    }

    fn class_count(&self) -> usize {
        1
    }

    fn predict(&mut self, _input: &RgbImage) -> Result<()> {
        self.calls += 1;
        if self.fail_on == Some(self.calls) {
            return Err(PipelineError::DecodeStage("forward pass failed".to_string()));
        }
        self.layers[0].data.fill(self.score);
        Ok(())
    }

    fn output_layers(&self) -> &[OutputLayer] {
        &self.layers
    }

    fn output_layers_mut(&mut self) -> &mut [OutputLayer] {
        &mut self.layers
    }

    fn decode_boxes(&self, _frame_w: u32, _frame_h: u32, thresh: f32, _hier: f32) -> Vec<Detection> {
        let prob = self.layers[0].data[[0, 5, 0, 0]];
        if prob <= thresh {
            return Vec::new();
        }
        vec![Detection {
            bbox: BoxXywh::new(0.5, 0.5, 0.25, 0.25),
            prob: vec![prob],
            objectness: prob,
        }]
    }
}

/// 记录显示的帧 (像素值) 和检测框数量, 按周期返回预设按键
#[derive(Default)]
struct ScriptedSink {
    shown: Vec<u8>,
    boxes: Vec<usize>,
    keys: Vec<Option<Key>>,
    windows: usize,
}

impl ScriptedSink {
    fn with_keys(keys: Vec<Option<Key>>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }
}

impl PresentationSink for ScriptedSink {
    fn create_window(&mut self, _title: &str, _w: u32, _h: u32, _fullscreen: bool) -> Result<()> {
        self.windows += 1;
        Ok(())
    }

    async fn present(&mut self, frame: &RgbImage, overlay: &Overlay) -> Result<Option<Key>> {
        let cycle = self.shown.len();
        self.shown.push(frame.get_pixel(0, 0)[0]);
        self.boxes.push(overlay.boxes.len());
        Ok(self.keys.get(cycle).copied().flatten())
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        names: vec!["person".to_string()],
        ..Default::default()
    }
}

#[test]
fn five_frames_give_exactly_five_cycles() {
    let source = CountingSource::new(5);
    let reads = Arc::clone(&source.reads);
    let reads_after_end = Arc::clone(&source.reads_after_end);

    let mut scheduler =
        PipelineScheduler::start(source, FixedDetector::new(0.9), settings()).unwrap();
    let mut sink = ScriptedSink::default();
    let cycles = pollster::block_on(scheduler.run_until_done(&mut sink)).unwrap();

    assert_eq!(cycles, 5);
    assert!(scheduler.is_done());
    assert_eq!(scheduler.context().frames_fetched(), 5);
    // 启动时 1 次 + 5 个周期各 1 次, 最后一次读到流结束
    assert_eq!(reads.load(Ordering::SeqCst), 6);
    assert_eq!(reads_after_end.load(Ordering::SeqCst), 0);
    assert_eq!(sink.shown.len(), 5);
}

#[test]
fn display_lags_fetch_by_one_cycle() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(8), FixedDetector::new(0.9), settings())
            .unwrap();
    let mut sink = ScriptedSink::default();

    let mut reports = Vec::new();
    while !scheduler.is_done() {
        reports.push(pollster::block_on(scheduler.run_cycle(&mut sink)).unwrap());
    }

    for report in &reports {
        assert_ne!(report.write_index, report.read_index);
        assert_eq!(report.read_index, (report.write_index + 2) % 3);
    }
    for pair in reports.windows(2) {
        // 本周期显示的是上一周期写入的槽
        assert_eq!(pair[1].read_index, pair[0].write_index);
    }
    // 第 c 个周期显示第 c-1 帧 (第一帧在启动时填满帧环)
    assert_eq!(sink.shown, (0..8).collect::<Vec<u8>>());
    assert!(reports[..7].iter().all(|r| r.fetched));
    assert!(!reports[7].fetched);
}

#[test]
fn detections_are_shown_one_cycle_later() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(4), FixedDetector::new(0.9), settings())
            .unwrap();
    let mut sink = ScriptedSink::default();
    pollster::block_on(scheduler.run_until_done(&mut sink)).unwrap();

    // 平滑窗口 3: 第一次推理的均值只有 0.9/3, 第二次 0.6 才过阈值
    assert_eq!(sink.boxes, vec![0, 0, 1, 1]);
    assert_eq!(scheduler.latest_detections().len(), 1);
}

#[test]
fn low_scores_produce_no_boxes() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(3), FixedDetector::new(0.2), settings())
            .unwrap();
    let mut sink = ScriptedSink::default();
    pollster::block_on(scheduler.run_until_done(&mut sink)).unwrap();
    assert!(sink.boxes.iter().all(|&n| n == 0));
}

#[test]
fn escape_key_stops_after_current_cycle() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(20), FixedDetector::new(0.9), settings())
            .unwrap();
    let mut sink = ScriptedSink::with_keys(vec![None, Some(Key::Escape)]);
    let cycles = pollster::block_on(scheduler.run_until_done(&mut sink)).unwrap();

    assert_eq!(cycles, 2);
    assert_eq!(sink.shown.len(), 2);
    // 在途的取帧照常完成
    assert_eq!(scheduler.context().frames_fetched(), 3);
}

#[test]
fn threshold_keys_take_effect_on_next_infer() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(30), FixedDetector::new(0.55), settings())
            .unwrap();
    // 每周期按一次 ↑, 置信度阈值 0.5 → 0.52 → 0.54 → 0.56 后不再有框
    let keys = vec![Some(Key::Up); 6];
    let mut sink = ScriptedSink::with_keys(keys);
    for _ in 0..8 {
        pollster::block_on(scheduler.run_cycle(&mut sink)).unwrap();
    }
    assert!((scheduler.context().thresh.get() - 0.62).abs() < 1e-4);
    assert_eq!(sink.boxes.last(), Some(&0));
    assert!(sink.boxes.contains(&1));
}

#[test]
fn frame_limit_sets_done() {
    let settings = PipelineSettings {
        max_frames: Some(3),
        ..settings()
    };
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(50), FixedDetector::new(0.9), settings)
            .unwrap();
    let mut sink = ScriptedSink::default();
    let cycles = pollster::block_on(scheduler.run_until_done(&mut sink)).unwrap();
    assert_eq!(cycles, 2);
    assert_eq!(scheduler.context().frames_fetched(), 3);
}

#[test]
fn empty_source_fails_to_start() {
    let result = PipelineScheduler::start(CountingSource::new(0), FixedDetector::new(0.9), settings());
    assert!(matches!(result, Err(PipelineError::SourceExhausted)));
}

#[test]
fn class_names_must_match_detector_classes() {
    let source = CountingSource::new(3);
    let reads = Arc::clone(&source.reads);
    let settings = PipelineSettings {
        names: vec!["person".to_string(), "car".to_string()],
        ..Default::default()
    };
    let result = PipelineScheduler::start(source, FixedDetector::new(0.9), settings);
    assert!(matches!(result, Err(PipelineError::Config(_))));
    // 校验在拉取第一帧之前
    assert_eq!(reads.load(Ordering::SeqCst), 0);
}

#[test]
fn detector_failure_aborts_before_next_present() {
    let detector = FixedDetector::new(0.9).failing_on(2);
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(10), detector, settings()).unwrap();
    let mut sink = ScriptedSink::default();

    let result = pollster::block_on(scheduler.run_until_done(&mut sink));
    assert!(matches!(result, Err(PipelineError::DecodeStage(_))));
    assert!(scheduler.is_done());
    assert_eq!(sink.shown.len(), 2);
}

#[test]
fn governed_run_releases_back_to_background() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(4), FixedDetector::new(0.9), settings())
            .unwrap();
    let mut governor = PeriodicGovernor::new(WallClockAuthority::new());
    governor
        .configure(PeriodicTaskParams::from_millis(15, 15, 10))
        .unwrap();
    let mut sink = ScriptedSink::default();

    let summary = pollster::block_on(run_governed(
        &mut scheduler,
        &mut governor,
        &ReleaseGroup::solo(),
        &mut sink,
    ))
    .unwrap();

    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.frames, 4);
    assert_eq!(governor.mode(), TaskMode::Background);
    assert_eq!(governor.authority().stats().jobs, 4);
}

#[test]
fn governed_run_without_params_is_rejected() {
    let mut scheduler =
        PipelineScheduler::start(CountingSource::new(4), FixedDetector::new(0.9), settings())
            .unwrap();
    let mut governor = PeriodicGovernor::new(WallClockAuthority::new());
    let mut sink = ScriptedSink::default();

    let result = pollster::block_on(run_governed(
        &mut scheduler,
        &mut governor,
        &ReleaseGroup::solo(),
        &mut sink,
    ));
    assert!(matches!(result, Err(PipelineError::SchedulingConfig(_))));
    assert!(sink.shown.is_empty());
}
