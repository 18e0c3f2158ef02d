// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 配置: 命令行参数 + JSON 配置文件
//!
//! 命令行给出的值覆盖配置文件中的值。

use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::yolo::YOLOV3_ANCHORS;
use crate::detection::{DEFAULT_NMS_OVERLAP, DEFAULT_SMOOTHING_WINDOW};
use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineSettings;
use crate::realtime::params::{DEFAULT_EXEC_COST_MS, LOWEST_PRIORITY};
use crate::realtime::{BudgetPolicy, PeriodicTaskParams, TaskClass};

/// 软实时检测流水线
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "YOLO 软实时检测流水线", long_about = None)]
pub struct Args {
    /// 视频源 (文件路径 / rtsp:// 地址)
    #[arg(short, long)]
    pub source: Option<String>,

    /// ONNX 模型路径
    #[arg(short, long)]
    pub model: Option<String>,

    /// 类别名称文件 (每行一个)
    #[arg(long)]
    pub names: Option<String>,

    /// 类别层级文件
    #[arg(long)]
    pub hierarchy: Option<String>,

    /// JSON 配置文件 (不存在时写入默认配置)
    #[arg(short, long)]
    pub config: Option<String>,

    /// 置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// 层级阈值
    #[arg(long)]
    pub hier: Option<f32>,

    /// NMS 重叠阈值
    #[arg(long)]
    pub nms: Option<f32>,

    /// 平滑窗口 (帧数)
    #[arg(long)]
    pub smooth: Option<usize>,

    /// 周期 (毫秒); 不指定时按视频帧率
    #[arg(long)]
    pub period_ms: Option<u64>,

    /// 相对截止时间 (毫秒)
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// 执行预算 (毫秒)
    #[arg(long)]
    pub cost_ms: Option<u64>,

    /// 超出执行预算时报错退出
    #[arg(long)]
    pub enforce_budget: bool,

    /// 最多解码的帧数
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// 全屏
    #[arg(long)]
    pub fullscreen: bool,

    /// 快照目录 (无窗口模式)
    #[arg(long)]
    pub snapshot_dir: Option<String>,

    /// 每 N 帧保存一张快照
    #[arg(long)]
    pub snapshot_every: Option<u64>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<String>,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// GPU 设备号
    #[arg(long)]
    pub device_id: Option<i32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
    TensorRT,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model: String,
    pub names: String,
    pub hierarchy: Option<String>,
    /// 模型输入是动态尺寸时使用
    pub input_size: u32,
    /// 每个输出层的锚框 [w0, h0, w1, h1, ...], 顺序与模型输出一致
    pub anchors: Vec<Vec<f32>>,
    /// 输出是否还需要 sigmoid
    pub logistic: bool,
    pub provider: ExecutionProvider,
    pub device_id: i32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: "models/yolov3.onnx".to_string(),
            names: "data/coco.names".to_string(),
            hierarchy: None,
            input_size: 416,
            anchors: YOLOV3_ANCHORS.iter().map(|a| a.to_vec()).collect(),
            logistic: true,
            provider: ExecutionProvider::Cpu,
            device_id: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub conf: f32,
    pub hier: f32,
    pub nms: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            conf: 0.5,
            hier: 0.5,
            nms: DEFAULT_NMS_OVERLAP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub period_ms: Option<u64>,
    pub deadline_ms: Option<u64>,
    pub cost_ms: Option<u64>,
    pub budget_policy: BudgetPolicy,
    pub class: TaskClass,
    pub priority: u32,
    pub cpu: Option<usize>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            period_ms: None,
            deadline_ms: None,
            cost_ms: None,
            budget_policy: BudgetPolicy::Unenforced,
            class: TaskClass::Soft,
            priority: LOWEST_PRIORITY,
            cpu: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub snapshot_dir: Option<String>,
    pub snapshot_every: u64,
    pub font: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "Demo".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            snapshot_dir: None,
            snapshot_every: 30,
            font: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: String,
    pub detector: DetectorConfig,
    pub thresholds: ThresholdConfig,
    pub smoothing_window: usize,
    pub timing: TimingConfig,
    pub display: DisplayConfig,
    pub max_frames: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            detector: DetectorConfig::default(),
            thresholds: ThresholdConfig::default(),
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            timing: TimingConfig::default(),
            display: DisplayConfig::default(),
            max_frames: None,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置; 文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("📝 配置文件不存在,创建默认配置...");
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }
        let json = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("无法读取配置 {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&json).map_err(|e| {
            PipelineError::Config(format!("配置文件解析失败 {}: {}", path.display(), e))
        })?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("序列化配置失败: {}", e)))?;
        fs::write(path, json).map_err(|e| {
            PipelineError::Config(format!("保存配置失败 {}: {}", path.display(), e))
        })?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 配置文件 (如有) + 命令行覆盖, 并校验
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.merge_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn merge_args(&mut self, args: &Args) {
        if let Some(source) = &args.source {
            self.source = source.clone();
        }
        if let Some(model) = &args.model {
            self.detector.model = model.clone();
        }
        if let Some(names) = &args.names {
            self.detector.names = names.clone();
        }
        if let Some(hierarchy) = &args.hierarchy {
            self.detector.hierarchy = Some(hierarchy.clone());
        }
        if args.trt {
            self.detector.provider = ExecutionProvider::TensorRT;
        } else if args.cuda {
            self.detector.provider = ExecutionProvider::Cuda;
        }
        if let Some(id) = args.device_id {
            self.detector.device_id = id;
        }

        if let Some(conf) = args.conf {
            self.thresholds.conf = conf;
        }
        if let Some(hier) = args.hier {
            self.thresholds.hier = hier;
        }
        if let Some(nms) = args.nms {
            self.thresholds.nms = nms;
        }
        if let Some(smooth) = args.smooth {
            self.smoothing_window = smooth;
        }

        if args.period_ms.is_some() {
            self.timing.period_ms = args.period_ms;
        }
        if args.deadline_ms.is_some() {
            self.timing.deadline_ms = args.deadline_ms;
        }
        if args.cost_ms.is_some() {
            self.timing.cost_ms = args.cost_ms;
        }
        if args.enforce_budget {
            self.timing.budget_policy = BudgetPolicy::Enforced;
        }

        if args.max_frames.is_some() {
            self.max_frames = args.max_frames;
        }
        if args.fullscreen {
            self.display.fullscreen = true;
        }
        if let Some(dir) = &args.snapshot_dir {
            self.display.snapshot_dir = Some(dir.clone());
        }
        if let Some(every) = args.snapshot_every {
            self.display.snapshot_every = every;
        }
        if let Some(font) = &args.font {
            self.display.font = Some(font.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        if self.source.is_empty() {
            return fail("未指定视频源 (--source)".to_string());
        }
        if self.detector.model.is_empty() {
            return fail("未指定模型 (--model)".to_string());
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return fail(format!(
                "网络输入尺寸必须是32的正整数倍: {}",
                self.detector.input_size
            ));
        }
        if self.detector.anchors.is_empty()
            || self
                .detector
                .anchors
                .iter()
                .any(|a| a.is_empty() || a.len() % 2 != 0)
        {
            return fail("锚框必须按 [w, h, ...] 成对给出".to_string());
        }
        for (name, value) in [
            ("conf", self.thresholds.conf),
            ("hier", self.thresholds.hier),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("{} 阈值超出 [0, 1]: {}", name, value));
            }
        }
        if !(self.thresholds.nms > 0.0 && self.thresholds.nms <= 1.0) {
            return fail(format!("NMS 阈值超出 (0, 1]: {}", self.thresholds.nms));
        }
        if self.smoothing_window == 0 {
            return fail("平滑窗口必须 >= 1".to_string());
        }
        if self.display.width == 0 || self.display.height == 0 {
            return fail("窗口尺寸不能为0".to_string());
        }
        if self.display.snapshot_every == 0 {
            return fail("快照间隔必须 >= 1".to_string());
        }
        if self.max_frames == Some(0) {
            return fail("帧数上限必须 >= 1".to_string());
        }
        Ok(())
    }

    /// 周期参数: 显式周期 > 视频帧率 > 默认 100ms
    pub fn task_params(&self, nominal_fps: Option<f64>) -> Result<PeriodicTaskParams> {
        let t = &self.timing;
        let mut params = match (t.period_ms, nominal_fps) {
            (Some(period), _) => {
                let deadline = t.deadline_ms.unwrap_or(period);
                PeriodicTaskParams::from_millis(
                    period,
                    deadline,
                    DEFAULT_EXEC_COST_MS.min(deadline),
                )
            }
            (None, Some(fps)) => PeriodicTaskParams::from_fps(fps)?,
            (None, None) => PeriodicTaskParams::default(),
        };
        if t.period_ms.is_none() {
            if let Some(deadline) = t.deadline_ms {
                params.relative_deadline = Duration::from_millis(deadline);
            }
        }
        if let Some(cost) = t.cost_ms {
            params.exec_cost = Duration::from_millis(cost);
        }
        params.budget_policy = t.budget_policy;
        params.class = t.class;
        params.priority = t.priority;
        params.cpu = t.cpu;
        params.validate()?;
        Ok(params)
    }

    pub fn settings(&self, names: Vec<String>) -> PipelineSettings {
        PipelineSettings {
            thresh: self.thresholds.conf,
            hier: self.thresholds.hier,
            nms_overlap: self.thresholds.nms,
            smoothing_window: self.smoothing_window,
            max_frames: self.max_frames,
            names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            source: "video.mp4".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.thresholds.conf, 0.5);
        assert_eq!(config.thresholds.hier, 0.5);
        assert_eq!(config.thresholds.nms, 0.4);
        assert_eq!(config.smoothing_window, 3);
        assert_eq!(config.detector.anchors.len(), 3);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut c = valid();
        c.source.clear();
        assert!(matches!(c.validate(), Err(PipelineError::Config(_))));

        let mut c = valid();
        c.thresholds.hier = -0.1;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.smoothing_window = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.detector.input_size = 400;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.detector.anchors = vec![vec![10.0, 13.0, 16.0]];
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_args_override_file_values() {
        let args = Args {
            source: Some("rtsp://cam".to_string()),
            conf: Some(0.3),
            smooth: Some(5),
            period_ms: Some(40),
            enforce_budget: true,
            trt: true,
            max_frames: Some(100),
            ..Default::default()
        };
        let mut config = PipelineConfig::default();
        config.merge_args(&args);
        assert_eq!(config.source, "rtsp://cam");
        assert_eq!(config.thresholds.conf, 0.3);
        assert_eq!(config.thresholds.hier, 0.5);
        assert_eq!(config.smoothing_window, 5);
        assert_eq!(config.timing.period_ms, Some(40));
        assert_eq!(config.timing.budget_policy, BudgetPolicy::Enforced);
        assert_eq!(config.detector.provider, ExecutionProvider::TensorRT);
        assert_eq!(config.max_frames, Some(100));
    }

    #[test]
    fn test_task_params_precedence() {
        let mut c = valid();
        let p = c.task_params(None).unwrap();
        assert_eq!(p.period, Duration::from_millis(100));

        let p = c.task_params(Some(25.0)).unwrap();
        assert_eq!(p.period, Duration::from_millis(40));

        c.timing.period_ms = Some(50);
        c.timing.cost_ms = Some(20);
        let p = c.task_params(Some(25.0)).unwrap();
        assert_eq!(p.period, Duration::from_millis(50));
        assert_eq!(p.relative_deadline, Duration::from_millis(50));
        assert_eq!(p.exec_cost, Duration::from_millis(20));

        c.timing.deadline_ms = Some(80);
        assert!(matches!(
            c.task_params(None),
            Err(PipelineError::SchedulingConfig(_))
        ));
    }

    #[test]
    fn test_load_creates_default_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        let created = PipelineConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, PipelineConfig::default());

        let mut edited = valid();
        edited.timing.budget_policy = BudgetPolicy::Enforced;
        edited.detector.provider = ExecutionProvider::Cuda;
        edited.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), edited);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "source": "a.mp4", "thresholds": { "conf": 0.25 } }"#).unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.source, "a.mp4");
        assert_eq!(config.thresholds.conf, 0.25);
        assert_eq!(config.thresholds.nms, 0.4);
        assert_eq!(config.smoothing_window, 3);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(PipelineError::Config(_))
        ));
    }
}
