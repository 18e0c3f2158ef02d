// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 检测器
//!
//! 运行 darknet 导出的 YOLO 网络, 每个 yolo 层一个输出张量 [1, A*(5+C), H, W]。

use std::path::Path;
use std::time::Instant;

use image::{Rgb, RgbImage};
use ndarray::{Array, ArrayD, IxDyn};
use ort::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    GraphOptimizationLevel, Session, TensorRTExecutionProvider, ValueType,
};
use tracing::{debug, info};

use super::detector::Detector;
use super::labels::ClassHierarchy;
use super::types::{Detection, OutputLayer};
use super::yolo::{activate_layer, decode_layers, DecodeParams};
use crate::config::{DetectorConfig, ExecutionProvider};
use crate::error::{PipelineError, Result};

pub struct OrtDetector {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
    input_w: u32,
    input_h: u32,
    classes: usize,
    logistic: bool,
    layers: Vec<OutputLayer>,
    hierarchy: ClassHierarchy,
}

impl OrtDetector {
    pub fn new(config: &DetectorConfig, classes: usize, hierarchy: ClassHierarchy) -> Result<Self> {
        let model_path = Path::new(&config.model);
        if !model_path.exists() {
            return Err(PipelineError::Config(format!(
                "模型文件不存在: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([execution_provider(config)])?
            .commit_from_file(model_path)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| PipelineError::DecodeStage("模型没有输入".to_string()))?;
        let input_name = input.name.clone();

        // 动态尺寸 (-1) 时退回到配置值
        let (input_w, input_h) = match &input.input_type {
            ValueType::Tensor { dimensions, .. } if dimensions.len() == 4 => {
                let pick = |d: i64| if d > 0 { d as u32 } else { config.input_size };
                (pick(dimensions[3]), pick(dimensions[2]))
            }
            _ => (config.input_size, config.input_size),
        };

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.len() > config.anchors.len() {
            return Err(PipelineError::Config(format!(
                "模型有 {} 个输出层, 但只配置了 {} 组锚框",
                output_names.len(),
                config.anchors.len()
            )));
        }

        let layers = output_names
            .iter()
            .zip(&config.anchors)
            .map(|(name, anchors)| {
                let pairs = anchors.chunks_exact(2).map(|p| (p[0], p[1])).collect();
                OutputLayer::new(name.clone(), ArrayD::zeros(IxDyn(&[0])), pairs)
            })
            .collect();

        let mut detector = Self {
            session,
            input_name,
            output_names,
            input_w,
            input_h,
            classes,
            logistic: config.logistic,
            layers,
            hierarchy,
        };

        // 预热一次: 分配输出层, 确定平滑缓冲区长度
        let t = Instant::now();
        let blank = RgbImage::from_pixel(input_w, input_h, Rgb([127, 127, 127]));
        detector.predict(&blank)?;
        info!(
            "✅ 模型已加载: {} (输入 {}x{}, {} 个输出层, {} 类, 预热 {:.1}ms)",
            config.model,
            input_w,
            input_h,
            detector.layers.len(),
            classes,
            t.elapsed().as_secs_f64() * 1000.0
        );
        for layer in &detector.layers {
            debug!("  输出层 {} 形状 {:?}", layer.name, layer.data.shape());
        }

        Ok(detector)
    }

    /// RGB HWC u8 → NCHW f32 (/255)
    fn to_tensor(&self, input: &RgbImage) -> Array<f32, IxDyn> {
        let (w, h) = (self.input_w as usize, self.input_h as usize);
        let mut xs = Array::zeros(IxDyn(&[1, 3, h, w]));
        for (x, y, pixel) in input.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= w || y >= h {
                continue;
            }
            let [r, g, b] = pixel.0;
            xs[[0, 0, y, x]] = r as f32 / 255.0;
            xs[[0, 1, y, x]] = g as f32 / 255.0;
            xs[[0, 2, y, x]] = b as f32 / 255.0;
        }
        xs
    }
}

fn execution_provider(config: &DetectorConfig) -> ExecutionProviderDispatch {
    match config.provider {
        ExecutionProvider::Cpu => CPUExecutionProvider::default().build(),
        ExecutionProvider::Cuda => CUDAExecutionProvider::default()
            .with_device_id(config.device_id)
            .build(),
        ExecutionProvider::TensorRT => TensorRTExecutionProvider::default()
            .with_device_id(config.device_id)
            .with_fp16(true)
            .with_engine_cache(true)
            .build(),
    }
}

impl Detector for OrtDetector {
    fn input_size(&self) -> (u32, u32) {
        (self.input_w, self.input_h)
    }

    fn class_count(&self) -> usize {
        self.classes
    }

    fn predict(&mut self, input: &RgbImage) -> Result<()> {
        if input.dimensions() != (self.input_w, self.input_h) {
            return Err(PipelineError::DecodeStage(format!(
                "输入尺寸 {:?} 与网络 {}x{} 不一致",
                input.dimensions(),
                self.input_w,
                self.input_h
            )));
        }

        let xs = self.to_tensor(input);
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;

        for (layer, name) in self.layers.iter_mut().zip(&self.output_names) {
            let ys = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            if layer.data.shape() == ys.shape() {
                layer.data.assign(&ys);
            } else {
                layer.data = ys.into_owned();
            }
            if self.logistic {
                activate_layer(layer, self.classes);
            }
        }
        Ok(())
    }

    fn output_layers(&self) -> &[OutputLayer] {
        &self.layers
    }

    fn output_layers_mut(&mut self) -> &mut [OutputLayer] {
        &mut self.layers
    }

    fn decode_boxes(&self, frame_w: u32, frame_h: u32, thresh: f32, hier: f32) -> Vec<Detection> {
        let params = DecodeParams {
            classes: self.classes,
            net_w: self.input_w,
            net_h: self.input_h,
            frame_w,
            frame_h,
            thresh,
            hier,
        };
        decode_layers(&self.layers, &params, &self.hierarchy)
    }
}
