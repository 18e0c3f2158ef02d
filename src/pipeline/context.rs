// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线共享状态
//!
//! 各阶段共享同一个 `Arc<PipelineContext>`; 阈值和标志位都是原子量,
//! 读到上一周期的旧值是允许的。

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tracing::info;

use crate::renderer::Key;

/// 按键调整阈值的步长
pub const THRESHOLD_STEP: f32 = 0.02;

/// 以 f32 位模式存储的原子阈值, 下限为 0
#[derive(Debug)]
pub struct AtomicThreshold(AtomicU32);

impl AtomicThreshold {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.max(0.0).to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// 加上 delta, 结果不低于 0; 返回新值
    pub fn adjust(&self, delta: f32) -> f32 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + delta).max(0.0);
            match self.0.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug)]
pub struct PipelineContext {
    done: AtomicBool,
    write_index: AtomicUsize,
    pub thresh: AtomicThreshold,
    pub hier: AtomicThreshold,
    fps: AtomicU32,
    cycles: AtomicU64,
    frames_fetched: AtomicU64,
    max_frames: Option<u64>,
}

impl PipelineContext {
    pub fn new(thresh: f32, hier: f32, max_frames: Option<u64>) -> Self {
        Self {
            done: AtomicBool::new(false),
            write_index: AtomicUsize::new(0),
            thresh: AtomicThreshold::new(thresh),
            hier: AtomicThreshold::new(hier),
            fps: AtomicU32::new(0f32.to_bits()),
            cycles: AtomicU64::new(0),
            frames_fetched: AtomicU64::new(0),
            max_frames,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn set_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn write_index(&self) -> usize {
        self.write_index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_write_index(&self, idx: usize) {
        self.write_index.store(idx, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f32 {
        f32::from_bits(self.fps.load(Ordering::Relaxed))
    }

    pub(crate) fn set_fps(&self, fps: f32) {
        self.fps.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// 周期计数 +1, 返回新的周期号
    pub(crate) fn next_cycle(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frames_fetched(&self) -> u64 {
        self.frames_fetched.load(Ordering::Relaxed)
    }

    /// 记录一帧; 达到帧数上限时置 done
    pub(crate) fn record_frame(&self) -> u64 {
        let n = self.frames_fetched.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(max) = self.max_frames {
            if n >= max {
                info!("🏁 已达到帧数上限 {}", max);
                self.set_done();
            }
        }
        n
    }

    pub fn max_frames(&self) -> Option<u64> {
        self.max_frames
    }

    /// 处理显示阶段返回的按键
    pub fn apply_key(&self, key: Key) {
        match key {
            Key::Escape => {
                info!("👋 收到退出键");
                self.set_done();
            }
            Key::Up => {
                let v = self.thresh.adjust(THRESHOLD_STEP);
                info!("🔧 置信度阈值: {:.2}", v);
            }
            Key::Down => {
                let v = self.thresh.adjust(-THRESHOLD_STEP);
                info!("🔧 置信度阈值: {:.2}", v);
            }
            Key::Right => {
                let v = self.hier.adjust(THRESHOLD_STEP);
                info!("🔧 层级阈值: {:.2}", v);
            }
            Key::Left => {
                let v = self.hier.adjust(-THRESHOLD_STEP);
                info!("🔧 层级阈值: {:.2}", v);
            }
            Key::Other(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hier_threshold_clamps_at_zero() {
        let ctx = PipelineContext::new(0.5, 0.05, None);
        for _ in 0..10 {
            ctx.apply_key(Key::Left);
            assert!(ctx.hier.get() >= 0.0);
        }
        assert_eq!(ctx.hier.get(), 0.0);
    }

    #[test]
    fn test_threshold_keys() {
        let ctx = PipelineContext::new(0.5, 0.5, None);
        ctx.apply_key(Key::Up);
        assert!((ctx.thresh.get() - 0.52).abs() < 1e-6);
        ctx.apply_key(Key::Down);
        ctx.apply_key(Key::Down);
        assert!((ctx.thresh.get() - 0.48).abs() < 1e-6);
        ctx.apply_key(Key::Right);
        assert!((ctx.hier.get() - 0.52).abs() < 1e-6);
        ctx.apply_key(Key::Other(65));
        assert!(!ctx.is_done());
    }

    #[test]
    fn test_escape_sets_done() {
        let ctx = PipelineContext::new(0.5, 0.5, None);
        ctx.apply_key(Key::Escape);
        assert!(ctx.is_done());
    }

    #[test]
    fn test_frame_limit_sets_done() {
        let ctx = PipelineContext::new(0.5, 0.5, Some(2));
        ctx.record_frame();
        assert!(!ctx.is_done());
        ctx.record_frame();
        assert!(ctx.is_done());
        assert_eq!(ctx.frames_fetched(), 2);
    }
}
