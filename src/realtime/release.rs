// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 同步释放组: 所有成员到齐后, 在同一时刻开始第一个周期

use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
pub struct ReleaseGroup {
    barrier: Barrier,
    delay: Duration,
    release: Mutex<Option<Instant>>,
}

impl ReleaseGroup {
    /// `parties` 个成员; 到齐后再等 `delay` 统一释放
    pub fn new(parties: usize, delay: Duration) -> Self {
        Self {
            barrier: Barrier::new(parties.max(1)),
            delay,
            release: Mutex::new(None),
        }
    }

    /// 单任务组, 立即释放
    pub fn solo() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// 阻塞到组释放时刻, 返回释放时刻 (所有成员相同)
    pub fn wait(&self) -> Instant {
        if self.barrier.wait().is_leader() {
            *self.release.lock() = Some(Instant::now() + self.delay);
        }
        // 第二次汇合保证所有成员都能读到 leader 写入的时刻
        self.barrier.wait();
        let release = (*self.release.lock()).unwrap_or_else(Instant::now);

        let now = Instant::now();
        if release > now {
            thread::sleep(release - now);
        }
        release
    }
}
