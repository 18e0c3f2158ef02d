// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 调度权威 (Scheduling Authority)
//!
//! 周期任务的参数校验、同步释放和按周期边界睡眠都委托给它。
//! `WallClockAuthority` 用单调时钟 + 线程睡眠实现软实时周期。

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::params::{BudgetPolicy, PeriodicTaskParams};
use super::release::ReleaseGroup;
use crate::error::{PipelineError, Result};

/// 一次 wait_next_period 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodTick {
    /// 作业序号 (释放后第一个周期为 1)
    pub job: u64,
    /// 本作业的释放时刻 = release + job * period
    pub release: Instant,
    /// 上一个作业超出执行预算
    pub overran: bool,
    /// 上一个作业错过截止时间
    pub missed_deadline: bool,
    /// 跳过的周期边界数
    pub skipped: u64,
}

pub trait SchedulingAuthority {
    /// 校验并登记周期参数
    fn configure(&mut self, params: &PeriodicTaskParams) -> Result<()>;

    /// 进入实时模式 (登记为周期任务)
    fn enter_real_time(&mut self) -> Result<()>;

    /// 阻塞到组同步释放, 返回释放时刻
    fn sync_release_wait(&mut self, group: &ReleaseGroup) -> Result<Instant>;

    /// 结束当前作业, 睡到下一个周期边界
    fn wait_next_period(&mut self) -> Result<PeriodTick>;

    /// 回到后台模式
    fn enter_background(&mut self);
}

/// 超支/错过截止时间的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingStats {
    pub jobs: u64,
    pub overruns: u64,
    pub deadline_misses: u64,
    pub skipped_periods: u64,
}

#[derive(Debug, Default)]
pub struct WallClockAuthority {
    params: Option<PeriodicTaskParams>,
    real_time: bool,
    release: Option<Instant>,
    /// 下一个可用的周期边界序号
    next_job: u64,
    current_release: Option<Instant>,
    job_start: Option<Instant>,
    stats: TimingStats,
    last_warn: Option<Instant>,
}

impl WallClockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> TimingStats {
        self.stats
    }

    fn boundary(release: Instant, period: Duration, k: u64) -> Instant {
        let nanos = period.as_nanos().saturating_mul(k as u128);
        release + Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// 每秒最多告警一次
    fn warn_late(&mut self, now: Instant, used: Duration, params: &PeriodicTaskParams) {
        let due = self
            .last_warn
            .map_or(true, |t| now.duration_since(t) >= Duration::from_secs(1));
        if due {
            warn!(
                "⚠️ 作业超时: 耗时 {:.1}ms (预算 {:.1}ms, 截止 {:.1}ms) | 累计超支 {} 次, 错过截止 {} 次",
                used.as_secs_f64() * 1000.0,
                params.exec_cost.as_secs_f64() * 1000.0,
                params.relative_deadline.as_secs_f64() * 1000.0,
                self.stats.overruns,
                self.stats.deadline_misses
            );
            self.last_warn = Some(now);
        }
    }
}

impl SchedulingAuthority for WallClockAuthority {
    fn configure(&mut self, params: &PeriodicTaskParams) -> Result<()> {
        if self.real_time {
            return Err(PipelineError::SchedulingConfig(
                "实时模式下不能修改周期参数".to_string(),
            ));
        }
        params.validate()?;
        if params.cpu.is_some() {
            debug!("CPU 分区 {:?} 仅作记录, 不绑定线程", params.cpu);
        }
        self.params = Some(*params);
        Ok(())
    }

    fn enter_real_time(&mut self) -> Result<()> {
        if self.params.is_none() {
            return Err(PipelineError::SchedulingConfig("尚未设置周期参数".to_string()));
        }
        self.real_time = true;
        Ok(())
    }

    fn sync_release_wait(&mut self, group: &ReleaseGroup) -> Result<Instant> {
        if !self.real_time {
            return Err(PipelineError::SchedulingConfig("未进入实时模式".to_string()));
        }
        let release = group.wait();
        self.release = Some(release);
        self.current_release = Some(release);
        self.next_job = 1;
        self.job_start = None;
        Ok(release)
    }

    fn wait_next_period(&mut self) -> Result<PeriodTick> {
        let (Some(params), Some(release)) = (self.params, self.release) else {
            return Err(PipelineError::SchedulingConfig("尚未同步释放".to_string()));
        };
        let now = Instant::now();

        let mut overran = false;
        let mut missed_deadline = false;
        if let (Some(start), Some(job_release)) = (self.job_start, self.current_release) {
            let used = now.duration_since(start);
            overran = used > params.exec_cost;
            missed_deadline = now > job_release + params.relative_deadline;
            if overran {
                self.stats.overruns += 1;
            }
            if missed_deadline {
                self.stats.deadline_misses += 1;
            }
            if overran && params.budget_policy == BudgetPolicy::Enforced {
                return Err(PipelineError::BudgetExceeded {
                    used_ms: used.as_secs_f64() * 1000.0,
                    budget_ms: params.exec_cost.as_secs_f64() * 1000.0,
                });
            }
            if missed_deadline {
                self.warn_late(now, used, &params);
            }
        }

        // 严格晚于当前时刻的第一个边界, 已经过去的边界跳过
        let period_ns = params.period.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(release).as_nanos();
        let k_now = (elapsed / period_ns) as u64 + 1;
        let k = k_now.max(self.next_job);
        let skipped = k - self.next_job;
        self.stats.skipped_periods += skipped;

        let boundary = Self::boundary(release, params.period, k);
        let now = Instant::now();
        if boundary > now {
            thread::sleep(boundary - now);
        }

        self.next_job = k + 1;
        self.current_release = Some(boundary);
        self.job_start = Some(Instant::now());
        self.stats.jobs += 1;

        Ok(PeriodTick {
            job: k,
            release: boundary,
            overran,
            missed_deadline,
            skipped,
        })
    }

    fn enter_background(&mut self) {
        self.real_time = false;
        self.release = None;
        self.current_release = None;
        self.job_start = None;
    }
}
