// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 周期任务参数

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// 最低优先级 (数值越大优先级越低)
pub const LOWEST_PRIORITY: u32 = 511;

pub const DEFAULT_PERIOD_MS: u64 = 100;
pub const DEFAULT_DEADLINE_MS: u64 = 100;
pub const DEFAULT_EXEC_COST_MS: u64 = 10;

/// 执行预算超支时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    /// 超支时 wait_next_period 返回 BudgetExceeded
    Enforced,
    /// 超支的作业跑完, 只计数和告警
    #[default]
    Unenforced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    Hard,
    #[default]
    Soft,
    BestEffort,
}

/// 进入实时模式前设置一次, 运行期间不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTaskParams {
    pub period: Duration,
    pub relative_deadline: Duration,
    pub exec_cost: Duration,
    pub budget_policy: BudgetPolicy,
    pub class: TaskClass,
    pub priority: u32,
    pub cpu: Option<usize>,
}

impl Default for PeriodicTaskParams {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(DEFAULT_PERIOD_MS),
            relative_deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
            exec_cost: Duration::from_millis(DEFAULT_EXEC_COST_MS),
            budget_policy: BudgetPolicy::Unenforced,
            class: TaskClass::Soft,
            priority: LOWEST_PRIORITY,
            cpu: None,
        }
    }
}

impl PeriodicTaskParams {
    pub fn from_millis(period: u64, deadline: u64, cost: u64) -> Self {
        Self {
            period: Duration::from_millis(period),
            relative_deadline: Duration::from_millis(deadline),
            exec_cost: Duration::from_millis(cost),
            ..Default::default()
        }
    }

    /// 周期和截止时间取 1000/fps 毫秒; 预算不超过截止时间
    pub fn from_fps(fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(PipelineError::SchedulingConfig(format!("帧率无效: {}", fps)));
        }
        let period = Duration::from_secs_f64(1.0 / fps);
        let defaults = Self::default();
        Ok(Self {
            period,
            relative_deadline: period,
            exec_cost: defaults.exec_cost.min(period),
            ..defaults
        })
    }

    pub fn with_policy(mut self, policy: BudgetPolicy) -> Self {
        self.budget_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(PipelineError::SchedulingConfig("周期不能为0".to_string()));
        }
        if self.relative_deadline.is_zero() {
            return Err(PipelineError::SchedulingConfig("截止时间不能为0".to_string()));
        }
        if self.relative_deadline > self.period {
            return Err(PipelineError::SchedulingConfig(format!(
                "截止时间 {:?} 大于周期 {:?}",
                self.relative_deadline, self.period
            )));
        }
        if self.exec_cost.is_zero() {
            return Err(PipelineError::SchedulingConfig("执行预算不能为0".to_string()));
        }
        if self.exec_cost > self.relative_deadline {
            return Err(PipelineError::SchedulingConfig(format!(
                "执行预算 {:?} 大于截止时间 {:?}",
                self.exec_cost, self.relative_deadline
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let p = PeriodicTaskParams::default();
        assert_eq!(p.period, Duration::from_millis(100));
        assert_eq!(p.budget_policy, BudgetPolicy::Unenforced);
        assert_eq!(p.class, TaskClass::Soft);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_params() {
        let bad = [
            PeriodicTaskParams::from_millis(0, 0, 0),
            PeriodicTaskParams::from_millis(100, 150, 10),
            PeriodicTaskParams::from_millis(100, 100, 0),
            PeriodicTaskParams::from_millis(100, 50, 60),
        ];
        for p in bad {
            assert!(matches!(p.validate(), Err(PipelineError::SchedulingConfig(_))), "{:?}", p);
        }
    }

    #[test]
    fn test_from_fps() {
        let p = PeriodicTaskParams::from_fps(25.0).unwrap();
        assert_eq!(p.period, Duration::from_millis(40));
        assert_eq!(p.relative_deadline, p.period);
        assert!(p.validate().is_ok());

        // 预算被截到周期以内
        let fast = PeriodicTaskParams::from_fps(200.0).unwrap();
        assert_eq!(fast.exec_cost, Duration::from_millis(5));

        assert!(PeriodicTaskParams::from_fps(0.0).is_err());
        assert!(PeriodicTaskParams::from_fps(f64::NAN).is_err());
    }
}
