// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 周期任务调控 (Periodic Task Governor)
///
/// 状态: Background → ReleaseWait → RealTime → Background
/// - configure:        只能在 Background 设置周期参数
/// - enter_real_time:  登记 + 等待组同步释放, 返回 `RealTimeSection`
/// - RealTimeSection:  每个作业后调用 wait_next_period; drop 时回到 Background
pub mod authority;
pub mod params;
pub mod release;

pub use authority::{PeriodTick, SchedulingAuthority, TimingStats, WallClockAuthority};
pub use params::{BudgetPolicy, PeriodicTaskParams, TaskClass, LOWEST_PRIORITY};
pub use release::ReleaseGroup;

use std::time::Instant;

use tracing::info;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    Background,
    ReleaseWait,
    RealTime,
}

pub struct PeriodicGovernor<A: SchedulingAuthority> {
    authority: A,
    mode: TaskMode,
    params: Option<PeriodicTaskParams>,
}

impl<A: SchedulingAuthority> PeriodicGovernor<A> {
    pub fn new(authority: A) -> Self {
        Self {
            authority,
            mode: TaskMode::Background,
            params: None,
        }
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    pub fn params(&self) -> Option<&PeriodicTaskParams> {
        self.params.as_ref()
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn configure(&mut self, params: PeriodicTaskParams) -> Result<()> {
        if self.mode != TaskMode::Background {
            return Err(PipelineError::SchedulingConfig(format!(
                "只能在后台模式设置周期参数 (当前 {:?})",
                self.mode
            )));
        }
        params.validate()?;
        self.authority.configure(&params)?;
        info!(
            "⏱️ 周期任务参数: 周期 {:?}, 截止 {:?}, 预算 {:?}, {:?}/{:?}, 优先级 {}",
            params.period,
            params.relative_deadline,
            params.exec_cost,
            params.class,
            params.budget_policy,
            params.priority
        );
        self.params = Some(params);
        Ok(())
    }

    /// 进入实时模式并等待同步释放
    pub fn enter_real_time(&mut self, group: &ReleaseGroup) -> Result<RealTimeSection<'_, A>> {
        if self.params.is_none() {
            return Err(PipelineError::SchedulingConfig("尚未设置周期参数".to_string()));
        }
        if self.mode != TaskMode::Background {
            return Err(PipelineError::SchedulingConfig(format!(
                "重复进入实时模式 (当前 {:?})",
                self.mode
            )));
        }

        self.authority.enter_real_time()?;
        self.mode = TaskMode::ReleaseWait;
        let release = match self.authority.sync_release_wait(group) {
            Ok(release) => release,
            Err(e) => {
                self.authority.enter_background();
                self.mode = TaskMode::Background;
                return Err(e);
            }
        };
        self.mode = TaskMode::RealTime;
        info!("🟢 进入实时模式");

        Ok(RealTimeSection {
            governor: self,
            release,
        })
    }
}

/// 实时模式区段; drop 时 (包括出错和 panic 展开) 回到后台模式
pub struct RealTimeSection<'a, A: SchedulingAuthority> {
    governor: &'a mut PeriodicGovernor<A>,
    release: Instant,
}

impl<A: SchedulingAuthority> RealTimeSection<'_, A> {
    pub fn release(&self) -> Instant {
        self.release
    }

    pub fn mode(&self) -> TaskMode {
        self.governor.mode
    }

    pub fn wait_next_period(&mut self) -> Result<PeriodTick> {
        self.governor.authority.wait_next_period()
    }
}

impl<A: SchedulingAuthority> Drop for RealTimeSection<'_, A> {
    fn drop(&mut self) {
        self.governor.authority.enter_background();
        self.governor.mode = TaskMode::Background;
        info!("⚪ 回到后台模式");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        calls: Vec<&'static str>,
        reject: bool,
    }

    impl SchedulingAuthority for Recording {
        fn configure(&mut self, _params: &PeriodicTaskParams) -> Result<()> {
            self.calls.push("configure");
            if self.reject {
                return Err(PipelineError::SchedulingConfig("rejected".to_string()));
            }
            Ok(())
        }

        fn enter_real_time(&mut self) -> Result<()> {
            self.calls.push("enter_real_time");
            Ok(())
        }

        fn sync_release_wait(&mut self, group: &ReleaseGroup) -> Result<Instant> {
            self.calls.push("sync_release_wait");
            Ok(group.wait())
        }

        fn wait_next_period(&mut self) -> Result<PeriodTick> {
            self.calls.push("wait_next_period");
            Ok(PeriodTick {
                job: 1,
                release: Instant::now(),
                overran: false,
                missed_deadline: false,
                skipped: 0,
            })
        }

        fn enter_background(&mut self) {
            self.calls.push("enter_background");
        }
    }

    #[test]
    fn test_lifecycle_call_order() {
        let mut gov = PeriodicGovernor::new(Recording::default());
        gov.configure(PeriodicTaskParams::default()).unwrap();
        {
            let mut section = gov.enter_real_time(&ReleaseGroup::solo()).unwrap();
            assert_eq!(section.mode(), TaskMode::RealTime);
            section.wait_next_period().unwrap();
        }
        assert_eq!(gov.mode(), TaskMode::Background);
        assert_eq!(
            gov.authority().calls,
            vec![
                "configure",
                "enter_real_time",
                "sync_release_wait",
                "wait_next_period",
                "enter_background"
            ]
        );
    }

    #[test]
    fn test_enter_without_params_rejected() {
        let mut gov = PeriodicGovernor::new(Recording::default());
        assert!(gov.enter_real_time(&ReleaseGroup::solo()).is_err());
        assert_eq!(gov.mode(), TaskMode::Background);
    }

    #[test]
    fn test_invalid_params_never_reach_authority() {
        let mut gov = PeriodicGovernor::new(Recording::default());
        let bad = PeriodicTaskParams::from_millis(100, 200, 10);
        assert!(matches!(gov.configure(bad), Err(PipelineError::SchedulingConfig(_))));
        assert!(gov.authority().calls.is_empty());
    }

    #[test]
    fn test_authority_rejection_propagates() {
        let mut gov = PeriodicGovernor::new(Recording {
            reject: true,
            ..Default::default()
        });
        assert!(gov.configure(PeriodicTaskParams::default()).is_err());
        assert!(gov.params().is_none());
    }

    #[test]
    fn test_background_restored_on_panic() {
        let mut gov = PeriodicGovernor::new(Recording::default());
        gov.configure(PeriodicTaskParams::from_millis(10, 10, 1)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _section = gov.enter_real_time(&ReleaseGroup::new(1, Duration::ZERO)).unwrap();
            panic!("job failed");
        }));
        assert!(result.is_err());
        assert_eq!(gov.mode(), TaskMode::Background);
        assert_eq!(gov.authority().calls.last(), Some(&"enter_background"));
    }
}
