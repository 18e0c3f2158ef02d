// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 周期任务调控: 超支、预算强制、同步释放

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use yolo_rt::realtime::{
    BudgetPolicy, PeriodicGovernor, PeriodicTaskParams, ReleaseGroup, TaskMode,
    WallClockAuthority,
};
use yolo_rt::PipelineError;

fn governor(params: PeriodicTaskParams) -> PeriodicGovernor<WallClockAuthority> {
    let mut governor = PeriodicGovernor::new(WallClockAuthority::new());
    governor.configure(params).unwrap();
    governor
}

#[test]
fn unenforced_overrun_waits_for_next_boundary() {
    let mut gov = governor(PeriodicTaskParams::from_millis(100, 100, 10));
    let group = ReleaseGroup::solo();
    let mut section = gov.enter_real_time(&group).unwrap();
    let release = section.release();

    let period = Duration::from_millis(100);
    let first = section.wait_next_period().unwrap();
    assert_eq!(first.release, release + period * first.job as u32);

    // 150ms 的作业至少跨过一个边界
    thread::sleep(Duration::from_millis(150));
    let next = section.wait_next_period().unwrap();

    assert!(next.overran);
    assert!(next.missed_deadline);
    assert!(next.skipped >= 1);
    assert_eq!(next.job, first.job + 1 + next.skipped);
    assert_eq!(next.release, release + period * next.job as u32);
    assert!(Instant::now() >= next.release);
    drop(section);

    let stats = gov.authority().stats();
    assert_eq!(stats.overruns, 1);
    assert_eq!(stats.deadline_misses, 1);
    assert_eq!(gov.mode(), TaskMode::Background);
}

#[test]
fn jobs_within_budget_keep_cadence() {
    let mut gov = governor(PeriodicTaskParams::from_millis(20, 20, 15));
    let group = ReleaseGroup::solo();
    let mut section = gov.enter_real_time(&group).unwrap();

    let release = section.release();
    let period = Duration::from_millis(20);

    let ticks: Vec<_> = (0..4)
        .map(|_| {
            let tick = section.wait_next_period().unwrap();
            thread::sleep(Duration::from_millis(2));
            tick
        })
        .collect();

    // 每个作业都落在释放时刻 + k 个周期上, 序号只增不减
    for tick in &ticks {
        assert_eq!(tick.release, release + period * tick.job as u32);
    }
    for pair in ticks.windows(2) {
        assert_eq!(pair[1].job, pair[0].job + 1 + pair[1].skipped);
    }
}

#[test]
fn enforced_budget_aborts_and_returns_to_background() {
    let params = PeriodicTaskParams::from_millis(50, 50, 5).with_policy(BudgetPolicy::Enforced);
    let mut gov = governor(params);
    let group = ReleaseGroup::solo();
    {
        let mut section = gov.enter_real_time(&group).unwrap();
        section.wait_next_period().unwrap();
        thread::sleep(Duration::from_millis(20));
        let err = section.wait_next_period().unwrap_err();
        assert!(matches!(err, PipelineError::BudgetExceeded { .. }));
    }
    assert_eq!(gov.mode(), TaskMode::Background);

    // 回到后台后可以重新设置参数
    assert!(gov
        .configure(PeriodicTaskParams::from_millis(50, 50, 40))
        .is_ok());
}

#[test]
fn group_members_start_on_the_same_boundary() {
    let group = Arc::new(ReleaseGroup::new(2, Duration::from_millis(10)));
    let handles: Vec<_> = (0..2)
        .map(|i| {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(15 * i));
                let mut gov = governor(PeriodicTaskParams::from_millis(30, 30, 10));
                let mut section = gov.enter_real_time(&group).unwrap();
                let tick = section.wait_next_period().unwrap();
                (section.release(), tick.release)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0], results[1]);
}

#[test]
fn params_from_video_rate() {
    let params = PeriodicTaskParams::from_fps(30.0).unwrap();
    let mut gov = governor(params);
    assert_eq!(gov.params().map(|p| p.period), Some(params.period));
    assert!(gov.configure(PeriodicTaskParams::from_millis(10, 20, 5)).is_err());
    // 被拒绝的参数不会覆盖已生效的参数
    assert_eq!(gov.params().copied(), Some(params));
}
