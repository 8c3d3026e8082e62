// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 占用状态机 (Occupancy Tracker)
//!
//! 每帧输入 `(人数, 风扇状态, 时间)`, 输出可选的告警事件。
//!
//! ```text
//! OccupiedOrFanOff ──(0人 & 风扇开)──▶ EmptyFanOnWaiting
//!        ▲                                  │ 持续 >= alert_delay
//!        │                                  ▼
//!        └────(有人 / 风扇关)───── EmptyFanOnAlerted (重新计时)
//! ```
//!
//! 告警后 `empty_since` 重置为当前时间 (不清空), 下一次告警需再等一个完整的延迟周期。

use std::time::{Duration, Instant};

use crate::alert::{AlertEvent, NotificationKind};

/// 状态机所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 有人, 或风扇关闭
    OccupiedOrFanOff,
    /// 无人且风扇开启, 计时中
    EmptyFanOnWaiting,
    /// 本轮已告警至少一次, 已重新计时
    EmptyFanOnAlerted,
}

/// 单帧观测值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub person_count: u32,
    pub fan_on: bool,
    pub at: Instant,
}

impl Observation {
    pub fn new(person_count: u32, fan_on: bool, at: Instant) -> Self {
        Self {
            person_count,
            fan_on,
            at,
        }
    }

    /// 无人且风扇开启
    pub fn is_empty_with_fan_on(&self) -> bool {
        self.person_count == 0 && self.fan_on
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyState {
    pub person_count: u32,
    pub fan_on: bool,
    /// 仅在 "无人且风扇开" 连续成立期间非空
    pub empty_since: Option<Instant>,
    /// 当前无人区间内已触发的告警次数
    pub alerts_in_run: u32,
}

impl OccupancyState {
    pub fn phase(&self) -> Phase {
        match (self.empty_since, self.alerts_in_run) {
            (None, _) => Phase::OccupiedOrFanOff,
            (Some(_), 0) => Phase::EmptyFanOnWaiting,
            (Some(_), _) => Phase::EmptyFanOnAlerted,
        }
    }

    /// 距离上次计时起点的时长
    pub fn waiting_for(&self, now: Instant) -> Option<Duration> {
        self.empty_since
            .map(|since| now.saturating_duration_since(since))
    }
}

/// 纯状态转移: (状态, 观测) → (新状态, 可选告警)
pub fn step(
    state: &OccupancyState,
    obs: &Observation,
    alert_delay: Duration,
    message: &str,
) -> (OccupancyState, Option<AlertEvent>) {
    if !obs.is_empty_with_fan_on() {
        let next = OccupancyState {
            person_count: obs.person_count,
            fan_on: obs.fan_on,
            empty_since: None,
            alerts_in_run: 0,
        };
        return (next, None);
    }

    match state.empty_since {
        None => {
            let next = OccupancyState {
                person_count: obs.person_count,
                fan_on: obs.fan_on,
                empty_since: Some(obs.at),
                alerts_in_run: 0,
            };
            (next, None)
        }
        Some(since) if obs.at.saturating_duration_since(since) >= alert_delay => {
            let next = OccupancyState {
                person_count: obs.person_count,
                fan_on: obs.fan_on,
                empty_since: Some(obs.at),
                alerts_in_run: state.alerts_in_run + 1,
            };
            let event = AlertEvent::new(
                NotificationKind::Alert,
                message,
                obs.person_count,
                obs.fan_on,
            );
            (next, Some(event))
        }
        Some(since) => {
            let next = OccupancyState {
                person_count: obs.person_count,
                fan_on: obs.fan_on,
                empty_since: Some(since),
                alerts_in_run: state.alerts_in_run,
            };
            (next, None)
        }
    }
}

/// 带状态的追踪器, 由采集循环独占
#[derive(Debug, Clone)]
pub struct OccupancyTracker {
    state: OccupancyState,
    alert_delay: Duration,
    message: String,
}

impl OccupancyTracker {
    pub fn new(alert_delay: Duration, message: impl Into<String>) -> Self {
        Self {
            state: OccupancyState::default(),
            alert_delay,
            message: message.into(),
        }
    }

    pub fn update(&mut self, person_count: u32, fan_on: bool, now: Instant) -> Option<AlertEvent> {
        let obs = Observation::new(person_count, fan_on, now);
        let (next, event) = step(&self.state, &obs, self.alert_delay, &self.message);
        self.state = next;
        event
    }

    pub fn state(&self) -> &OccupancyState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }
}
