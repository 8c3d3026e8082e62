// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 监控主循环
//!
//! 单线程同步执行: 读帧 → 检测 → 更新状态机 → (告警) → 输出画面。
//! 状态机只由本循环持有, 停止信号每轮检查一次。

use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::alert::{AlertEvent, DispatchReport, Dispatcher, NotificationKind};
use crate::detection::{count_people, Detector};
use crate::fan::FanStatusSource;
use crate::input::{Frame, FrameSource};
use crate::journal::{AlertJournal, SnapshotStore};
use crate::occupancy::OccupancyTracker;
use crate::overlay::Overlay;
use crate::preview::{FrameSink, NullSink};

pub const TEST_ALERT_MESSAGE: &str = "🧪 Test notification from the classroom monitor";

/// 单轮结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Processed {
        index: u64,
        person_count: u32,
        fan_on: bool,
        alerted: bool,
    },
    /// 检测失败, 本帧不更新状态机
    Skipped,
    EndOfStream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames: u64,
    pub skipped: u64,
    pub alerts: u64,
    pub failed_deliveries: u64,
}

pub struct Monitor {
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    fan: Box<dyn FanStatusSource>,
    tracker: OccupancyTracker,
    dispatcher: Dispatcher,
    snapshots: SnapshotStore,
    journal: AlertJournal,
    overlay: Overlay,
    sink: Box<dyn FrameSink>,
    interval: Duration,
    /// 风扇状态读取失败时沿用上一次的值
    last_fan: bool,
    stats: MonitorStats,
}

impl Monitor {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        fan: Box<dyn FanStatusSource>,
        tracker: OccupancyTracker,
        dispatcher: Dispatcher,
        snapshots: SnapshotStore,
        journal: AlertJournal,
    ) -> Self {
        Self {
            source,
            detector,
            fan,
            tracker,
            dispatcher,
            snapshots,
            journal,
            overlay: Overlay::new(),
            sink: Box::new(NullSink),
            interval: Duration::ZERO,
            last_fan: false,
            stats: MonitorStats::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 每轮最小间隔
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    /// 执行一轮; 只有读帧失败会返回错误
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let frame = match self.source.read()? {
            Some(frame) => frame,
            None => return Ok(TickOutcome::EndOfStream),
        };
        self.stats.frames += 1;

        match self.fan.read() {
            Ok(on) => self.last_fan = on,
            Err(e) => warn!("⚠️ 风扇状态读取失败, 沿用 {}: {:#}", on_off(self.last_fan), e),
        }
        let fan_on = self.last_fan;

        let detections = match self.detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                warn!("⚠️ 第 {} 帧检测失败, 跳过: {:#}", frame.index, e);
                self.stats.skipped += 1;
                return Ok(TickOutcome::Skipped);
            }
        };
        let person_count = count_people(&detections);

        let event = self.tracker.update(person_count, fan_on, frame.instant);
        debug!(
            "帧 {}: 人数={} 风扇={} 状态={:?}",
            frame.index,
            person_count,
            on_off(fan_on),
            self.tracker.phase()
        );

        let annotated = self
            .overlay
            .annotate(&frame.image, &detections, person_count, fan_on);

        let alerted = event.is_some();
        if let Some(event) = event {
            self.handle_alert(event, &frame, &annotated);
        }

        if let Err(e) = self.sink.show(&annotated) {
            warn!("⚠️ 画面输出失败: {:#}", e);
        }

        Ok(TickOutcome::Processed {
            index: frame.index,
            person_count,
            fan_on,
            alerted,
        })
    }

    /// 保存快照 → 投递 → 写告警记录
    fn handle_alert(&mut self, event: AlertEvent, frame: &Frame, annotated: &RgbImage) {
        let ts = frame.captured_at.timestamp();
        let snapshot = match self.snapshots.save(annotated, ts) {
            Ok(path) => path,
            Err(e) => {
                warn!("⚠️ 快照保存失败: {:#}", e);
                self.snapshots.path_for(ts)
            }
        };

        warn!("🚨 {} (人数={}, 风扇={})", event.message, event.people_count, on_off(event.fan_status));
        let event = event.with_snapshot(&snapshot);
        let report = self.dispatcher.dispatch(&event);
        report.log();

        self.stats.alerts += 1;
        self.stats.failed_deliveries += report.failed().count() as u64;

        if let Err(e) = self.journal.record(&frame.captured_at, &snapshot) {
            warn!("⚠️ {:#}", e);
        }
    }

    /// 循环直到收到停止信号、视频流结束或读帧失败
    pub fn run(&mut self, stop: &Receiver<()>) -> Result<MonitorStats> {
        info!("▶️  开始监控: {}", self.source.name());
        info!("🔍 检测器: {}", self.detector.name());
        info!("🌀 风扇状态来源: {}", self.fan.name());
        if self.dispatcher.is_empty() {
            warn!("⚠️ 未配置任何通知通道, 告警只会写入本地记录");
        } else {
            info!("📣 通知通道: {}", self.dispatcher.backend_names().join(", "));
        }

        loop {
            let started = Instant::now();
            if self.tick()? == TickOutcome::EndOfStream {
                info!("⏹️  输入结束");
                break;
            }
            let wait = self.interval.saturating_sub(started.elapsed());
            if stop_requested(stop, wait) {
                info!("⏹️  收到停止信号");
                break;
            }
        }

        info!(
            "📊 共处理 {} 帧, 跳过 {}, 告警 {} 次, 投递失败 {} 次",
            self.stats.frames, self.stats.skipped, self.stats.alerts, self.stats.failed_deliveries
        );
        Ok(self.stats.clone())
    }
}

/// 等待 `wait` 期间检查停止信号; 发送端已关闭时只等待
fn stop_requested(stop: &Receiver<()>, wait: Duration) -> bool {
    if wait.is_zero() {
        return matches!(stop.try_recv(), Ok(()));
    }
    match stop.recv_timeout(wait) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(wait);
            false
        }
    }
}

/// 标准输入读到 `q` 时发出停止信号
pub fn spawn_stdin_stop() -> Receiver<()> {
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new().name("stdin-stop".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("q") {
                let _ = tx.send(());
                break;
            }
        }
    });
    if let Err(e) = spawned {
        warn!("⚠️ 无法监听标准输入: {}", e);
    } else {
        info!("⌨️  输入 q 回车停止");
    }
    rx
}

/// 通过所有通道发送一条测试通知
pub fn send_test_alert(dispatcher: &Dispatcher, fan_on: bool) -> DispatchReport {
    let event = AlertEvent::new(NotificationKind::Info, TEST_ALERT_MESSAGE, 0, fan_on);
    info!("🧪 发送测试通知到 {} 个通道", dispatcher.len());
    let report = dispatcher.dispatch(&event);
    report.log();
    report
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertBackend, Delivery, DispatchError};
    use crate::detection::{BBox, Detection};
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct ScriptedSource {
        base: Instant,
        times: VecDeque<u64>,
        index: u64,
    }

    impl ScriptedSource {
        fn at(secs: &[u64]) -> Self {
            Self {
                base: Instant::now(),
                times: secs.iter().copied().collect(),
                index: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> Result<Option<Frame>> {
            let Some(secs) = self.times.pop_front() else {
                return Ok(None);
            };
            let mut frame = Frame::new(RgbImage::from_pixel(32, 32, image::Rgb([40, 40, 40])), self.index);
            frame.instant = self.base + Duration::from_secs(secs);
            self.index += 1;
            Ok(Some(frame))
        }

        fn name(&self) -> String {
            "scripted".into()
        }
    }

    /// 每帧的人数; `None` 表示检测失败
    struct ScriptedDetector(VecDeque<Option<usize>>);

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            match self.0.pop_front().flatten() {
                Some(n) => Ok((0..n)
                    .map(|i| Detection::new(0, 0.9, BBox::new(i as f32, 0., i as f32 + 4., 8.)))
                    .collect()),
                None => Err(anyhow!("inference failed")),
            }
        }

        fn name(&self) -> String {
            "scripted".into()
        }
    }

    struct ScriptedFan(VecDeque<Option<bool>>);

    impl FanStatusSource for ScriptedFan {
        fn read(&mut self) -> Result<bool> {
            self.0
                .pop_front()
                .flatten()
                .ok_or_else(|| anyhow!("fan offline"))
        }

        fn name(&self) -> String {
            "scripted".into()
        }
    }

    struct Recorder(Rc<RefCell<Vec<AlertEvent>>>);

    impl AlertBackend for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn deliver(&self, event: &AlertEvent) -> Result<Delivery, DispatchError> {
            self.0.borrow_mut().push(event.clone());
            Ok(Delivery::default())
        }
    }

    struct Failing;

    impl AlertBackend for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver(&self, _event: &AlertEvent) -> Result<Delivery, DispatchError> {
            Err(DispatchError::Status(500))
        }
    }

    fn monitor(
        dir: &Path,
        times: &[u64],
        people: Vec<Option<usize>>,
        fan: Vec<Option<bool>>,
        dispatcher: Dispatcher,
    ) -> Monitor {
        Monitor::new(
            Box::new(ScriptedSource::at(times)),
            Box::new(ScriptedDetector(people.into())),
            Box::new(ScriptedFan(fan.into())),
            OccupancyTracker::new(Duration::from_secs(5), "empty room"),
            dispatcher,
            SnapshotStore::new(dir.join("snapshots")).unwrap(),
            AlertJournal::new(dir.join("logs/alerts.log")).unwrap(),
        )
    }

    #[test]
    fn test_alert_saves_snapshot_dispatches_and_journals() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let dispatcher = Dispatcher::new()
            .with_backend(Failing)
            .with_backend(Recorder(sent.clone()));
        let mut m = monitor(
            &dir,
            &[0, 3, 6],
            vec![Some(0), Some(0), Some(0)],
            vec![Some(true); 3],
            dispatcher,
        );

        let stop = bounded::<()>(1).1;
        let stats = m.run(&stop).unwrap();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.alerts, 1);
        assert_eq!(stats.failed_deliveries, 1);

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        let event = &sent[0];
        assert_eq!(event.kind, NotificationKind::Alert);
        assert_eq!(event.message, "empty room");
        assert_eq!(event.people_count, 0);
        assert!(event.fan_status);
        let snapshot = event.snapshot.clone().unwrap();
        assert!(snapshot.exists());
        assert!(snapshot.starts_with(dir.join("snapshots")));

        let journal = std::fs::read_to_string(dir.join("logs/alerts.log")).unwrap();
        assert_eq!(journal.lines().count(), 1);
        assert!(journal.contains("Alert sent. Snapshot: "));
        assert!(journal.trim_end().ends_with(&snapshot.display().to_string()));
    }

    #[test]
    fn test_people_present_no_alert() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut m = monitor(
            &dir,
            &[0, 3, 6, 9],
            vec![Some(0), Some(2), Some(0), Some(0)],
            vec![Some(true); 4],
            Dispatcher::new().with_backend(Recorder(sent.clone())),
        );

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(m.tick().unwrap());
        }
        assert_eq!(
            outcomes[1],
            TickOutcome::Processed {
                index: 1,
                person_count: 2,
                fan_on: true,
                alerted: false
            }
        );
        assert_eq!(outcomes[4], TickOutcome::EndOfStream);
        // 计时在 t=6 重新开始, t=9 未满 5 秒
        assert!(sent.borrow().is_empty());
        assert!(!dir.join("logs/alerts.log").exists());
    }

    #[test]
    fn test_detector_error_skips_tick() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut m = monitor(
            &dir,
            &[0, 3, 6],
            vec![Some(0), None, Some(0)],
            vec![Some(true); 3],
            Dispatcher::new().with_backend(Recorder(sent.clone())),
        );

        assert!(matches!(m.tick().unwrap(), TickOutcome::Processed { .. }));
        assert_eq!(m.tick().unwrap(), TickOutcome::Skipped);
        assert!(matches!(m.tick().unwrap(), TickOutcome::Processed { alerted: true, .. }));
        assert_eq!(m.stats().skipped, 1);
        assert_eq!(sent.borrow().len(), 1);
    }

    #[test]
    fn test_fan_failure_keeps_last_status() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut m = monitor(
            &dir,
            &[0, 3, 6],
            vec![Some(0); 3],
            vec![Some(true), None, None],
            Dispatcher::new().with_backend(Recorder(sent.clone())),
        );
        m.run(&bounded::<()>(1).1).unwrap();
        assert_eq!(sent.borrow().len(), 1);
    }

    #[test]
    fn test_unknown_fan_never_alerts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut m = monitor(
            &dir,
            &[0, 10, 20],
            vec![Some(0); 3],
            vec![None, None, None],
            Dispatcher::new().with_backend(Recorder(sent.clone())),
        );
        m.run(&bounded::<()>(1).1).unwrap();
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn test_stop_signal_checked_each_tick() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let mut m = monitor(
            &dir,
            &[0, 1, 2, 3],
            vec![Some(1); 4],
            vec![Some(false); 4],
            Dispatcher::new(),
        );
        let (tx, rx) = bounded(1);
        tx.send(()).unwrap();
        let stats = m.run(&rx).unwrap();
        assert_eq!(stats.frames, 1);
    }

    #[test]
    fn test_stop_requested_disconnected_waits() {
        let (tx, rx) = bounded::<()>(1);
        drop(tx);
        let started = Instant::now();
        assert!(!stop_requested(&rx, Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!stop_requested(&rx, Duration::ZERO));
    }

    #[test]
    fn test_send_test_alert_is_info() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let dispatcher = Dispatcher::new().with_backend(Recorder(sent.clone()));
        let report = send_test_alert(&dispatcher, true);
        assert!(report.any_delivered());
        assert_eq!(sent.borrow()[0].kind, NotificationKind::Info);
        assert_eq!(sent.borrow()[0].message, TEST_ALERT_MESSAGE);
    }
}
