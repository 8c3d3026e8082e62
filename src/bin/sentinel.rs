// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 教室值守 (Classroom Sentinel)
//!
//! 摄像头画面中无人、风扇仍开启且持续超过设定时间时,
//! 保存快照并通过通知服务器 / Telegram 发出告警。
//!
//! 运行流程:
//! 1. 解析命令行 / 环境变量 / JSON 配置
//! 2. 加载 YOLOv8 模型, 打开输入源与风扇状态来源
//! 3. 主线程同步循环: 读帧 → 检测 → 状态机 → 告警 → 输出画面

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use occupancy_sentinel::alert::{build_dispatcher, http_agent};
use occupancy_sentinel::config::Args;
use occupancy_sentinel::detection::YoloDetector;
use occupancy_sentinel::fan::open_fan_source;
use occupancy_sentinel::input::open_source;
use occupancy_sentinel::journal::{AlertJournal, SnapshotStore};
use occupancy_sentinel::monitor::{send_test_alert, spawn_stdin_stop, Monitor};
use occupancy_sentinel::occupancy::OccupancyTracker;
use occupancy_sentinel::overlay::Overlay;
use occupancy_sentinel::preview::{FrameSink, NullSink, PreviewFile};

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("🚀 教室值守系统启动");
    let config = args.resolve()?;
    config.print_summary();

    let agent = http_agent(config.http_timeout());
    let dispatcher = build_dispatcher(&config, &agent);
    let mut fan = open_fan_source(&config.fan_spec()?, &agent);

    if args.test_alert {
        if dispatcher.is_empty() {
            bail!("未配置任何通知通道 (--server-url 或 --telegram-token/--telegram-chat-id)");
        }
        let fan_on = fan.read().unwrap_or_else(|e| {
            warn!("⚠️ 风扇状态读取失败: {:#}", e);
            false
        });
        let report = send_test_alert(&dispatcher, fan_on);
        if !report.any_delivered() {
            bail!("测试通知全部发送失败");
        }
        info!("✅ 测试通知已发送");
        return Ok(());
    }

    let snapshots = SnapshotStore::new(&config.snapshot_dir)?;
    info!("📁 快照目录: {}", snapshots.dir().display());
    let journal = AlertJournal::new(&config.log_file)?;

    let detector = YoloDetector::new(config.yolo_config()).context("检测器初始化失败")?;
    info!("✅ 模型加载完成");

    let source = match open_source(&config.source_spec()?, config.loop_source, &agent) {
        Ok(source) => source,
        Err(e) => {
            error!("❌ 无法打开输入源 {}: {:#}", config.source, e);
            return Err(e);
        }
    };

    let overlay = match &config.font {
        Some(path) => Overlay::with_font_file(path).unwrap_or_else(|e| {
            warn!("⚠️ {:#}, 标注不显示文字", e);
            Overlay::new()
        }),
        None => Overlay::new(),
    };

    let sink: Box<dyn FrameSink> = match &config.preview {
        Some(path) => {
            info!("🖼️  预览画面: {}", path.display());
            Box::new(PreviewFile::new(path, 1)?)
        }
        None => Box::new(NullSink),
    };

    let tracker = OccupancyTracker::new(config.alert_delay(), config.alert_message.clone());

    let mut monitor = Monitor::new(
        source,
        Box::new(detector),
        fan,
        tracker,
        dispatcher,
        snapshots,
        journal,
    )
    .with_overlay(overlay)
    .with_sink(sink)
    .with_interval(config.interval());

    let stop = spawn_stdin_stop();
    let stats = monitor.run(&stop)?;

    info!("👋 退出 (告警 {} 次)", stats.alerts);
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("occupancy_sentinel=debug,sentinel=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
