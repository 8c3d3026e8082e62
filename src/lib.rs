// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alert; // 告警分发 (Webhook / Telegram)
pub mod config; // 命令行与 JSON 配置
pub mod detection; // YOLOv8 人员检测
pub mod fan; // 风扇状态来源
pub mod input; // 视频输入系统
pub mod journal; // 快照与告警记录
pub mod monitor; // 监控主循环
pub mod occupancy; // 无人计时状态机
pub mod overlay; // 画面标注
pub mod preview; // 画面输出

pub use crate::alert::{AlertBackend, AlertEvent, DispatchError, Dispatcher, NotificationKind};
pub use crate::config::{Args, SentinelConfig};
pub use crate::detection::{Detection, Detector, YoloDetector};
pub use crate::monitor::{Monitor, MonitorStats, TickOutcome};
pub use crate::occupancy::{OccupancyState, OccupancyTracker, Phase};
