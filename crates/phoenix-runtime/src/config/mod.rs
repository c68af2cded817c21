//! 运行时配置
//! Runtime configuration
//!
//! 所有字段都有默认值，配置文件只需写出需要覆盖的部分。
//! Every field is defaulted; a config file only names what it overrides.
//!
//! ```toml
//! [reload]
//! roots = ["agents", "shared"]
//! poll_interval_ms = 500
//!
//! [bridge]
//! stop_timeout_ms = 2000
//!
//! [logging]
//! level = "debug"
//! ```

use error_stack::ResultExt;
use phoenix_kernel::config::{self as kernel_config, FileFormat};
use phoenix_kernel::error::{IntoKernelReport, KernelResult};
use phoenix_reload::{BridgeConfig, CoordinatorConfig, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 环境变量前缀，例如 `PHOENIX_RELOAD__POLL_INTERVAL_MS`
/// Environment prefix, e.g. `PHOENIX_RELOAD__POLL_INTERVAL_MS`
pub const ENV_PREFIX: &str = "PHOENIX";

/// 运行时配置
/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub reload: ReloadSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingConfig,
}

/// 热重载设置
/// Hot-reload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadSettings {
    pub roots: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub poll_interval_ms: u64,
    pub load_timeout_ms: u64,
    /// 健康检查阶段总上限
    /// Overall cap on the health-check phase
    pub health_timeout_ms: u64,
    /// 单个探针上限
    /// Cap on a single probe
    pub probe_timeout_ms: u64,
    pub shared_prefixes: Vec<String>,
    pub watch_events: bool,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        let coordinator = CoordinatorConfig::default();
        Self {
            roots: tracker.roots,
            extensions: tracker.extensions,
            exclude: tracker.exclude,
            recursive: tracker.recursive,
            poll_interval_ms: coordinator.poll_interval.as_millis() as u64,
            load_timeout_ms: coordinator.load_timeout.as_millis() as u64,
            health_timeout_ms: coordinator.health_timeout.as_millis() as u64,
            probe_timeout_ms: coordinator.probe_timeout.as_millis() as u64,
            shared_prefixes: coordinator.shared_prefixes,
            watch_events: coordinator.watch_events,
        }
    }
}

/// Agent 替换设置
/// Agent swap settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub stop_timeout_ms: u64,
    pub start_timeout_ms: u64,
    pub max_reports: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            stop_timeout_ms: bridge.stop_timeout.as_millis() as u64,
            start_timeout_ms: bridge.start_timeout.as_millis() as u64,
            max_reports: bridge.max_reports,
        }
    }
}

/// 日志设置
/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `RUST_LOG` 未设置时使用的过滤级别
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// 从文件加载，并应用 `PHOENIX_` 环境变量覆盖
    /// Load from a file and apply `PHOENIX_` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        kernel_config::load_with_env(path, ENV_PREFIX)
            .into_report()
            .attach(format!("loading runtime config from {}", path.display()))
    }

    /// 从字符串加载（不应用环境变量覆盖）
    /// Load from a string without environment overrides
    pub fn from_str(content: &str, format: FileFormat) -> KernelResult<Self> {
        kernel_config::from_str(content, format)
            .into_report()
            .attach("parsing runtime config")
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            roots: self.reload.roots.clone(),
            extensions: self.reload.extensions.clone(),
            exclude: self.reload.exclude.clone(),
            recursive: self.reload.recursive,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(self.reload.poll_interval_ms),
            load_timeout: Duration::from_millis(self.reload.load_timeout_ms),
            health_timeout: Duration::from_millis(self.reload.health_timeout_ms),
            probe_timeout: Duration::from_millis(self.reload.probe_timeout_ms),
            shared_prefixes: self.reload.shared_prefixes.clone(),
            watch_events: self.reload.watch_events,
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new()
            .with_stop_timeout(Duration::from_millis(self.bridge.stop_timeout_ms))
            .with_start_timeout(Duration::from_millis(self.bridge.start_timeout_ms))
            .with_max_reports(self.bridge.max_reports)
    }
}
