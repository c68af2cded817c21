//! 运行时上下文
//! Runtime context
//!
//! 进程启动时构建一次，持有注册中心、消息总线、重载协调器和状态桥，
//! 并提供显式的 `start` / `shutdown`。
//! Built once at process start. Owns the registry, the message bus, the
//! reload coordinator and the state bridge, with explicit `start` and
//! `shutdown`.

use crate::agent::AgentRegistry;
use crate::bus::AgentMessageBus;
use crate::config::RuntimeConfig;
use error_stack::{Report, ResultExt};
use phoenix_kernel::error::{IntoKernelReport, KernelError, KernelResult};
use phoenix_kernel::Orchestrator;
use phoenix_reload::{
    AgentManifest, AgentStateBridge, BridgeHandle, ChangeTracker, FileUnitLoader, PollerHandle,
    ReloadCoordinator, ReloadStatus, TransactionRecord, UnitLoader,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 后台任务句柄
/// Handles of the background tasks
struct Running {
    poller: PollerHandle,
    bridge: BridgeHandle,
}

/// 运行时上下文
/// Runtime context
///
/// # 示例
/// # Example
///
/// ```rust,ignore
/// let ctx = RuntimeContext::from_file("phoenix.toml")?;
/// ctx.manifest().register("agents/solomon", "solomon", |unit| {
///     Ok(Box::new(Solomon::from_definition(&unit.definition)?))
/// });
/// ctx.start().await?;
/// ctx.launch_agent("solomon").await?;
/// // ...
/// ctx.shutdown().await;
/// ```
pub struct RuntimeContext {
    config: RuntimeConfig,
    registry: Arc<AgentRegistry>,
    bus: Arc<AgentMessageBus>,
    manifest: Arc<AgentManifest>,
    coordinator: Arc<ReloadCoordinator>,
    bridge: Arc<AgentStateBridge>,
    file_loader: Option<Arc<FileUnitLoader>>,
    running: Mutex<Option<Running>>,
}

impl RuntimeContext {
    /// 使用文件加载器构建
    /// Build with the file unit loader
    pub fn new(config: RuntimeConfig) -> Self {
        let loader = Arc::new(FileUnitLoader::new());
        let mut ctx = Self::with_loader(config, loader.clone());
        ctx.file_loader = Some(loader);
        ctx
    }

    /// 使用自定义加载器构建
    /// Build with a custom unit loader
    pub fn with_loader(config: RuntimeConfig, loader: Arc<dyn UnitLoader>) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(AgentMessageBus::new(registry.clone()));
        let manifest = Arc::new(AgentManifest::new());
        let tracker = Arc::new(ChangeTracker::new(config.tracker_config()));
        let coordinator = Arc::new(ReloadCoordinator::new(
            config.coordinator_config(),
            tracker,
            loader,
        ));
        let bridge = Arc::new(AgentStateBridge::new(
            config.bridge_config(),
            coordinator.clone(),
            manifest.clone(),
            registry.clone(),
            bus.clone(),
        ));

        Self {
            config,
            registry,
            bus,
            manifest,
            coordinator,
            bridge,
            file_loader: None,
            running: Mutex::new(None),
        }
    }

    /// 从配置文件构建
    /// Build from a config file
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        Ok(Self::new(RuntimeConfig::from_file(path)?))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub fn bus(&self) -> Arc<AgentMessageBus> {
        self.bus.clone()
    }

    pub fn manifest(&self) -> Arc<AgentManifest> {
        self.manifest.clone()
    }

    pub fn coordinator(&self) -> Arc<ReloadCoordinator> {
        self.coordinator.clone()
    }

    pub fn bridge(&self) -> Arc<AgentStateBridge> {
        self.bridge.clone()
    }

    /// 文件加载器（用于注册健康探针）
    /// The file loader, for registering health probes
    pub fn file_loader(&self) -> Option<Arc<FileUnitLoader>> {
        self.file_loader.clone()
    }

    pub fn status(&self) -> ReloadStatus {
        self.coordinator.status()
    }

    pub async fn is_started(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// 首次装载、挂接状态桥并启动轮询
    /// Bootstrap the units, attach the bridge and start polling
    ///
    /// 返回首次事务的记录；没有可跟踪单元时为 `None`。
    /// Returns the bootstrap transaction, or `None` when nothing is tracked.
    pub async fn start(&self) -> KernelResult<Option<TransactionRecord>> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Report::new(KernelError::Internal(
                "runtime context already started".to_string(),
            )));
        }

        let record = self.coordinator.bootstrap().await;
        if let Some(record) = record.as_ref().filter(|r| !r.is_committed()) {
            warn!(
                "Bootstrap transaction {} ended {}: {}",
                record.transaction_id,
                record.status,
                record.error.as_deref().unwrap_or("no error recorded")
            );
        }

        let bridge = self.bridge.attach();
        let poller = self.coordinator.spawn_poller();
        *running = Some(Running { poller, bridge });

        info!(
            "Runtime started: {} unit(s) tracked, active slot {}",
            self.coordinator.tracker().len(),
            self.coordinator.slots().active_name()
        );
        Ok(record)
    }

    /// 用清单中的构造器创建并启动 Agent
    /// Construct and start an agent from its manifest binding
    pub async fn launch_agent(&self, name: &str) -> KernelResult<()> {
        let (unit_id, constructor) = self.manifest.resolve(name).ok_or_else(|| {
            Report::new(KernelError::Internal(format!(
                "agent {} has no manifest binding",
                name
            )))
        })?;
        let unit = self.coordinator.active_unit(&unit_id).ok_or_else(|| {
            Report::new(KernelError::Internal(format!(
                "unit {} is not loaded in the active slot",
                unit_id
            )))
        })?;

        let agent = constructor(unit.as_ref())
            .into_report()
            .attach(format!("constructing agent {} from unit {}", name, unit_id))?;
        if agent.name() != name {
            return Err(Report::new(KernelError::Internal(format!(
                "constructor for {} built an agent named {}",
                name,
                agent.name()
            ))));
        }

        self.registry
            .register_agent(agent)
            .await
            .into_report()
            .attach(format!("registering agent {}", name))?;
        self.registry
            .start_agent(name)
            .await
            .into_report()
            .attach(format!("starting agent {}", name))?;

        let mut instances = 0;
        for agent in self.manifest.agents_for(&unit_id) {
            if self.registry.status(&agent).await.is_some_and(|s| s.is_running()) {
                instances += 1;
            }
        }
        self.coordinator.tracker().set_instance_count(&unit_id, instances);

        info!("Launched agent {} from unit {}", name, unit_id);
        Ok(())
    }

    /// 停止轮询与状态桥，然后停止所有 Agent
    /// Stop polling and the bridge, then every agent
    pub async fn shutdown(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.poller.stop().await;
            running.bridge.stop().await;
        }

        for (agent, e) in self.registry.stop_all().await {
            warn!("Agent {} did not stop cleanly: {}", agent, e);
        }
        info!("Runtime shut down");
    }
}
