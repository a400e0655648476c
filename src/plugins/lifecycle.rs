// 插件生命周期监督器
// 驱动插件状态机并协调作用域、存储和文件目录

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pluginix_common::{PluginId, Timestamped};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::errors::PluginHostError;
use crate::plugins::plugin_interface::{LifecycleState, Plugin, PluginContext};
use crate::plugins::resources::{PluginFileExtensions, ResourceContainer};
use crate::plugins::scope::PluginScope;
use crate::plugins::storage::PluginStorage;

/// 监督器配置
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// 插件捆绑包目录
    pub bundles_path: PathBuf,
    /// 持久化数据根目录
    pub data_path: PathBuf,
    /// 持久化配置根目录
    pub config_path: PathBuf,
    /// 插件可写文件根目录
    pub data_folders_path: PathBuf,
    /// 钩子调用超时
    pub hook_timeout: Duration,
    /// 禁用时的任务排空宽限期
    pub disable_grace: Duration,
    /// 存储保存合并窗口
    pub flush_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_host_config(&HostConfig::default())
    }
}

impl SupervisorConfig {
    /// 从宿主配置构建
    pub fn from_host_config(config: &HostConfig) -> Self {
        Self {
            bundles_path: PathBuf::from(&config.plugins.bundles_path),
            data_path: PathBuf::from(&config.plugins.data_path),
            config_path: PathBuf::from(&config.plugins.config_path),
            data_folders_path: PathBuf::from(&config.plugins.data_folders_path),
            hook_timeout: config.lifecycle.hook_timeout(),
            disable_grace: config.lifecycle.disable_grace(),
            flush_delay: config.storage.flush_delay(),
        }
    }
}

/// 插件生命周期监督器
///
/// 宿主侧的唯一入口: 注册插件、驱动状态机、在禁用时排空作用域、
/// 在卸载时同步刷写存储. 单个插件的转换被其私有闸门串行化,
/// 不同插件之间互不阻塞; 插件内部的钩子失败只影响该插件.
pub struct PluginSupervisor {
    config: SupervisorConfig,
    data_storage: Arc<PluginStorage>,
    config_storage: Arc<PluginStorage>,
    plugins: RwLock<HashMap<PluginId, Arc<PluginEntry>>>,
    retired: RwLock<HashSet<PluginId>>,
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    context: PluginContext,
    scope: Arc<PluginScope>,
    active: Arc<AtomicBool>,
    // 转换闸门: 持锁跨越钩子调用, 串行化同一插件的状态转换
    gate: Mutex<EntryState>,
}

struct EntryState {
    state: LifecycleState,
    errors: Vec<Timestamped<String>>,
}

impl PluginSupervisor {
    /// 创建新的监督器
    pub fn new(config: SupervisorConfig) -> Self {
        let data_storage = Arc::new(PluginStorage::new(&config.data_path, config.flush_delay));
        let config_storage = Arc::new(PluginStorage::new(&config.config_path, config.flush_delay));

        Self {
            config,
            data_storage,
            config_storage,
            plugins: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashSet::new()),
        }
    }

    /// 注册插件实例
    ///
    /// 为插件构建上下文（作用域、存储、资源、文件目录）并进入
    /// `Constructed` 状态. 同一 ID 在前一个实例卸载之后允许用新实例
    /// 重新注册, 新实例会重新走一遍完整生命周期.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginHostError> {
        let descriptor = plugin.descriptor().clone();
        let plugin_id = descriptor.id.clone();

        let mut plugins = self.plugins.write().await;
        if plugins.contains_key(&plugin_id) {
            return Err(PluginHostError::conflict(format!(
                "插件已注册: {}",
                plugin_id
            )));
        }

        let active = Arc::new(AtomicBool::new(true));
        let scope = Arc::new(PluginScope::new(
            plugin_id.clone(),
            self.config.disable_grace,
        ));
        let resources = Arc::new(ResourceContainer::new(
            plugin_id.clone(),
            self.config.bundles_path.join(&plugin_id),
        ));
        let files = Arc::new(PluginFileExtensions::new(
            plugin_id.clone(),
            self.config.data_folders_path.clone(),
        ));

        let context = PluginContext::new(
            plugin_id.clone(),
            active.clone(),
            scope.clone(),
            self.data_storage.clone(),
            self.config_storage.clone(),
            resources,
            files,
        );

        let entry = Arc::new(PluginEntry {
            plugin,
            context,
            scope,
            active,
            gate: Mutex::new(EntryState {
                state: LifecycleState::Constructed,
                errors: Vec::new(),
            }),
        });

        plugins.insert(plugin_id.clone(), entry);
        drop(plugins);

        // 重新注册会解除同名插件的退役标记
        self.retired.write().await.remove(&plugin_id);

        info!(
            plugin_id = %plugin_id,
            name = %descriptor.name,
            version = %descriptor.version,
            "插件已注册"
        );
        Ok(())
    }

    /// 加载插件
    ///
    /// 每个插件实例的 `on_load` 恰好被调用一次. 加载失败的插件被
    /// 永久退役, 后续访问返回 [`PluginHostError::InactivePlugin`].
    pub async fn load(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        let mut gate = entry.gate.lock().await;

        if gate.state != LifecycleState::Constructed {
            return Err(PluginHostError::conflict(format!(
                "插件 {} 已经加载过",
                plugin_id
            )));
        }

        let result = self
            .run_hook(plugin_id, "on_load", entry.plugin.on_load(&entry.context))
            .await;

        match result {
            Ok(()) => {
                gate.state = LifecycleState::Loaded;
                info!(plugin_id, "插件已加载");
                Ok(())
            }
            Err(e) => {
                // on_load 失败不可恢复, 插件实例退役
                gate.errors.push(Timestamped::now(e.to_string()));
                gate.state = LifecycleState::Unloaded;
                drop(gate);

                error!(plugin_id, error = %e, "插件加载失败, 实例退役");
                self.retire(plugin_id).await;
                Err(e)
            }
        }
    }

    /// 启用插件
    ///
    /// 从 `Loaded` 或 `Disabled` 进入 `Enabled`, 重新启用时重建
    /// 并发作用域. 对已启用插件的重复调用是记录日志的空操作.
    /// 钩子失败会被记录, 但状态仍然前进, 插件保持可禁用/可卸载.
    pub async fn enable(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        let mut gate = entry.gate.lock().await;

        match gate.state {
            LifecycleState::Enabled => {
                debug!(plugin_id, "插件已处于启用状态, 忽略重复启用");
                return Ok(());
            }
            LifecycleState::Loaded | LifecycleState::Disabled => {}
            other => {
                return Err(PluginHostError::conflict(format!(
                    "插件 {} 处于 {:?} 状态, 无法启用",
                    plugin_id, other
                )));
            }
        }

        entry.scope.renew().await;

        let result = self
            .run_hook(
                plugin_id,
                "on_enable",
                entry.plugin.on_enable(&entry.context),
            )
            .await;

        gate.state = LifecycleState::Enabled;

        match result {
            Ok(()) => {
                info!(plugin_id, "插件已启用");
                Ok(())
            }
            Err(e) => {
                gate.errors.push(Timestamped::now(e.to_string()));
                warn!(plugin_id, error = %e, "启用钩子失败, 插件仍进入启用状态");
                Err(e)
            }
        }
    }

    /// 禁用插件
    ///
    /// 调用 `on_disable` 后取消作用域并在宽限期内等待任务排空.
    /// 对未启用插件的调用是记录日志的空操作.
    pub async fn disable(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        let mut gate = entry.gate.lock().await;
        self.disable_locked(plugin_id, &entry, &mut gate).await
    }

    /// 卸载插件
    ///
    /// 启用中的插件先走禁用流程, 然后同步刷写并释放该插件的全部
    /// 存储槽. 卸载是终态: 此后通过上下文的访问返回
    /// [`PluginHostError::InactivePlugin`].
    pub async fn unload(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        let mut gate = entry.gate.lock().await;

        if gate.state == LifecycleState::Constructed {
            return Err(PluginHostError::conflict(format!(
                "插件 {} 尚未加载, 无法卸载",
                plugin_id
            )));
        }

        if gate.state == LifecycleState::Enabled {
            // 钩子失败不阻止卸载, 错误已在禁用路径记录
            if let Err(e) = self.disable_locked(plugin_id, &entry, &mut gate).await {
                warn!(plugin_id, error = %e, "卸载前的禁用流程出错");
            }
        }

        // 作用域无论处于何种状态都必须终止: on_load 期间提交的任务
        // 不能在卸载之后继续运行. 已排空的作用域上重复调用是无害的.
        entry.scope.cancel_and_drain().await;

        entry.active.store(false, Ordering::Release);

        // 最终保存是同步的, 正常卸载不丢数据
        let data_result = self.data_storage.flush_and_release(plugin_id).await;
        let config_result = self.config_storage.flush_and_release(plugin_id).await;

        gate.state = LifecycleState::Unloaded;
        drop(gate);

        self.plugins.write().await.remove(plugin_id);
        self.retire(plugin_id).await;
        info!(plugin_id, "插件已卸载");

        data_result.and(config_result)
    }

    /// 注销一个从未加载过的插件
    ///
    /// 已加载的插件必须通过 [`unload`](Self::unload) 走完整的
    /// 卸载流程.
    pub async fn unregister(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        let gate = entry.gate.lock().await;

        if gate.state != LifecycleState::Constructed {
            return Err(PluginHostError::conflict(format!(
                "插件 {} 已加载, 请使用卸载流程",
                plugin_id
            )));
        }
        drop(gate);

        entry.scope.cancel_and_drain().await;
        entry.active.store(false, Ordering::Release);
        self.plugins.write().await.remove(plugin_id);
        self.retired.write().await.insert(plugin_id.to_string());
        info!(plugin_id, "插件已注销");
        Ok(())
    }

    /// 请求一次显式状态转换
    pub async fn transition(
        &self,
        plugin_id: &str,
        target: LifecycleState,
    ) -> Result<(), PluginHostError> {
        match target {
            LifecycleState::Loaded => self.load(plugin_id).await,
            LifecycleState::Enabled => self.enable(plugin_id).await,
            LifecycleState::Disabled => self.disable(plugin_id).await,
            LifecycleState::Unloaded => self.unload(plugin_id).await,
            LifecycleState::Constructed => Err(PluginHostError::validation(
                "target",
                "无法转换回初始状态",
            )),
        }
    }

    /// 查询插件状态
    ///
    /// 已退役的插件报告 `Unloaded`, 未知插件报告未找到.
    pub async fn state(&self, plugin_id: &str) -> Result<LifecycleState, PluginHostError> {
        if let Some(entry) = self.plugins.read().await.get(plugin_id) {
            return Ok(entry.gate.lock().await.state);
        }
        if self.retired.read().await.contains(plugin_id) {
            return Ok(LifecycleState::Unloaded);
        }
        Err(PluginHostError::not_found(format!("插件 {}", plugin_id)))
    }

    /// 所有活跃插件的状态快照
    pub async fn states(&self) -> HashMap<PluginId, LifecycleState> {
        let plugins = self.plugins.read().await;
        let mut snapshot = HashMap::with_capacity(plugins.len());
        for (id, entry) in plugins.iter() {
            snapshot.insert(id.clone(), entry.gate.lock().await.state);
        }
        snapshot
    }

    /// 获取插件上下文
    pub async fn context(&self, plugin_id: &str) -> Result<PluginContext, PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        Ok(entry.context.clone())
    }

    /// 插件累计的钩子错误记录
    pub async fn errors(&self, plugin_id: &str) -> Result<Vec<Timestamped<String>>, PluginHostError> {
        let entry = self.get_entry(plugin_id).await?;
        let gate = entry.gate.lock().await;
        Ok(gate.errors.clone())
    }

    /// 关闭监督器
    ///
    /// 卸载所有已加载的插件并刷写剩余的脏存储槽.
    pub async fn shutdown(&self) -> Result<(), PluginHostError> {
        let ids: Vec<PluginId> = self.plugins.read().await.keys().cloned().collect();

        for id in ids {
            let loaded = matches!(
                self.state(&id).await,
                Ok(LifecycleState::Loaded | LifecycleState::Enabled | LifecycleState::Disabled)
            );
            if loaded {
                if let Err(e) = self.unload(&id).await {
                    error!(plugin_id = %id, error = %e, "关闭时卸载插件失败");
                }
            }
        }

        self.data_storage.flush_all().await?;
        self.config_storage.flush_all().await?;
        info!("插件监督器已关闭");
        Ok(())
    }

    /// 持久化数据存储
    pub fn data_storage(&self) -> &Arc<PluginStorage> {
        &self.data_storage
    }

    /// 持久化配置存储
    pub fn config_storage(&self) -> &Arc<PluginStorage> {
        &self.config_storage
    }

    async fn disable_locked(
        &self,
        plugin_id: &str,
        entry: &PluginEntry,
        gate: &mut EntryState,
    ) -> Result<(), PluginHostError> {
        if gate.state != LifecycleState::Enabled {
            debug!(plugin_id, state = ?gate.state, "插件未启用, 忽略禁用请求");
            return Ok(());
        }

        let result = self
            .run_hook(
                plugin_id,
                "on_disable",
                entry.plugin.on_disable(&entry.context),
            )
            .await;

        // 无论钩子结果如何, 作用域都必须被取消和排空
        let drained = entry.scope.cancel_and_drain().await;
        gate.state = LifecycleState::Disabled;

        match result {
            Ok(()) => {
                info!(plugin_id, drained, "插件已禁用");
                Ok(())
            }
            Err(e) => {
                gate.errors.push(Timestamped::now(e.to_string()));
                warn!(plugin_id, error = %e, "禁用钩子失败, 插件仍进入禁用状态");
                Err(e)
            }
        }
    }

    async fn get_entry(&self, plugin_id: &str) -> Result<Arc<PluginEntry>, PluginHostError> {
        if let Some(entry) = self.plugins.read().await.get(plugin_id) {
            return Ok(entry.clone());
        }
        if self.retired.read().await.contains(plugin_id) {
            return Err(PluginHostError::inactive_plugin(plugin_id));
        }
        Err(PluginHostError::not_found(format!("插件 {}", plugin_id)))
    }

    async fn retire(&self, plugin_id: &str) {
        self.plugins.write().await.remove(plugin_id);
        self.retired.write().await.insert(plugin_id.to_string());
    }

    async fn run_hook<F>(
        &self,
        plugin_id: &str,
        hook: &str,
        future: F,
    ) -> Result<(), PluginHostError>
    where
        F: Future<Output = Result<(), PluginHostError>>,
    {
        match tokio::time::timeout(self.config.hook_timeout, future).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PluginHostError::lifecycle_hook(
                plugin_id,
                hook,
                e.to_string(),
            )),
            Err(_) => Err(PluginHostError::timeout(format!(
                "{}.{} ({:?})",
                plugin_id, hook, self.config.hook_timeout
            ))),
        }
    }
}
