// 插件接口规范
// 定义插件的标准接口、描述符和插件上下文

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pluginix_common::PluginId;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::PluginHostError;
use crate::plugins::resources::{PluginFileExtensions, ResourceContainer};
use crate::plugins::scope::PluginScope;
use crate::plugins::storage::{DataHandle, PluginData, PluginStorage};

/// 插件接口
///
/// 所有插件必须实现此接口. 生命周期钩子均有空的默认实现,
/// 插件只需要覆盖自己关心的钩子.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 获取插件描述符
    fn descriptor(&self) -> &PluginDescriptor;

    /// 在插件被加载时调用, 每个插件实例只会被调用一次
    async fn on_load(&self, _ctx: &PluginContext) -> Result<(), PluginHostError> {
        Ok(())
    }

    /// 在插件被启用时调用, 可能会被调用多次
    async fn on_enable(&self, _ctx: &PluginContext) -> Result<(), PluginHostError> {
        Ok(())
    }

    /// 在插件被禁用时调用, 可能会被调用多次
    async fn on_disable(&self, _ctx: &PluginContext) -> Result<(), PluginHostError> {
        Ok(())
    }
}

/// 插件描述符
///
/// 发现阶段创建, 此后不可变. `id` 全局唯一并且在进程重启之间保持稳定,
/// 持久化存储和文件目录都以它为命名空间.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// 插件 ID
    pub id: PluginId,
    /// 插件名称
    pub name: String,
    /// 插件版本
    pub version: String,
    /// 插件依赖
    pub dependencies: Vec<PluginDependency>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl PluginDescriptor {
    /// 创建新的插件描述符
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// 添加依赖声明
    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// 插件依赖
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    /// 依赖插件 ID
    pub plugin_id: PluginId,
    /// 版本要求
    pub version_requirement: String,
    /// 是否可选
    pub optional: bool,
}

/// 插件生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// 已构造, 尚未加载
    Constructed,
    /// 已加载
    Loaded,
    /// 已启用
    Enabled,
    /// 已禁用
    Disabled,
    /// 已卸载（终态）
    Unloaded,
}

/// 插件上下文
///
/// 监督器在注册时为每个插件构建一份, 作为插件可见的能力集合:
/// 身份、并发作用域、类型化存储、只读资源和可写文件目录.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: PluginId,
    active: Arc<AtomicBool>,
    scope: Arc<PluginScope>,
    data_storage: Arc<PluginStorage>,
    config_storage: Arc<PluginStorage>,
    resources: Arc<ResourceContainer>,
    files: Arc<PluginFileExtensions>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin_id: PluginId,
        active: Arc<AtomicBool>,
        scope: Arc<PluginScope>,
        data_storage: Arc<PluginStorage>,
        config_storage: Arc<PluginStorage>,
        resources: Arc<ResourceContainer>,
        files: Arc<PluginFileExtensions>,
    ) -> Self {
        Self {
            plugin_id,
            active,
            scope,
            data_storage,
            config_storage,
            resources,
            files,
        }
    }

    /// 插件 ID
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// 插件是否仍然活跃（卸载后变为 false）
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<(), PluginHostError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(PluginHostError::inactive_plugin(&self.plugin_id))
        }
    }

    /// 读取一个持久化数据实例
    ///
    /// 同一数据类型在卸载前的重复调用返回共享同一存储槽的句柄.
    /// 卸载之后的调用被拒绝.
    pub async fn load_data<T: PluginData>(&self) -> Result<DataHandle<T>, PluginHostError> {
        self.ensure_active()?;
        self.data_storage.load::<T>(&self.plugin_id).await
    }

    /// 读取一个持久化配置实例
    ///
    /// 与 [`load_data`](Self::load_data) 机制完全相同, 区别仅在于
    /// 配置面向用户编辑, 存放在独立的根目录下.
    pub async fn load_config<T: PluginData>(&self) -> Result<DataHandle<T>, PluginHostError> {
        self.ensure_active()?;
        self.config_storage.load::<T>(&self.plugin_id).await
    }

    /// 在插件的并发作用域内启动后台任务
    pub async fn spawn<F>(&self, future: F) -> Result<(), PluginHostError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.ensure_active()?;
        self.scope.spawn(future).await
    }

    /// 获取当前作用域的取消令牌, 后台任务应协作式地观察它
    pub async fn cancellation_token(&self) -> CancellationToken {
        self.scope.cancellation_token().await
    }

    /// 插件的并发作用域
    pub fn scope(&self) -> &PluginScope {
        &self.scope
    }

    /// 捆绑包只读资源访问器
    pub fn resources(&self) -> &ResourceContainer {
        &self.resources
    }

    /// 插件可写文件目录提供者
    pub fn files(&self) -> &PluginFileExtensions {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_creation() {
        let descriptor = PluginDescriptor::new("demo", "Demo Plugin", "1.0.0").with_dependency(
            PluginDependency {
                plugin_id: "base".to_string(),
                version_requirement: "^1.0".to_string(),
                optional: false,
            },
        );

        assert_eq!(descriptor.id, "demo");
        assert_eq!(descriptor.dependencies.len(), 1);
        assert!(!descriptor.dependencies[0].optional);
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = PluginDescriptor::new("demo", "Demo Plugin", "1.0.0");

        let json = serde_json::to_string(&descriptor).unwrap();
        let deserialized: PluginDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(descriptor.id, deserialized.id);
        assert_eq!(descriptor.version, deserialized.version);
    }

    #[test]
    fn test_lifecycle_state_serialization() {
        let json = serde_json::to_string(&LifecycleState::Enabled).unwrap();
        assert_eq!(json, "\"enabled\"");

        let state: LifecycleState = serde_json::from_str("\"unloaded\"").unwrap();
        assert_eq!(state, LifecycleState::Unloaded);
    }
}
