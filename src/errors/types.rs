// 统一错误类型定义

use pluginix_common::{PluginId, StorageKey};
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// 插件宿主统一错误类型
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "details")]
pub enum PluginHostError {
    /// 生命周期钩子失败
    #[error("生命周期钩子失败: {plugin_id}.{hook} - {message}")]
    LifecycleHook {
        plugin_id: PluginId,
        hook: String,
        message: String,
    },

    /// 持久化数据反序列化失败
    #[error("持久化数据反序列化失败: {plugin_id}/{key} - {message}")]
    Deserialization {
        plugin_id: PluginId,
        key: StorageKey,
        message: String,
    },

    /// 存储写入失败
    #[error("存储写入失败: {plugin_id}/{key} - {message}")]
    StorageIo {
        plugin_id: PluginId,
        key: StorageKey,
        message: String,
    },

    /// 访问已卸载的插件
    #[error("插件已不再活跃: {plugin_id}")]
    InactivePlugin { plugin_id: PluginId },

    /// 资源未找到
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 资源冲突
    #[error("资源冲突: {message}")]
    Conflict { message: String },

    /// 验证错误
    #[error("验证错误: {field} - {message}")]
    Validation { field: String, message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 超时错误
    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    /// IO 错误
    #[error("IO 错误: {message}")]
    Io { message: String },

    /// 内部错误
    #[error("内部错误: {message}")]
    Internal { message: String },
}

impl PluginHostError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::LifecycleHook { .. } => "LIFECYCLE_HOOK_FAILURE",
            Self::Deserialization { .. } => "DESERIALIZATION_FAILURE",
            Self::StorageIo { .. } => "STORAGE_IO_FAILURE",
            Self::InactivePlugin { .. } => "INACTIVE_PLUGIN_ACCESS",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// 错误所属的插件（如果有）
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::LifecycleHook { plugin_id, .. }
            | Self::Deserialization { plugin_id, .. }
            | Self::StorageIo { plugin_id, .. }
            | Self::InactivePlugin { plugin_id } => Some(plugin_id),
            _ => None,
        }
    }

    /// 是否应该记录错误日志
    pub fn should_log(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::Validation { .. } => false,
            _ => true,
        }
    }

    /// 是否为单个插件内部的可恢复错误（不影响其他插件）
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Deserialization { .. } | Self::StorageIo { .. } => true,
            Self::LifecycleHook { hook, .. } => hook != "on_load",
            _ => false,
        }
    }

    /// 创建生命周期钩子错误
    pub fn lifecycle_hook(
        plugin_id: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::LifecycleHook {
            plugin_id: plugin_id.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// 创建反序列化错误
    pub fn deserialization(
        plugin_id: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Deserialization {
            plugin_id: plugin_id.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// 创建存储写入错误
    pub fn storage_io(
        plugin_id: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StorageIo {
            plugin_id: plugin_id.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// 创建已卸载插件访问错误
    pub fn inactive_plugin(plugin_id: impl Into<String>) -> Self {
        Self::InactivePlugin {
            plugin_id: plugin_id.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// 创建冲突错误
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// 创建 IO 错误
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PluginHostError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON 序列化错误: {}", err),
        }
    }
}

impl From<std::io::Error> for PluginHostError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<pluginix_common::CommonError> for PluginHostError {
    fn from(err: pluginix_common::CommonError) -> Self {
        match err.code.as_str() {
            "VALIDATION_ERROR" => Self::Validation {
                field: err.details.unwrap_or_default(),
                message: err.message,
            },
            "CONFIGURATION_ERROR" => Self::Configuration {
                message: err.message,
            },
            _ => Self::Internal {
                message: err.message,
            },
        }
    }
}
