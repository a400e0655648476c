// 日志上下文管理

use pluginix_common::{PluginId, TraceId};
use serde::{Deserialize, Serialize};

use uuid::Uuid;

/// 插件操作上下文
///
/// 所有面向用户的生命周期/存储日志都附带插件身份.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginLogContext {
    pub plugin_id: PluginId,
    pub trace_id: TraceId,
    pub operation: Option<String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl PluginLogContext {
    /// 创建新的插件日志上下文
    pub fn new(plugin_id: impl Into<PluginId>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            trace_id: Uuid::new_v4().to_string(),
            operation: None,
            start_time: chrono::Utc::now(),
        }
    }

    /// 设置当前操作名称
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// 获取持续时间
    pub fn duration(&self) -> chrono::Duration {
        chrono::Utc::now() - self.start_time
    }

    /// 转换为日志字段
    pub fn to_log_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("plugin_id", self.plugin_id.clone()),
            ("trace_id", self.trace_id.clone()),
            ("start_time", self.start_time.to_rfc3339()),
        ];

        if let Some(ref operation) = self.operation {
            fields.push(("operation", operation.clone()));
        }

        fields
    }
}

/// 日志上下文宏
#[macro_export]
macro_rules! log_with_plugin {
    ($level:ident, $context:expr, $($arg:tt)*) => {
        tracing::$level!(
            plugin_id = %$context.plugin_id,
            trace_id = %$context.trace_id,
            operation = ?$context.operation,
            $($arg)*
        );
    };
}

/// 创建带插件身份的 span
#[macro_export]
macro_rules! plugin_span {
    ($level:ident, $name:expr, $context:expr) => {
        tracing::span!(
            tracing::Level::$level,
            $name,
            plugin_id = %$context.plugin_id,
            trace_id = %$context.trace_id,
        )
    };
}
