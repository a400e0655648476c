// 通用类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 插件 ID 类型
///
/// 全局唯一且在进程重启之间保持稳定, 用于定位磁盘上的存储目录.
pub type PluginId = String;

/// 存储键类型
///
/// 标识一个插件持久化数据的类型身份 (每个数据类型一个键).
pub type StorageKey = String;

/// 追踪 ID 类型
pub type TraceId = String;

/// 带时间戳的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> Timestamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}
