// 宿主设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use pluginix_common::CommonError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 插件宿主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub plugins: PluginDirsConfig,
    pub lifecycle: LifecycleConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
}

/// 插件目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDirsConfig {
    /// 插件捆绑包目录（只读资源来源）
    pub bundles_path: String,
    /// 持久化数据根目录
    pub data_path: String,
    /// 持久化配置根目录
    pub config_path: String,
    /// 插件可写文件根目录
    pub data_folders_path: String,
}

/// 生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 钩子调用超时时间（秒）
    pub hook_timeout_seconds: u64,
    /// 禁用时等待后台任务结束的宽限期（秒）
    pub disable_grace_seconds: u64,
}

impl LifecycleConfig {
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_seconds)
    }

    pub fn disable_grace(&self) -> Duration {
        Duration::from_secs(self.disable_grace_seconds)
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 保存合并窗口（毫秒）: 窗口内的多次变更只产生一次写入
    pub flush_delay_ms: u64,
}

impl StorageConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub debug: bool,
    pub version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins: PluginDirsConfig {
                bundles_path: "plugins".to_string(),
                data_path: "data".to_string(),
                config_path: "config".to_string(),
                data_folders_path: "data-folders".to_string(),
            },
            lifecycle: LifecycleConfig {
                hook_timeout_seconds: 30,
                disable_grace_seconds: 5,
            },
            storage: StorageConfig { flush_delay_ms: 200 },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
                file_enabled: false,
                file_path: None,
            },
            environment: EnvironmentConfig {
                name: "development".to_string(),
                debug: true,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

impl HostConfig {
    /// 从环境变量和配置文件加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // 1. 加载默认配置
        config = config.add_source(Config::try_from(&HostConfig::default())?);

        // 2. 尝试加载配置文件
        if Path::new("config.toml").exists() {
            config = config.add_source(File::with_name("config"));
        }

        // 3. 加载环境变量（优先级最高）
        config = config.add_source(
            Environment::with_prefix("PLUGINIX")
                .prefix_separator("_")
                .separator("__"),
        );

        // 4. 构建配置
        let config = config.build()?;

        // 5. 反序列化为结构体
        let mut host_config: HostConfig = config.try_deserialize()?;

        // 6. 设置版本信息
        host_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(host_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), CommonError> {
        use crate::config::ConfigValidator;

        ConfigValidator::validate_all(self).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            CommonError::configuration(messages.join("; "))
        })
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.environment.name == "development"
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }

    /// 是否为测试环境
    pub fn is_test(&self) -> bool {
        self.environment.name == "test"
    }
}
