// 配置加载器
// 处理配置文件加载和环境变量解析

use crate::config::HostConfig;
use config::ConfigError;
use dotenvy::dotenv;
use pluginix_common::CommonError;
use std::sync::OnceLock;
use tracing::{info, warn};

/// 全局配置实例
static CONFIG: OnceLock<HostConfig> = OnceLock::new();

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 初始化配置
    pub fn init() -> Result<&'static HostConfig, CommonError> {
        // 加载 .env 文件
        if let Err(e) = dotenv() {
            warn!("无法加载 .env 文件: {}", e);
        }

        // 加载配置
        let config = HostConfig::load().map_err(convert_config_error)?;

        // 验证配置
        config.validate()?;

        // 存储到全局变量
        CONFIG
            .set(config)
            .map_err(|_| CommonError::internal("配置已经初始化"))?;

        let config = Self::get();

        info!("配置加载成功");
        info!("环境: {}", config.environment.name);
        info!("版本: {}", config.environment.version);
        info!("插件捆绑包目录: {}", config.plugins.bundles_path);
        info!("持久化数据目录: {}", config.plugins.data_path);

        Ok(config)
    }

    /// 获取配置
    pub fn get() -> &'static HostConfig {
        CONFIG
            .get()
            .expect("配置未初始化，请先调用 ConfigLoader::init()")
    }

    /// 尝试获取配置（未初始化时返回 None）
    pub fn try_get() -> Option<&'static HostConfig> {
        CONFIG.get()
    }
}

/// 配置错误转换辅助函数
pub fn convert_config_error(err: ConfigError) -> CommonError {
    CommonError::configuration(format!("配置错误: {}", err))
}
