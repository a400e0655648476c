// 配置验证器
// 提供详细的配置验证逻辑

use crate::config::HostConfig;
use pluginix_common::CommonError;

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置
    pub fn validate_all(config: &HostConfig) -> Result<(), Vec<CommonError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_plugin_dirs(&config.plugins) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_lifecycle(&config.lifecycle) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_storage(&config.storage) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_logging(&config.logging) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_environment(&config.environment) {
            errors.push(e);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// 验证插件目录配置
    pub fn validate_plugin_dirs(
        config: &crate::config::PluginDirsConfig,
    ) -> Result<(), CommonError> {
        if config.bundles_path.is_empty() {
            return Err(CommonError::validation("插件捆绑包目录不能为空"));
        }

        if config.data_path.is_empty() {
            return Err(CommonError::validation("持久化数据目录不能为空"));
        }

        if config.config_path.is_empty() {
            return Err(CommonError::validation("持久化配置目录不能为空"));
        }

        if config.data_folders_path.is_empty() {
            return Err(CommonError::validation("插件可写文件目录不能为空"));
        }

        // 数据与配置必须位于不同目录, 否则同名存储键会互相覆盖
        if config.data_path == config.config_path {
            return Err(CommonError::validation("数据目录与配置目录不能相同"));
        }

        Ok(())
    }

    /// 验证生命周期配置
    pub fn validate_lifecycle(config: &crate::config::LifecycleConfig) -> Result<(), CommonError> {
        if config.hook_timeout_seconds == 0 {
            return Err(CommonError::validation("钩子超时时间不能为 0"));
        }

        if config.disable_grace_seconds == 0 {
            return Err(CommonError::validation("禁用宽限期不能为 0"));
        }

        if config.hook_timeout_seconds > 600 {
            return Err(CommonError::validation("钩子超时时间不建议超过 600 秒"));
        }

        Ok(())
    }

    /// 验证存储配置
    pub fn validate_storage(config: &crate::config::StorageConfig) -> Result<(), CommonError> {
        if config.flush_delay_ms == 0 {
            return Err(CommonError::validation("保存合并窗口不能为 0"));
        }

        if config.flush_delay_ms > 60_000 {
            return Err(CommonError::validation("保存合并窗口不建议超过 60 秒"));
        }

        Ok(())
    }

    /// 验证日志配置
    pub fn validate_logging(config: &crate::config::LoggingConfig) -> Result<(), CommonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.to_lowercase().as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志级别: {}",
                config.level
            )));
        }

        let valid_formats = ["json", "pretty", "compact", "full"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志格式: {}",
                config.format
            )));
        }

        if config.file_enabled && config.file_path.is_none() {
            return Err(CommonError::validation("启用文件日志时必须指定日志文件路径"));
        }

        Ok(())
    }

    /// 验证环境配置
    pub fn validate_environment(
        config: &crate::config::EnvironmentConfig,
    ) -> Result<(), CommonError> {
        let valid_environments = ["development", "production", "test"];
        if !valid_environments.contains(&config.name.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的环境名称: {}",
                config.name
            )));
        }

        Ok(())
    }
}
