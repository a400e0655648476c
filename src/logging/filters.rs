// 日志过滤器

use tracing::{Level, Metadata};
use tracing_subscriber::filter::FilterFn;

/// 创建模块过滤器
pub fn create_module_filter(allowed_modules: Vec<String>) -> FilterFn<impl Fn(&Metadata<'_>) -> bool> {
    FilterFn::new(move |metadata| {
        let target = metadata.target();

        // 只允许特定模块的日志
        allowed_modules.iter().any(|module| target.starts_with(module))
    })
}

/// 创建级别过滤器
pub fn create_level_filter(min_level: Level) -> FilterFn<impl Fn(&Metadata<'_>) -> bool> {
    FilterFn::new(move |metadata| *metadata.level() <= min_level)
}

/// 创建运行时噪音过滤器
pub fn create_runtime_noise_filter() -> FilterFn<impl Fn(&Metadata<'_>) -> bool> {
    FilterFn::new(|metadata| {
        let target = metadata.target();
        let level = metadata.level();

        // 过滤掉运行时内部的详细日志
        if *level == Level::DEBUG || *level == Level::TRACE {
            if target.starts_with("tokio") || target.starts_with("mio") {
                return false;
            }
        }

        true
    })
}

/// 创建错误重点过滤器
pub fn create_error_focus_filter() -> FilterFn<impl Fn(&Metadata<'_>) -> bool> {
    FilterFn::new(|metadata| {
        let level = metadata.level();
        let target = metadata.target();

        // 总是记录错误和警告
        if *level <= Level::WARN {
            return true;
        }

        // 对于 INFO 级别，只记录宿主相关的日志
        if *level == Level::INFO {
            return target.starts_with("pluginix");
        }

        // 对于 DEBUG 和 TRACE，只在调试模式下记录
        cfg!(debug_assertions)
    })
}

/// 日志过滤器配置
pub struct LogFilterConfig {
    pub enable_runtime_noise_filter: bool,
    pub enable_error_focus_filter: bool,
    pub allowed_modules: Vec<String>,
    pub min_level: Level,
}

impl Default for LogFilterConfig {
    fn default() -> Self {
        Self {
            enable_runtime_noise_filter: true,
            enable_error_focus_filter: false,
            allowed_modules: vec!["pluginix".to_string()],
            min_level: Level::INFO,
        }
    }
}

impl LogFilterConfig {
    /// 创建生产环境配置
    pub fn production() -> Self {
        Self {
            enable_runtime_noise_filter: true,
            enable_error_focus_filter: true,
            allowed_modules: vec!["pluginix".to_string()],
            min_level: Level::INFO,
        }
    }

    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            enable_runtime_noise_filter: false,
            enable_error_focus_filter: false,
            allowed_modules: vec!["pluginix".to_string(), "tokio".to_string()],
            min_level: Level::DEBUG,
        }
    }

    /// 创建测试环境配置
    pub fn test() -> Self {
        Self {
            enable_runtime_noise_filter: true,
            enable_error_focus_filter: true,
            allowed_modules: vec!["pluginix".to_string()],
            min_level: Level::WARN,
        }
    }
}
