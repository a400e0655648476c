// Pluginix 插件运行时库
// 导出主要模块

pub mod config;
pub mod errors;
pub mod logging;
pub mod plugins;

pub use errors::PluginHostError;
pub use plugins::{
    DataHandle, LifecycleState, Plugin, PluginContext, PluginData, PluginDescriptor,
    PluginFileExtensions, PluginScope, PluginStorage, PluginSupervisor, ResourceContainer,
    SupervisorConfig,
};
