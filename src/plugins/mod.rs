// 插件运行时模块
// 实现插件接口规范、生命周期监督和持久化存储

pub mod lifecycle;
pub mod plugin_interface;
pub mod resources;
pub mod scope;
pub mod storage;

pub use lifecycle::*;
pub use plugin_interface::*;
pub use resources::*;
pub use scope::*;
pub use storage::*;
