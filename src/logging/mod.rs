// 日志系统模块
// 配置结构化日志记录和追踪

pub mod context;
pub mod filters;
pub mod setup;


pub use context::*;
pub use filters::*;
pub use setup::*;
