// 配置管理模块
// 处理宿主配置和环境变量

pub mod loader;
pub mod settings;
pub mod validator;


pub use loader::*;
pub use settings::*;
pub use validator::*;
