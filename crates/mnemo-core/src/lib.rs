//! Mnemo Core - 核心类型和抽象
//!
//! 提供记忆子系统的错误处理、配置与日志初始化。

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
pub use logging::*;
