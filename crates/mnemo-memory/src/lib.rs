//! Mnemo Memory - 分层记忆引擎
//!
//! 三层记忆：
//! - 工作上下文 (Working Context): 当前会话消息，由调用方持有
//! - 短期记忆 (Short-term Memory): 单个 markdown 文件，整体重写
//! - 长期记忆 (Long-term Memory): 带 frontmatter 的 markdown 文件目录，以 uuid 为身份
//!
//! 召回、反思、晋升、整理四个阶段在层级之间搬运信息，访问日志驱动整理。

pub mod access_log;
pub mod format;
pub mod lifecycle;
pub mod lock;
pub mod long_term;
pub mod manager;
pub mod mind_map;
pub mod persist;
pub mod prompts;
pub mod recall;
pub mod relations;
pub mod scheduler;
pub mod short_term;
pub mod types;
pub mod working;

pub use access_log::*;
pub use format::*;
pub use lifecycle::*;
pub use lock::*;
pub use long_term::*;
pub use manager::*;
pub use mind_map::*;
pub use recall::*;
pub use relations::*;
pub use scheduler::*;
pub use short_term::*;
pub use types::*;
pub use working::*;
