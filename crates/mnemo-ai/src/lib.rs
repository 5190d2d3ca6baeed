//! Mnemo AI - 模型与分词能力抽象
//!
//! 记忆引擎只依赖这里的 trait，具体的 LLM 提供商由调用方注入：
//! - `Model`: 文本补全与结构化输出
//! - `TokenCounter`: token 计数

pub mod model;
pub mod tokenizer;

pub use model::*;
pub use tokenizer::*;
