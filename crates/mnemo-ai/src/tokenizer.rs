//! Token 计数
//!
//! 反思和晋升的阈值都以 token 计。默认用估算计数器，
//! `tokenizer.accurate` 打开时按模型加载 tiktoken 编码。

use mnemo_core::{MnemoError, Result, TokenizerConfig};
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};
use tracing::debug;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// 多段文本的 token 总数
    fn count_all(&self, texts: &[&str]) -> usize {
        texts.iter().map(|t| self.count(t)).sum()
    }
}

/// 估算计数器
///
/// 按空白切词：每个表意字符算一个 token，其余字符每 4 个算一个，
/// 每个词至少一个 token。markdown 标记和短词因此不会被低估。
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingCounter;

impl EstimatingCounter {
    fn word_tokens(word: &str) -> usize {
        let mut ideographs = 0;
        let mut others: usize = 0;
        for c in word.chars() {
            if is_ideograph(c) {
                ideographs += 1;
            } else {
                others += 1;
            }
        }
        (ideographs + others.div_ceil(4)).max(1)
    }
}

fn is_ideograph(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'     // 假名
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'   // 谚文
        | '\u{F900}'..='\u{FAFF}')
}

impl TokenCounter for EstimatingCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().map(Self::word_tokens).sum()
    }
}

/// tiktoken 计数器
pub struct TiktokenCounter {
    bpe: CoreBPE,
    model: String,
}

impl TiktokenCounter {
    /// 按模型名加载编码，未登记的模型退回 cl100k_base
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                debug!("No tiktoken encoding for {}, using cl100k_base: {}", model, e);
                cl100k_base().map_err(|e| MnemoError::TokenCount(format!("加载分词器失败: {}", e)))?
            }
        };
        debug!("Loaded tiktoken encoding for {}", model);
        Ok(Self {
            bpe,
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// 按配置创建计数器
pub fn create_token_counter(config: &TokenizerConfig) -> Result<Arc<dyn TokenCounter>> {
    if config.accurate {
        Ok(Arc::new(TiktokenCounter::for_model(&config.model)?))
    } else {
        Ok(Arc::new(EstimatingCounter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_words() {
        let counter = EstimatingCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("  \n "), 0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
        // 短词和标记至少一个 token
        assert_eq!(counter.count("- [x] a"), 3);
    }

    #[test]
    fn test_estimate_ideographs() {
        let counter = EstimatingCounter;
        assert_eq!(counter.count("记忆"), 2);
        assert_eq!(counter.count("用户 prefers"), 2 + 2);
    }

    #[test]
    fn test_estimate_grows_with_stm_events() {
        let counter = EstimatingCounter;
        let one = "### 2024-05-01T10:00:00Z\n**User:** \"deploy the api\"\n**AI:** \"done\"\n";
        let two = format!("{}{}", one, one);
        assert_eq!(counter.count(&two), counter.count(one) * 2);
        assert_eq!(counter.count_all(&[one, one]), counter.count(&two));
    }

    #[test]
    fn test_tiktoken_counter() {
        let counter = TiktokenCounter::for_model("gpt-4o").unwrap();
        assert_eq!(counter.model(), "gpt-4o");
        assert!(counter.count("Remember that the staging database lives in eu-west-1.") > 0);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let counter = TiktokenCounter::for_model("local-llama").unwrap();
        assert!(counter.count("hello") > 0);
    }

    #[test]
    fn test_create_from_config() {
        let estimate = create_token_counter(&TokenizerConfig::default()).unwrap();
        assert_eq!(estimate.count("abcde"), 2);

        let accurate = create_token_counter(&TokenizerConfig {
            accurate: true,
            model: "gpt-4".to_string(),
        })
        .unwrap();
        assert!(accurate.count("Hello, world!") > 0);
    }
}
