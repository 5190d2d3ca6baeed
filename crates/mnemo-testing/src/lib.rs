pub mod ai {
    use async_trait::async_trait;
    use mnemo_ai::{Model, TokenCounter};
    use mnemo_core::{MnemoError, Result};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// 一次模型调用的记录
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub system_prompt: String,
        pub context: String,
    }

    /// 按顺序返回预设回复的模型
    #[derive(Clone)]
    pub struct MockModel {
        responses: Arc<Mutex<VecDeque<String>>>,
        default_response: Arc<Mutex<Option<String>>>,
        calls: Arc<Mutex<Vec<RecordedCall>>>,
        should_fail: Arc<Mutex<bool>>,
    }

    impl Default for MockModel {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockModel {
        pub fn new() -> Self {
            Self {
                responses: Arc::new(Mutex::new(VecDeque::new())),
                default_response: Arc::new(Mutex::new(None)),
                calls: Arc::new(Mutex::new(Vec::new())),
                should_fail: Arc::new(Mutex::new(false)),
            }
        }

        pub fn with_response(self, response: impl Into<String>) -> Self {
            self.responses.lock().unwrap().push_back(response.into());
            self
        }

        pub fn with_json(self, value: serde_json::Value) -> Self {
            self.with_response(value.to_string())
        }

        pub fn with_responses(self, responses: Vec<String>) -> Self {
            *self.responses.lock().unwrap() = responses.into();
            self
        }

        pub fn with_default(self, response: impl Into<String>) -> Self {
            *self.default_response.lock().unwrap() = Some(response.into());
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.responses.lock().unwrap().len()
        }

        pub fn set_should_fail(&self, should_fail: bool) {
            *self.should_fail.lock().unwrap() = should_fail;
        }
    }

    #[async_trait]
    impl Model for MockModel {
        fn name(&self) -> &str {
            "mock-model"
        }

        async fn complete_text(&self, system_prompt: &str, context: &str) -> Result<String> {
            self.calls.lock().unwrap().push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                context: context.to_string(),
            });

            if *self.should_fail.lock().unwrap() {
                return Err(MnemoError::ModelFailure("Mock model error".to_string()));
            }

            if let Some(response) = self.responses.lock().unwrap().pop_front() {
                return Ok(response);
            }

            self.default_response
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| MnemoError::ModelFailure("no scripted response left".to_string()))
        }
    }

    /// 每个空白分隔的单词计为一个 token
    #[derive(Debug, Clone, Copy, Default)]
    pub struct WordTokenCounter;

    impl TokenCounter for WordTokenCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }
}

pub use ai::*;

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_ai::{Model, TokenCounter};

    #[tokio::test]
    async fn test_mock_model_scripted_order() {
        let model = MockModel::new().with_response("first").with_response("second");

        assert_eq!(model.complete_text("s", "c").await.unwrap(), "first");
        assert_eq!(model.complete_text("s", "c").await.unwrap(), "second");
        assert!(model.complete_text("s", "c").await.unwrap_err().is_model_failure());
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_model_default_and_failure() {
        let model = MockModel::new().with_default("fallback");
        assert_eq!(model.complete_text("s", "c").await.unwrap(), "fallback");

        model.set_should_fail(true);
        assert!(model.complete_text("s", "c").await.is_err());
        assert_eq!(model.calls()[1].context, "c");
    }

    #[test]
    fn test_word_token_counter() {
        assert_eq!(WordTokenCounter.count("one two  three\nfour"), 4);
    }
}
