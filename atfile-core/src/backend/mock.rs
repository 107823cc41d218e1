use crate::backend::ChatBackend;
use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock behavior for the mock backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MockBehavior {
    /// Reply with the prompt itself
    #[default]
    Echo,
    /// Always reply with the given text
    Reply(String),
    /// Always fail with the given message
    AlwaysError(String),
    /// Wait before echoing, for exercising concurrency
    Delayed(Duration),
    /// Play the behaviors in order, then fall back to `Echo`
    Queue(Vec<MockBehavior>),
}

/// Mock chat backend for tests and for running the host without a provider
#[derive(Clone, Default)]
pub struct MockBackend {
    behavior: Arc<Mutex<MockBehavior>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn next_behavior(&self) -> MockBehavior {
        let mut behavior = self.behavior.lock().unwrap();
        if let MockBehavior::Queue(queue) = &mut *behavior {
            if queue.is_empty() {
                return MockBehavior::Echo;
            }
            return queue.remove(0);
        }
        behavior.clone()
    }
}

#[async_trait::async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());

        match self.next_behavior() {
            MockBehavior::Echo | MockBehavior::Queue(_) => Ok(prompt),
            MockBehavior::Reply(reply) => Ok(reply),
            MockBehavior::AlwaysError(message) => bail!(message),
            MockBehavior::Delayed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(prompt)
            }
        }
    }
}
