//! The chat model behind the panel. Provider clients live outside this crate;
//! the host only needs something that turns a composed prompt into a reply.

pub mod mock;

pub use mock::{MockBackend, MockBehavior};

use anyhow::Result;

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends the fully composed prompt and returns the model's reply.
    async fn complete(&self, prompt: String) -> Result<String>;
}
