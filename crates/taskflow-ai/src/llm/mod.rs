mod anthropic;
mod mock;
mod retry;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use retry::RetryingProvider;
