pub mod mock;
pub mod openai;
pub mod reliable;

pub use mock::{MockCompletion, MockResponse};
pub use openai::{OpenAiCompletion, OpenAiConfig};
pub use reliable::{ReliableCompletion, ReliableConfig};
