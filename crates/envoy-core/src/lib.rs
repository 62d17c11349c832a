pub mod completion;
pub mod country;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod ids;
pub mod messages;

pub use completion::CompletionService;
pub use country::Country;
pub use errors::{CompletionError, DeliveryError};
pub use gateway::MessagingGateway;
