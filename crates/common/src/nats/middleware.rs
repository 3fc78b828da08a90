mod publish_logging;
mod publish_tracing;
mod publisher;
mod types;

pub use publish_logging::*;
pub use publish_tracing::*;
pub use publisher::*;
pub use types::*;
