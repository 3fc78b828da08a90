mod delivery_batch_processor;
mod outcome_notifier;

pub use delivery_batch_processor::*;
pub use outcome_notifier::*;
