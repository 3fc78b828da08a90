mod notifier;
mod object_store;
mod result;

pub use notifier::*;
pub use object_store::*;
pub use result::*;
