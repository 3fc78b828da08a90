mod batch_report;
mod delivery_notification;
mod destination_key;
mod review_etl_service;
mod transform;

pub use batch_report::*;
pub use delivery_notification::*;
pub use destination_key::*;
pub use review_etl_service::*;
pub use transform::*;
