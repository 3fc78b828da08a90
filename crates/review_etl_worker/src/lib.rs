pub mod domain;
pub mod nats;
pub mod review_etl_worker;

pub use domain::*;
pub use nats::*;
pub use review_etl_worker::*;
