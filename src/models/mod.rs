pub mod chain_event;
pub mod payment;
pub mod response;

pub use chain_event::*;
pub use payment::*;
pub use response::*;
