pub mod health;
pub mod payments;
pub mod rates;

pub use health::*;
pub use payments::*;
pub use rates::*;
