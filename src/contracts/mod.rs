pub mod erc20;
pub mod payment_router;

pub use erc20::{decode_transfer, transfer_topic, Erc20Transfer, IERC20};
pub use payment_router::{decode_payment_received, payment_received_topic, PaymentReceived};
