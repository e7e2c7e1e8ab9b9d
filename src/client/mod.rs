pub mod payer;

pub use payer::PayerClient;
