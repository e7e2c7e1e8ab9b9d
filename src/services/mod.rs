pub mod cache;
pub mod chain;
pub mod decode;
pub mod matching;
pub mod observer;
pub mod payments;
pub mod rates;
pub mod reconciler;
pub mod store;
pub mod verifier;

pub use cache::CacheService;
pub use chain::{connect, ChainReader, EvmChain};
pub use matching::MatchRule;
pub use observer::{ChainObserver, ObserverConfig, ObserverHandle};
pub use payments::PaymentService;
pub use rates::RatesService;
pub use reconciler::Reconciler;
pub use store::{MemoryStore, PaymentStore};
pub use verifier::{PaymentVerifier, VerificationOutcome};
