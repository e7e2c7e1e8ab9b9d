use crate::config::MatchConfig;
use crate::models::{parse_human_amount, to_human_units, PaymentRecord, Token};
use ethers::types::{Address, U256};

/// Why an observed transfer does not satisfy a payment record.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    NoMerchant,
    Payer { expected: Address, actual: Address },
    Recipient { expected: Address, actual: Address },
    Amount { expected: String, actual: f64 },
    UnreadableAmount,
}

/// Recipient + amount-with-tolerance rule shared by the event-driven
/// reconciler and on-demand verification.
#[derive(Debug, Clone)]
pub struct MatchRule {
    default_merchant: Option<Address>,
    tolerance: f64,
}

impl MatchRule {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            default_merchant: config.default_merchant,
            tolerance: config.tolerance,
        }
    }

    pub fn merchant_for(&self, record: &PaymentRecord) -> Option<Address> {
        record.merchant_address.or(self.default_merchant)
    }

    /// Address comparison is on parsed 20-byte values, so hex case never matters.
    pub fn check_recipient(&self, record: &PaymentRecord, to: Address) -> Result<(), Mismatch> {
        let expected = self.merchant_for(record).ok_or(Mismatch::NoMerchant)?;
        if expected != to {
            return Err(Mismatch::Recipient { expected, actual: to });
        }
        Ok(())
    }

    /// Only the owning user's wallet can settle their payment.
    pub fn check_payer(&self, wallet: Address, from: Address) -> Result<(), Mismatch> {
        if wallet != from {
            return Err(Mismatch::Payer {
                expected: wallet,
                actual: from,
            });
        }
        Ok(())
    }

    pub fn check_amount(&self, record: &PaymentRecord, actual: f64) -> Result<(), Mismatch> {
        let expected = parse_human_amount(&record.amount).ok_or(Mismatch::UnreadableAmount)?;
        if (actual - expected).abs() <= self.tolerance {
            Ok(())
        } else {
            Err(Mismatch::Amount {
                expected: record.amount.clone(),
                actual,
            })
        }
    }

    /// Full check against a smallest-unit amount of `token`.
    pub fn check(
        &self,
        record: &PaymentRecord,
        token: Token,
        to: Address,
        amount: U256,
    ) -> Result<(), Mismatch> {
        self.check_recipient(record, to)?;
        let actual = to_human_units(amount, token.decimals()).ok_or(Mismatch::UnreadableAmount)?;
        self.check_amount(record, actual)
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::NoMerchant => write!(f, "no merchant address configured for payment"),
            Mismatch::Payer { expected, actual } => {
                write!(f, "paid from wrong wallet: expected {:?}, got {:?}", expected, actual)
            }
            Mismatch::Recipient { expected, actual } => {
                write!(f, "payment to wrong address: expected {:?}, got {:?}", expected, actual)
            }
            Mismatch::Amount { expected, actual } => {
                write!(f, "amount mismatch: expected {}, got {}", expected, actual)
            }
            Mismatch::UnreadableAmount => write!(f, "amount is not a finite number"),
        }
    }
}
