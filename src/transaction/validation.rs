/// Validation logic for transactions separated from type definitions
use crate::error::ChainError;

/// Amounts must be finite and strictly positive.
pub fn validate_amount(amount: f64) -> Result<(), ChainError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ChainError::InvalidAmount);
    }
    Ok(())
}

/// Balance a non-system sender must hold to cover `amount` plus its gas.
pub fn required_balance(amount: f64, gas_fee: f64) -> f64 {
    amount * (1.0 + gas_fee)
}
