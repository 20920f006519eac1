//! Value Objects for orders, payments and refunds

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 50 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkuError {
    #[error("SKU empty")]
    Empty,
    #[error("SKU too long")]
    TooLong,
}

/// Money value object. Amounts are major units (`12.50` USD).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_uppercase() } }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_positive(&self) -> bool { self.amount > Decimal::ZERO }

    /// Amounts finer than a cent cannot be charged or refunded.
    pub fn ensure_cents(&self) -> Result<(), MoneyError> {
        if self.amount.normalize().scale() > 2 {
            return Err(MoneyError::TooPrecise { amount: self.amount });
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// Amount in the currency's minor unit (cents), as payment providers expect.
    /// Only two-decimal currencies are supported.
    pub fn minor_units(&self) -> Result<i64, MoneyError> {
        (self.amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(MoneyError::Overflow)
    }

    pub fn from_minor_units(minor: i64, currency: &str) -> Self {
        Self::new(Decimal::new(minor, 2), currency)
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() });
        }
        Ok(())
    }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2} {}", self.amount, self.currency) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
    #[error("amount out of range")]
    Overflow,
    #[error("amount {amount} has more than two decimal places")]
    TooPrecise { amount: Decimal },
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 { None } else { Some(Self(self.0 - other)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_sku() { let sku = Sku::new(" prod-001 ").unwrap(); assert_eq!(sku.as_str(), "PROD-001"); }
    #[test]
    fn test_sku_rejects_empty_and_long() {
        assert_eq!(Sku::new("   "), Err(SkuError::Empty));
        assert_eq!(Sku::new("X".repeat(51)), Err(SkuError::TooLong));
    }
    #[test]
    fn test_money_add() {
        let a = Money::usd(Decimal::new(100, 0));
        let b = Money::usd(Decimal::new(50, 0));
        assert_eq!(a.add(&b).unwrap().amount(), Decimal::new(150, 0));
        assert_eq!(a.subtract(&b).unwrap().amount(), Decimal::new(50, 0));
    }
    #[test]
    fn test_money_currency_mismatch() {
        let a = Money::usd(Decimal::ONE);
        let b = Money::new(Decimal::ONE, "eur");
        assert!(matches!(a.add(&b), Err(MoneyError::CurrencyMismatch { .. })));
    }
    #[test]
    fn test_minor_units() {
        assert_eq!(Money::usd(Decimal::new(1999, 2)).minor_units().unwrap(), 1999);
        assert_eq!(Money::usd(Decimal::new(10005, 3)).minor_units().unwrap(), 1001);
        assert_eq!(Money::from_minor_units(250, "usd"), Money::usd(Decimal::new(250, 2)));
    }
    #[test]
    fn test_ensure_cents() {
        assert!(Money::usd(Decimal::new(1250, 2)).ensure_cents().is_ok());
        assert!(Money::usd(Decimal::new(12500, 3)).ensure_cents().is_ok());
        assert_eq!(Money::usd(Decimal::new(4, 3)).ensure_cents(), Err(MoneyError::TooPrecise { amount: Decimal::new(4, 3) }));
    }
    #[test]
    fn test_quantity() {
        let q = Quantity::new(3);
        assert_eq!(q.subtract(4), None);
        assert_eq!(q.subtract(3), Some(Quantity::new(0)));
        assert_eq!(Quantity::new(u32::MAX).add(1).value(), u32::MAX);
    }
}
