// SPDX-License-Identifier: MIT
//! Order totals from unit + nano amounts.
//!
//! Prices arrive as whole units plus nanos (10^-9 units). Totals are summed
//! exactly in integer nanos and only converted to `f64` for the order-value
//! metrics and span attributes, so long carts don't accumulate rounding
//! error.

const NANOS_PER_UNIT: i128 = 1_000_000_000;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("nanos {0} out of range (-999_999_999..=999_999_999)")]
    NanosOutOfRange(i32),

    #[error("units and nanos have opposite signs ({units}, {nanos})")]
    SignMismatch { units: i64, nanos: i32 },

    #[error("order total overflows")]
    Overflow,
}

/// An amount in one currency, normalized so `units` and `nanos` share a sign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Money {
    units: i64,
    nanos: i32,
}

impl Money {
    pub fn new(units: i64, nanos: i32) -> Result<Self, MoneyError> {
        if !(-999_999_999..=999_999_999).contains(&nanos) {
            return Err(MoneyError::NanosOutOfRange(nanos));
        }
        if (units > 0 && nanos < 0) || (units < 0 && nanos > 0) {
            return Err(MoneyError::SignMismatch { units, nanos });
        }
        Ok(Self { units, nanos })
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    fn total_nanos(self) -> i128 {
        i128::from(self.units) * NANOS_PER_UNIT + i128::from(self.nanos)
    }

    fn from_total_nanos(total: i128) -> Result<Self, MoneyError> {
        // Truncating division keeps units and nanos on the same side of zero.
        let units = i64::try_from(total / NANOS_PER_UNIT).map_err(|_| MoneyError::Overflow)?;
        let nanos = (total % NANOS_PER_UNIT) as i32;
        Ok(Self { units, nanos })
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        Self::from_total_nanos(self.total_nanos() + other.total_nanos())
    }

    /// `self` multiplied by an item quantity.
    pub fn checked_mul(self, quantity: u32) -> Result<Money, MoneyError> {
        Self::from_total_nanos(self.total_nanos() * i128::from(quantity))
    }

    /// Sum of all amounts, failing instead of wrapping.
    pub fn sum<I>(amounts: I) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::default(), Money::checked_add)
    }

    /// Lossy conversion for metrics; exact for anything a checkout sees.
    pub fn to_f64(self) -> f64 {
        self.units as f64 + f64::from(self.nanos) / 1e9
    }
}
