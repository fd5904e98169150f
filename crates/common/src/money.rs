use serde::{Deserialize, Serialize};

/// Money amount represented in minor units (cents).
///
/// Balances are never negative; transaction amounts are signed, with debits
/// carrying a negative value. The operators saturate at the `i64` bounds;
/// code that must reject overflow uses the `checked_*` methods.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole-unit portion.
    pub fn units(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents portion (remainder after whole units).
    pub fn cents_part(&self) -> i64 {
        self.0.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the amount with its sign flipped.
    pub fn negated(&self) -> Money {
        Money(self.0.saturating_neg())
    }

    /// Adds two amounts, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Subtracts two amounts, returning `None` on overflow.
    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn saturating_add(&self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    /// Returns `basis_points / 10000` of this amount, rounded toward zero.
    pub fn fraction_bps(&self, basis_points: u32) -> Money {
        let scaled = i128::from(self.0) * i128::from(basis_points) / 10_000;
        Money(scaled as i64)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-{}.{:02}", self.units().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.units(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc.saturating_add(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_cents() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.units(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(300);

        assert_eq!((a + b).cents(), 1300);
        assert_eq!((a - b).cents(), 700);
        assert_eq!((-a).cents(), -1000);
        assert_eq!(a.negated(), Money::from_cents(-1000));
    }

    #[test]
    fn test_checked_add_overflow() {
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
        assert_eq!(
            Money::from_cents(1).checked_add(Money::from_cents(2)),
            Some(Money::from_cents(3))
        );
    }

    #[test]
    fn test_operators_saturate_at_bounds() {
        let max = Money::from_cents(i64::MAX);
        let min = Money::from_cents(i64::MIN);

        assert_eq!(max + Money::from_cents(1), max);
        assert_eq!(min - Money::from_cents(1), min);
        assert_eq!(min.negated(), max);
        assert_eq!(-min, max);

        let mut acc = max;
        acc += Money::from_cents(10);
        assert_eq!(acc, max);
        acc -= max;
        acc -= max;
        acc -= max;
        assert_eq!(acc, min);

        assert_eq!(min.checked_sub(Money::from_cents(1)), None);
        assert_eq!(
            Money::from_cents(5).checked_sub(Money::from_cents(7)),
            Some(Money::from_cents(-2))
        );
    }

    #[test]
    fn test_sum_saturates() {
        let total: Money = [i64::MAX, i64::MAX, -5]
            .into_iter()
            .map(Money::from_cents)
            .sum();
        assert_eq!(total, Money::from_cents(i64::MAX - 5));

        let total: Money = [i64::MIN, -1].into_iter().map(Money::from_cents).sum();
        assert_eq!(total, Money::from_cents(i64::MIN));
    }

    #[test]
    fn test_fraction_bps_rounds_toward_zero() {
        assert_eq!(Money::from_cents(10_000).fraction_bps(100).cents(), 100);
        assert_eq!(Money::from_cents(199).fraction_bps(100).cents(), 1);
        assert_eq!(Money::from_cents(99).fraction_bps(100).cents(), 0);
        assert_eq!(Money::from_cents(500).fraction_bps(0).cents(), 0);
    }

    #[test]
    fn test_sum() {
        let total: Money = [100, -30, 5].into_iter().map(Money::from_cents).sum();
        assert_eq!(total.cents(), 75);
    }

    #[test]
    fn test_sign_predicates() {
        assert!(Money::from_cents(100).is_positive());
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(-100).is_negative());
    }
}
