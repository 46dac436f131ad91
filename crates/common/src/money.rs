use serde::{Deserialize, Serialize};

/// Monetary amount in minor units (cents) to avoid floating point drift.
///
/// The currency code travels next to the amount on each record rather than
/// inside this type, matching the `currency` columns of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    minor: i64,
}

impl Money {
    /// Creates an amount from minor units.
    pub fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Creates an amount from whole major units.
    pub fn from_major(major: i64) -> Self {
        Self {
            minor: major * 100,
        }
    }

    /// Returns zero.
    pub fn zero() -> Self {
        Self { minor: 0 }
    }

    /// Returns the amount in minor units.
    pub fn minor(&self) -> i64 {
        self.minor
    }

    /// Returns the whole major units.
    pub fn major(&self) -> i64 {
        self.minor / 100
    }

    /// Returns the minor remainder after major units.
    pub fn minor_part(&self) -> i64 {
        self.minor.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Multiplies by a whole quantity, returning `None` on overflow.
    pub fn checked_multiply(&self, quantity: i64) -> Option<Money> {
        self.minor.checked_mul(quantity).map(Money::from_minor)
    }

    /// Formats the amount with a currency code, e.g. `KES 1,250.00`.
    pub fn format_with(&self, currency: &str) -> String {
        let major = self.major().abs().to_string();
        let mut grouped = String::with_capacity(major.len() + major.len() / 3);
        for (i, ch) in major.chars().enumerate() {
            if i > 0 && (major.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        let sign = if self.minor < 0 { "-" } else { "" };
        format!("{currency} {sign}{grouped}.{:02}", self.minor_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.minor < 0 {
            write!(f, "-{}.{:02}", self.major().abs(), self.minor_part())
        } else {
            write!(f, "{}.{:02}", self.major(), self.minor_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            minor: self.minor + rhs.minor,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            minor: self.minor - rhs.minor,
        }
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_minor() {
        let money = Money::from_minor(1234);
        assert_eq!(money.minor(), 1234);
        assert_eq!(money.major(), 12);
        assert_eq!(money.minor_part(), 34);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_minor(1234).to_string(), "12.34");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_format_with_groups_thousands() {
        assert_eq!(Money::from_major(1_250_000).format_with("KES"), "KES 1,250,000.00");
        assert_eq!(Money::from_minor(99_950).format_with("USD"), "USD 999.50");
        assert_eq!(Money::from_minor(-150_000).format_with("KES"), "KES -1,500.00");
    }

    #[test]
    fn test_checked_multiply() {
        assert_eq!(
            Money::from_minor(650).checked_multiply(1000),
            Some(Money::from_minor(650_000))
        );
        assert_eq!(Money::from_minor(i64::MAX).checked_multiply(2), None);
    }

    #[test]
    fn test_sum() {
        let total: Money = [Money::from_major(1), Money::from_minor(50)].into_iter().sum();
        assert_eq!(total.minor(), 150);
    }
}
