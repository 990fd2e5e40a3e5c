//! Fixed-point currency.
//!
//! All monetary amounts in the runtime are `Money`: an integer count of
//! hundredths. The wire representation carries the scaled integer and its
//! scale explicitly, so amounts survive serialization without ever passing
//! through a float.

use serde::{Deserialize, Serialize};

/// A monetary amount held as hundredths of a unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    cents: i64,
}

/// Wire form: scaled integer value plus decimal scale.
#[derive(Serialize, Deserialize)]
struct MoneyRepr {
    value: i64,
    scale: u32,
}

impl From<MoneyRepr> for Money {
    fn from(r: MoneyRepr) -> Self {
        if r.scale <= 2 {
            Money {
                cents: r.value.saturating_mul(pow10(2 - r.scale)),
            }
        } else {
            Money {
                cents: div_round_half_even(r.value, pow10(r.scale - 2)),
            }
        }
    }
}

impl From<Money> for MoneyRepr {
    fn from(m: Money) -> Self {
        MoneyRepr {
            value: m.cents,
            scale: 2,
        }
    }
}

fn pow10(exp: u32) -> i64 {
    10i64.checked_pow(exp.min(18)).unwrap_or(i64::MAX)
}

/// Divide rounding half to even (banker's rounding), `d > 0`.
fn div_round_half_even(n: i64, d: i64) -> i64 {
    let q = n.div_euclid(d);
    let r = n.rem_euclid(d);
    let twice = 2 * r;
    if twice > d || (twice == d && q % 2 != 0) {
        q + 1
    } else {
        q
    }
}

/// Divide rounding half away from zero, `d > 0`.
fn div_round_up_away(n: i64, d: i64) -> i64 {
    if n >= 0 {
        (n + d - 1) / d
    } else {
        -((-n + d - 1) / d)
    }
}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub fn from_cents(cents: i64) -> Self {
        Money { cents }
    }

    pub fn from_units(units: i64) -> Self {
        Money {
            cents: units.saturating_mul(100),
        }
    }

    /// Round a float amount to the nearest hundredth. Used only at the
    /// parameter/exchange-rate boundary, never on the wire.
    pub fn from_f64(value: f64) -> Self {
        Money {
            cents: (value * 100.0).round() as i64,
        }
    }

    pub fn cents(self) -> i64 {
        self.cents
    }

    pub fn to_f64(self) -> f64 {
        self.cents as f64 / 100.0
    }

    pub fn is_negative(self) -> bool {
        self.cents < 0
    }

    pub fn is_positive(self) -> bool {
        self.cents > 0
    }

    /// Quantize to one decimal place (nearest tenth, half to even), the
    /// canonical precision for auction bids and asks.
    pub fn quantize_tenth(self) -> Self {
        Money {
            cents: div_round_half_even(self.cents, 10) * 10,
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

impl std::ops::Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money { cents: -self.cents }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.cents += rhs.cents;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.cents -= rhs.cents;
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Error parsing a decimal string into `Money`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMoneyError(String);

impl std::fmt::Display for ParseMoneyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid money amount: {:?}", self.0)
    }
}

impl std::error::Error for ParseMoneyError {}

impl std::str::FromStr for Money {
    type Err = ParseMoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let (negative, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let (int_part, frac_part) = match t.split_once('.') {
            Some((i, f)) => (i, f),
            None => (t, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseMoneyError(s.to_string()));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ParseMoneyError(s.to_string()));
        }
        let units: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| ParseMoneyError(s.to_string()))?
        };
        // Take the fractional digits at scale 2, rounding any extras.
        let mut frac_cents = 0i64;
        if !frac_part.is_empty() {
            let digits: String = frac_part.chars().take(4).collect();
            let scaled: i64 = digits.parse().map_err(|_| ParseMoneyError(s.to_string()))?;
            let scale = digits.len() as u32;
            frac_cents = if scale <= 2 {
                scaled * pow10(2 - scale)
            } else {
                div_round_half_even(scaled, pow10(scale - 2))
            };
        }
        let cents = units * 100 + frac_cents;
        Ok(Money {
            cents: if negative { -cents } else { cents },
        })
    }
}

/// Payout rounding applied to a seat's final earnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingPolicy {
    /// Nearest hundredth (identity at this scale).
    #[default]
    Penny,
    /// Nearest quarter-unit.
    Quarter,
    /// Next quarter-unit away from zero.
    QuarterUp,
    /// Nearest whole unit.
    Dollar,
    /// Next whole unit away from zero.
    DollarUp,
}

impl RoundingPolicy {
    pub fn apply(self, amount: Money) -> Money {
        let cents = amount.cents;
        let rounded = match self {
            RoundingPolicy::Penny => cents,
            RoundingPolicy::Quarter => div_round_half_even(cents, 25) * 25,
            RoundingPolicy::QuarterUp => div_round_up_away(cents, 25) * 25,
            RoundingPolicy::Dollar => div_round_half_even(cents, 100) * 100,
            RoundingPolicy::DollarUp => div_round_up_away(cents, 100) * 100,
        };
        Money { cents: rounded }
    }

    pub fn parse(s: &str) -> Option<RoundingPolicy> {
        match s {
            "penny" => Some(RoundingPolicy::Penny),
            "quarter" => Some(RoundingPolicy::Quarter),
            "quarter-up" => Some(RoundingPolicy::QuarterUp),
            "dollar" => Some(RoundingPolicy::Dollar),
            "dollar-up" => Some(RoundingPolicy::DollarUp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoundingPolicy::Penny => "penny",
            RoundingPolicy::Quarter => "quarter",
            RoundingPolicy::QuarterUp => "quarter-up",
            RoundingPolicy::Dollar => "dollar",
            RoundingPolicy::DollarUp => "dollar-up",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(m("10.50").cents(), 1050);
        assert_eq!(m("10.5").cents(), 1050);
        assert_eq!(m("10").cents(), 1000);
        assert_eq!(m("-0.25").cents(), -25);
        assert_eq!(m(".5").cents(), 50);
        assert_eq!(m("3.07").to_string(), "3.07");
        assert_eq!(m("-3.07").to_string(), "-3.07");
        assert!("".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
        assert!("ten".parse::<Money>().is_err());
    }

    #[test]
    fn quantize_tenth_rounds_half_to_even() {
        assert_eq!(m("1.25").quantize_tenth(), m("1.20"));
        assert_eq!(m("1.35").quantize_tenth(), m("1.40"));
        assert_eq!(m("1.24").quantize_tenth(), m("1.20"));
        assert_eq!(m("1.26").quantize_tenth(), m("1.30"));
        assert_eq!(m("-1.25").quantize_tenth(), m("-1.20"));
    }

    #[test]
    fn rounding_policies() {
        let x = m("3.37");
        assert_eq!(RoundingPolicy::Penny.apply(x), m("3.37"));
        assert_eq!(RoundingPolicy::Quarter.apply(x), m("3.25"));
        assert_eq!(RoundingPolicy::QuarterUp.apply(x), m("3.50"));
        assert_eq!(RoundingPolicy::Dollar.apply(x), m("3.00"));
        assert_eq!(RoundingPolicy::DollarUp.apply(x), m("4.00"));
        // Half-to-even at the quarter boundary: 3.125 quarters -> 12.5 -> 12
        assert_eq!(RoundingPolicy::Quarter.apply(m("3.13")), m("3.25"));
        assert_eq!(RoundingPolicy::Dollar.apply(m("2.50")), m("2.00"));
        assert_eq!(RoundingPolicy::Dollar.apply(m("3.50")), m("4.00"));
    }

    #[test]
    fn rounding_policy_parse() {
        assert_eq!(RoundingPolicy::parse("penny"), Some(RoundingPolicy::Penny));
        assert_eq!(
            RoundingPolicy::parse("quarter-up"),
            Some(RoundingPolicy::QuarterUp)
        );
        assert_eq!(RoundingPolicy::parse("half-crown"), None);
    }

    #[test]
    fn wire_repr_preserves_scale() {
        let amount = m("12.30");
        let json = serde_json::to_string(&amount).unwrap();
        assert!(json.contains("\"value\":1230"));
        assert!(json.contains("\"scale\":2"));
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
        // A coarser scale is rescaled on decode.
        let coarse: Money = serde_json::from_str(r#"{"value":15,"scale":1}"#).unwrap();
        assert_eq!(coarse, m("1.50"));
        let fine: Money = serde_json::from_str(r#"{"value":12345,"scale":3}"#).unwrap();
        assert_eq!(fine, m("12.34"));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(m("1.50") + m("0.75"), m("2.25"));
        assert_eq!(m("1.50") - m("2.00"), m("-0.50"));
        assert_eq!(-m("1.50"), m("-1.50"));
        assert!(m("-0.01").is_negative());
        assert!(m("0.01") > Money::ZERO);
    }
}
