use derive_more::{Add, AddAssign, Sum};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

pub type ResourceUnits = u64;
pub type ResourceFractions = u32;

pub const FRACTIONS_PER_UNIT: ResourceFractions = 10_000;
pub const FRACTIONS_MAX_DIGITS: usize = 4; // = log10(FRACTIONS_PER_UNIT)

/// Fixed-point quantity of a consumable (slots, memory, licenses, ...).
///
/// Stored as a number of 1/10000 fractions so that bookings and releases
/// are exact and the ledger never accumulates floating point drift.
#[derive(
    Debug, Default, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, AddAssign, Add, Sum,
)]
pub struct ResourceAmount(u64);

impl ResourceAmount {
    pub const ZERO: ResourceAmount = ResourceAmount(0);
    pub const MAX: ResourceAmount = ResourceAmount(u64::MAX);

    pub fn new(units: ResourceUnits, fractions: ResourceFractions) -> Self {
        assert!(fractions < FRACTIONS_PER_UNIT);
        ResourceAmount(units * FRACTIONS_PER_UNIT as u64 + fractions as u64)
    }

    pub const fn new_units(units: ResourceUnits) -> Self {
        ResourceAmount(units * FRACTIONS_PER_UNIT as u64)
    }

    pub fn from_f64(value: f64) -> Self {
        if value <= 0.0 {
            return ResourceAmount::ZERO;
        }
        ResourceAmount((value * FRACTIONS_PER_UNIT as f64).round() as u64)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn units(&self) -> ResourceUnits {
        self.0 / FRACTIONS_PER_UNIT as u64
    }

    pub fn fractions(&self) -> ResourceFractions {
        (self.0 % FRACTIONS_PER_UNIT as u64) as ResourceFractions
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / FRACTIONS_PER_UNIT as f64
    }

    pub fn saturating_mul(&self, count: u32) -> ResourceAmount {
        ResourceAmount(self.0.saturating_mul(count as u64))
    }

    pub fn saturating_add(&self, other: ResourceAmount) -> ResourceAmount {
        ResourceAmount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: ResourceAmount) -> ResourceAmount {
        ResourceAmount(self.0.saturating_sub(other.0))
    }

    /// How many times `request` fits into `self`; unlimited for a zero request.
    pub fn times_fits(&self, request: ResourceAmount) -> u32 {
        if request.is_zero() {
            u32::MAX
        } else {
            (self.0 / request.0).min(u32::MAX as u64) as u32
        }
    }
}

impl From<u32> for ResourceAmount {
    fn from(value: u32) -> Self {
        ResourceAmount::new_units(value as ResourceUnits)
    }
}

impl std::fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if *self == ResourceAmount::MAX {
            return write!(f, "infinity");
        }
        let fractions = self.fractions();
        write!(f, "{}", self.units())?;
        if fractions != 0 {
            let num = format!("{:01$}", fractions, FRACTIONS_MAX_DIGITS);
            write!(f, ".{}", num.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

/// Parses amounts like `2`, `0.5`, `4G` (binary multiplier) or `4g` (decimal multiplier).
impl FromStr for ResourceAmount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("infinity") {
            return Ok(ResourceAmount::MAX);
        }
        let (number, multiplier) = match s.chars().last() {
            Some('k') => (&s[..s.len() - 1], 1_000f64),
            Some('K') => (&s[..s.len() - 1], 1024f64),
            Some('m') => (&s[..s.len() - 1], 1_000_000f64),
            Some('M') => (&s[..s.len() - 1], 1024f64 * 1024f64),
            Some('g') => (&s[..s.len() - 1], 1_000_000_000f64),
            Some('G') => (&s[..s.len() - 1], 1024f64 * 1024f64 * 1024f64),
            _ => (s, 1f64),
        };
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid resource amount: '{s}'"))?;
        if value < 0.0 || !value.is_finite() {
            return Err(format!("Invalid resource amount: '{s}'"));
        }
        Ok(ResourceAmount::from_f64(value * multiplier))
    }
}

impl Serialize for ResourceAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.fractions() == 0 && *self != ResourceAmount::MAX {
            serializer.serialize_u64(self.units())
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for ResourceAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Float(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(units) => Ok(ResourceAmount::new_units(units)),
            Raw::Float(value) => Ok(ResourceAmount::from_f64(value)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}
