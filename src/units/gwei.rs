use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{de, de::Visitor, Deserialize, Serialize};

// Validator balances are reported in Gwei. An i64 holds ~9_000_000_000 ETH, far more than any
// single validator, and maps onto a BIGINT column. Serializes as a string like the beacon API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(into = "String")]
#[sqlx(transparent)]
pub struct GweiNewtype(pub i64);

impl fmt::Display for GweiNewtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<GweiNewtype> for i64 {
    fn from(GweiNewtype(amount): GweiNewtype) -> Self {
        amount
    }
}

impl From<GweiNewtype> for String {
    fn from(GweiNewtype(amount): GweiNewtype) -> Self {
        amount.to_string()
    }
}

impl From<i64> for GweiNewtype {
    fn from(amount: i64) -> Self {
        GweiNewtype(amount)
    }
}

struct GweiAmountVisitor;

impl Visitor<'_> for GweiAmountVisitor {
    type Value = GweiNewtype;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(
            "a number, or string of number, smaller than i64::MAX representing some amount of ETH in Gwei",
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.parse::<i64>().map(GweiNewtype).map_err(|error| {
            de::Error::invalid_value(
                de::Unexpected::Str(&format!("unexpected value: {v}, error: {error}")),
                &"a number as string: \"32000000000\", which fits within i64",
            )
        })
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(GweiNewtype(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i64::try_from(v)
            .map(GweiNewtype)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Unsigned(v), &self))
    }
}

impl<'de> Deserialize<'de> for GweiNewtype {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(GweiAmountVisitor)
    }
}

impl FromStr for GweiNewtype {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(GweiNewtype)
    }
}
