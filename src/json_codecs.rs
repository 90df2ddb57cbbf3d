//! The beacon API encodes every integer as a decimal string. These decode them.
use serde::{de, Deserialize, Deserializer};

pub fn from_u64_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<u64>().map_err(|error| {
        de::Error::invalid_value(
            de::Unexpected::Str(&format!("unexpected value: {}, error: {}", s, error)),
            &"a number as string e.g. \"18446744073709551615\", which fits within u64",
        )
    })
}

pub fn from_i32_string<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<i32>().map_err(|error| {
        de::Error::invalid_value(
            de::Unexpected::Str(&format!("unexpected value: {}, error: {}", s, error)),
            &"a number as string e.g. \"1229\", which fits within i32",
        )
    })
}
