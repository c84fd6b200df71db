// Serde helpers for model fields that may come from the API in multiple formats.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum DecimalFormat {
    Number(f64),
    String(String),
}

impl DecimalFormat {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            DecimalFormat::Number(v) => Ok(v),
            DecimalFormat::String(s) => s.trim().parse::<f64>().map_err(E::custom),
        }
    }
}

/// Deserializes a decimal from either a JSON number or a string such as "12.50".
/// Django REST Framework renders `DecimalField` values as strings by default.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    DecimalFormat::deserialize(deserializer)?.into_f64()
}

/// Optional variant of [`deserialize_decimal`]; `null` and `""` both become `None`.
pub fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DecimalFormat>::deserialize(deserializer)? {
        None => Ok(None),
        Some(DecimalFormat::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value.into_f64().map(Some),
    }
}
