use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Deserialize an optional human-readable duration such as `"30s"` or `"2m"`
pub(crate) fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| duration_str::parse(&raw).map_err(|e| serde::de::Error::custom(format!("invalid duration '{raw}': {e}"))))
        .transpose()
}
