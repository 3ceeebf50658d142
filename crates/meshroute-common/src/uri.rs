//! Serde adapters and helpers for [`http::Uri`].
//!
//! `Uri` has no serde support of its own, so property payloads carry URIs as
//! strings and these modules convert at the boundary.

use http::Uri;

use crate::error::{Result, RouteError};

/// Extracts the service name from a request URI such as `d2://articles/42`.
pub fn service_name(uri: &Uri) -> Result<&str> {
    uri.host()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| RouteError::InvalidRequest(format!("no service name in '{}'", uri)))
}

/// Serializes a single `Uri` as its string form.
pub mod uri_string {
    use http::Uri;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(uri)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uri, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Uri>().map_err(D::Error::custom)
    }
}

/// Serializes a `HashSet<Uri>` as a list of strings.
pub mod uri_set {
    use std::collections::HashSet;

    use http::Uri;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(uris: &HashSet<Uri>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut sorted: Vec<String> = uris.iter().map(ToString::to_string).collect();
        sorted.sort();
        serializer.collect_seq(sorted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashSet<Uri>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| s.parse::<Uri>().map_err(D::Error::custom))
            .collect()
    }
}

/// Serializes a `HashMap<Uri, V>` as an object keyed by URI strings.
pub mod uri_map {
    use std::collections::{BTreeMap, HashMap};

    use http::Uri;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, V>(map: &HashMap<Uri, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let ordered: BTreeMap<String, &V> = map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        ordered.serialize(serializer)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<HashMap<Uri, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let raw = HashMap::<String, V>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| k.parse::<Uri>().map(|uri| (uri, v)).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_from_uri() {
        let uri: Uri = "d2://articles/42?fields=id".parse().unwrap();
        assert_eq!(service_name(&uri).unwrap(), "articles");
    }

    #[test]
    fn test_service_name_requires_authority() {
        let uri: Uri = "/articles/42".parse().unwrap();
        assert!(matches!(service_name(&uri), Err(RouteError::InvalidRequest(_))));
    }
}
