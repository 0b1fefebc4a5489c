use serde::{Deserialize, Deserializer};

/// Deserialize `null` (or a missing field, with `#[serde(default)]`) as `T::default()`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let opt: Option<T> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Deserialize an embedded aggregate such as `likes: [{"count": 3}]` into `3`.
///
/// Plain numbers are accepted too, so both the embedded form and a flat
/// `like_count` column decode.
pub fn embedded_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    let count = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::Array(items)) => items
            .first()
            .and_then(|v| v.get("count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        Some(serde_json::Value::Object(obj)) => {
            obj.get("count").and_then(|v| v.as_u64()).unwrap_or(0)
        }
        _ => 0,
    };
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Row {
        #[serde(default, deserialize_with = "null_as_default")]
        body: String,
        #[serde(default, deserialize_with = "embedded_count")]
        likes: u32,
    }

    #[test]
    fn null_and_missing_fields_default() {
        let row: Row = serde_json::from_str(r#"{"body":null}"#).unwrap();
        assert_eq!(row.body, "");
        assert_eq!(row.likes, 0);
    }

    #[test]
    fn embedded_counts_decode_in_all_shapes() {
        let row: Row = serde_json::from_str(r#"{"body":"x","likes":[{"count":7}]}"#).unwrap();
        assert_eq!(row.likes, 7);
        let row: Row = serde_json::from_str(r#"{"body":"x","likes":{"count":2}}"#).unwrap();
        assert_eq!(row.likes, 2);
        let row: Row = serde_json::from_str(r#"{"body":"x","likes":11}"#).unwrap();
        assert_eq!(row.likes, 11);
    }
}
