use serde_json::Value as JsonValue;

const REDACTED: &str = "[REDACTED]";

/// Mask customer PII (names, contact details, birth data) in a JSON payload
/// before it reaches the logs. Structure and non-personal fields are kept.
pub fn redact_sensitive_data(data: &JsonValue) -> JsonValue {
    match data {
        JsonValue::Object(map) => {
            let mut redacted_map = serde_json::Map::new();
            for (key, val) in map {
                let redacted_val = if is_sensitive_field(key) {
                    redact_leaf(val)
                } else {
                    redact_sensitive_data(val)
                };
                redacted_map.insert(key.clone(), redacted_val);
            }
            JsonValue::Object(redacted_map)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(redact_sensitive_data).collect()),
        _ => data.clone(),
    }
}

/// `jane@example.com` becomes `j***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        _ => REDACTED.to_string(),
    }
}

fn is_sensitive_field(field_name: &str) -> bool {
    let normalized: String = field_name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase();
    matches!(
        normalized.as_str(),
        "email"
            | "customeremail"
            | "name"
            | "customername"
            | "phone"
            | "birthdate"
            | "birthtime"
            | "birthplace"
            | "password"
            | "token"
            | "notes"
    )
}

fn redact_leaf(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) if s.is_empty() => value.clone(),
        JsonValue::Null => JsonValue::Null,
        JsonValue::Object(_) | JsonValue::Array(_) => redact_sensitive_data(value),
        _ => JsonValue::String(REDACTED.to_string()),
    }
}
