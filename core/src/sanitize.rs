use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Field names whose values are replaced entirely.
const FULL_REDACT_FIELDS: [&str; 12] = [
    "password",
    "passwd",
    "secret",
    "client_secret",
    "api_key",
    "apikey",
    "token",
    "access_token",
    "refresh_token",
    "authorization",
    "cvv",
    "cvc",
];

/// Field names masked to BIN + ***** + last4.
const CARD_FIELDS: [&str; 4] = ["card_number", "cardnumber", "pan", "credit_card"];

/// Field names masked to last 4 characters only.
const LAST4_FIELDS: [&str; 4] = ["ssn", "account_number", "accountnumber", "iban"];

const REDACTED: &str = "****";

/// XML elements whose inner text is masked, both in literal and
/// HTML-escaped form.
static XML_MASK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    const ELEMENTS: [&str; 6] = [
        "Password",
        "CardNumber",
        "CVV",
        "SSN",
        "AccountNumber",
        "Token",
    ];
    let mut patterns = Vec::with_capacity(ELEMENTS.len() * 2);
    for element in ELEMENTS {
        patterns.push(
            Regex::new(&format!(r"(?i)(<{element}>)([^<]*)(</{element}>)"))
                .expect("literal xml mask pattern"),
        );
        patterns.push(
            Regex::new(&format!(
                r"(?i)(&lt;{element}&gt;)(.*?)(&lt;/{element}&gt;)"
            ))
            .expect("escaped xml mask pattern"),
        );
    }
    patterns
});

/// Strip CR and LF so attacker-controlled input cannot forge log records.
pub fn sanitize_log(input: &str) -> String {
    input.replace(['\r', '\n'], "")
}

/// Mask a field value according to the closed lookup table. Returns `None`
/// when the field is not sensitive.
pub fn mask_field(name: &str, value: &str) -> Option<String> {
    let key = name.to_ascii_lowercase();
    if FULL_REDACT_FIELDS.contains(&key.as_str()) {
        return Some(REDACTED.to_string());
    }
    if CARD_FIELDS.contains(&key.as_str()) {
        return Some(mask_card(value));
    }
    if LAST4_FIELDS.contains(&key.as_str()) {
        return Some(mask_last4(value));
    }
    None
}

/// Card numbers keep the BIN and the last four digits: `411111*****1111`.
fn mask_card(value: &str) -> String {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return REDACTED.to_string();
    }
    let bin = &digits[..6];
    let last4 = &digits[digits.len() - 4..];
    format!("{bin}*****{last4}")
}

fn mask_last4(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return REDACTED.to_string();
    }
    let last4: String = chars[chars.len() - 4..].iter().collect();
    format!("{REDACTED}{last4}")
}

/// Recursively sanitize a JSON document. A string-valued `body` field is
/// tried as embedded JSON so nested payloads get the same treatment.
pub fn sanitize_json(value: &Value) -> Value {
    sanitize_json_inner(value, None)
}

fn sanitize_json_inner(value: &Value, field: Option<&str>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                out.insert(key.clone(), sanitize_json_inner(inner, Some(key)));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_json_inner(item, field))
                .collect(),
        ),
        Value::String(text) => {
            if let Some(name) = field {
                if let Some(masked) = mask_field(name, text) {
                    return Value::String(masked);
                }
                if name == "body" {
                    if let Ok(embedded) = serde_json::from_str::<Value>(text) {
                        if embedded.is_object() || embedded.is_array() {
                            let cleaned = sanitize_json(&embedded);
                            return Value::String(
                                serde_json::to_string(&cleaned).unwrap_or_default(),
                            );
                        }
                    }
                }
            }
            value.clone()
        }
        other => {
            if let Some(name) = field {
                if let Some(masked) = mask_field(name, &other.to_string()) {
                    return Value::String(masked);
                }
            }
            other.clone()
        }
    }
}

/// Mask known sensitive XML elements in literal and HTML-escaped form.
pub fn sanitize_xml(xml: &str) -> String {
    let mut out = xml.to_string();
    for pattern in XML_MASK_PATTERNS.iter() {
        out = pattern.replace_all(&out, "${1}****${3}").into_owned();
    }
    out
}
