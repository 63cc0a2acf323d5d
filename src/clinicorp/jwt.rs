use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use serde_json::{Map, Value};

pub type Claims = Map<String, Value>;

const CLINIC_ID_KEYS: &[&str] = &[
    "Clinic_BusinessId",
    "clinic_id",
    "ClinicId",
    "NamespaceId",
    "namespaceId",
];
const USER_ID_KEYS: &[&str] = &["id", "UserId", "userId", "CreateUserId"];

/// Reads the payload segment of a JWT. The signature is not checked: the
/// token came straight from the login response and is only mined for ids.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = BASE64_URL.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Seconds until `exp`, when the claim exists and lies in the future.
pub fn expires_in(claims: &Claims, now: i64) -> Option<u64> {
    let exp = claims.get("exp")?;
    let exp = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
    u64::try_from(exp - now).ok().filter(|secs| *secs > 0)
}

pub fn clinic_id(claims: &Claims) -> Option<String> {
    CLINIC_ID_KEYS
        .iter()
        .find_map(|key| claims.get(*key).and_then(value_to_id))
}

pub fn user_id(claims: &Claims) -> Option<i64> {
    USER_ID_KEYS.iter().find_map(|key| {
        claims
            .get(*key)
            .and_then(value_to_id)
            .and_then(|id| id.parse::<i64>().ok())
    })
}

/// Ids come back either as JSON numbers or numeric strings.
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &Value) -> String {
    let header = BASE64_URL.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = BASE64_URL.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_payload_without_verifying() {
        let token = encode_test_token(&json!({"Clinic_BusinessId": 6556997543657472u64, "id": "42"}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(clinic_id(&claims).as_deref(), Some("6556997543657472"));
        assert_eq!(user_id(&claims), Some(42));
    }

    #[test]
    fn tolerates_padding_and_garbage() {
        let payload = BASE64_URL.encode(r#"{"exp":100}"#);
        let token = format!("h.{payload}==.s");
        assert!(decode_claims(&token).is_some());

        assert!(decode_claims("SESSION_ACTIVE").is_none());
        assert!(decode_claims("a.!!!.c").is_none());
    }

    #[test]
    fn expiry_is_relative_to_now() {
        let claims = decode_claims(&encode_test_token(&json!({"exp": 1_000}))).unwrap();
        assert_eq!(expires_in(&claims, 400), Some(600));
        assert_eq!(expires_in(&claims, 1_000), None);
        assert_eq!(expires_in(&claims, 2_000), None);
    }

    #[test]
    fn falls_back_through_id_keys() {
        let claims = decode_claims(&encode_test_token(&json!({
            "NamespaceId": "777",
            "userId": 9
        })))
        .unwrap();
        assert_eq!(clinic_id(&claims).as_deref(), Some("777"));
        assert_eq!(user_id(&claims), Some(9));

        let empty = Claims::new();
        assert!(clinic_id(&empty).is_none());
        assert!(user_id(&empty).is_none());
    }
}
