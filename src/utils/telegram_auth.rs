use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header the Mini-App frontend uses to pass `window.Telegram.WebApp.initData`.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Default freshness window for `auth_date` (24 hours).
pub const DEFAULT_MAX_AGE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub user: Option<TelegramUser>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn failure(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            user: None,
            errors: vec![reason.into()],
        }
    }

    fn success(user: TelegramUser) -> Self {
        Self {
            valid: true,
            user: Some(user),
            errors: Vec::new(),
        }
    }
}

/// Validates Telegram WebApp `initData` against the bot token.
///
/// The payload is an ampersand-joined list of `key=value` pairs. The expected
/// signature is `hex(HMAC-SHA256(secret, data_check_string))` where
/// `secret = HMAC-SHA256("WebAppData", bot_token)` and the data-check string
/// is every pair except `hash`, sorted byte-wise and joined with `\n`.
///
/// Pure function of its arguments; never panics. Every failure comes back as
/// `valid == false` with a reason in `errors`.
pub fn validate_init_data(
    init_data: &str,
    bot_token: &str,
    now: DateTime<Utc>,
    max_age: Duration,
) -> ValidationResult {
    if init_data.is_empty() {
        return ValidationResult::failure("empty initData");
    }

    // Values stay exactly as they appear on the wire (still URL-encoded);
    // they are signed in that form. Duplicate keys: last occurrence wins.
    let mut fields: HashMap<String, String> = HashMap::new();
    for pair in init_data.split('&') {
        let mut parts = pair.splitn(2, '=');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            fields.insert(key.to_string(), value.to_string());
        }
    }

    // A payload without `hash` falls through to the signature check and
    // fails there like any other forgery.
    let supplied_hash = fields.remove("hash").unwrap_or_default();

    let Some(auth_date) = fields.get("auth_date") else {
        return ValidationResult::failure("missing auth_date");
    };
    let Ok(auth_ts) = auth_date.parse::<i64>() else {
        return ValidationResult::failure("invalid auth_date format");
    };

    // Inclusive boundary: a payload exactly `max_age` old is still accepted.
    // Saturating arithmetic keeps extreme auth_date values from overflowing.
    if now.timestamp().saturating_sub(auth_ts) > max_age.num_seconds() {
        return ValidationResult::failure("auth_date too old");
    }

    let mut lines: Vec<String> = fields
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    lines.sort();
    let data_check_string = lines.join("\n");

    let expected_hash = compute_hash(bot_token, &data_check_string);

    // Constant-time comparison; plain string equality here would leak a
    // timing oracle on the signature.
    let matches: bool = expected_hash
        .as_bytes()
        .ct_eq(supplied_hash.to_ascii_lowercase().as_bytes())
        .into();
    if !matches {
        return ValidationResult::failure("invalid hash");
    }

    // Fail closed: a signed payload whose user field cannot be decoded is
    // rejected rather than passed through with an empty identity.
    let Some(user_raw) = fields.get("user") else {
        return ValidationResult::failure("missing user");
    };
    let user_json = decode_component(user_raw);
    let user: TelegramUser = match serde_json::from_str(&user_json) {
        Ok(user) => user,
        Err(_) => return ValidationResult::failure("invalid user payload"),
    };
    if user.id == 0 {
        return ValidationResult::failure("invalid user payload");
    }

    ValidationResult::success(user)
}

fn compute_hash(bot_token: &str, data_check_string: &str) -> String {
    let mut secret =
        HmacSha256::new_from_slice(b"WebAppData").expect("HMAC accepts any key length");
    secret.update(bot_token.as_bytes());
    let secret_key = secret.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).expect("HMAC accepts any key length");
    mac.update(data_check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Percent-decodes a single field value (the `user` field carries URL-encoded
/// JSON on the wire). Literal `=` and `+` bytes pass through untouched.
fn decode_component(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "123:ABC";

    fn sign(pairs: &[(&str, &str)]) -> String {
        let mut lines: Vec<String> = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        lines.sort();
        compute_hash(BOT_TOKEN, &lines.join("\n"))
    }

    fn payload(pairs: &[(&str, &str)]) -> String {
        let hash = sign(pairs);
        let mut parts: Vec<String> = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(format!("hash={}", hash));
        parts.join("&")
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    #[test]
    fn accepts_genuine_payload_and_extracts_user() {
        let raw = payload(&[
            ("auth_date", "1700000000"),
            ("user", "%7B%22id%22%3A42%7D"),
        ]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
        assert!(result.valid, "errors: {:?}", result.errors);
        assert!(result.errors.is_empty());
        assert_eq!(result.user.unwrap().id, 42);
    }

    #[test]
    fn decodes_full_user_object() {
        // {"id":7,"first_name":"Ann","last_name":"Lee","username":"ann","language_code":"en"}
        let user = "%7B%22id%22%3A7%2C%22first_name%22%3A%22Ann%22%2C%22last_name%22%3A%22Lee%22%2C%22username%22%3A%22ann%22%2C%22language_code%22%3A%22en%22%7D";
        let raw = payload(&[("auth_date", "1700000000"), ("user", user)]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000000), Duration::hours(24));
        assert!(result.valid);
        let user = result.user.unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.first_name, "Ann");
        assert_eq!(user.last_name.as_deref(), Some("Lee"));
        assert_eq!(user.username.as_deref(), Some("ann"));
        assert_eq!(user.language_code.as_deref(), Some("en"));
    }

    #[test]
    fn user_field_with_literal_equals_and_plus_survives_decoding() {
        // {"id":42,"first_name":"a=b+c"}
        let user = "%7B%22id%22%3A42%2C%22first_name%22%3A%22a=b+c%22%7D";
        let raw = payload(&[("auth_date", "1700000000"), ("user", user)]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.user.unwrap().first_name, "a=b+c");
    }

    #[test]
    fn rejects_empty_payload() {
        let result = validate_init_data("", BOT_TOKEN, at(1700000000), Duration::hours(24));
        assert!(!result.valid);
        assert!(result.errors[0].contains("empty"));
    }

    #[test]
    fn rejects_missing_auth_date() {
        let raw = payload(&[("user", "%7B%22id%22%3A42%7D")]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000000), Duration::hours(24));
        assert!(!result.valid);
        assert!(result.errors[0].contains("auth_date"));
    }

    #[test]
    fn rejects_non_numeric_auth_date() {
        let raw = payload(&[
            ("auth_date", "2023-11-14T22:13:20Z"),
            ("user", "%7B%22id%22%3A42%7D"),
        ]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000000), Duration::hours(24));
        assert!(!result.valid);
        assert!(result.errors[0].contains("auth_date"));
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let raw = payload(&[
            ("auth_date", "1700000000"),
            ("user", "%7B%22id%22%3A42%7D"),
        ]);
        let max_age = Duration::hours(24);

        let exactly = at(1700000000 + max_age.num_seconds());
        assert!(validate_init_data(&raw, BOT_TOKEN, exactly, max_age).valid);

        let one_past = at(1700000000 + max_age.num_seconds() + 1);
        let result = validate_init_data(&raw, BOT_TOKEN, one_past, max_age);
        assert!(!result.valid);
        assert!(result.errors[0].contains("too old"));
    }

    #[test]
    fn extreme_auth_date_values_do_not_panic() {
        let max_age = Duration::hours(24);
        for auth_date in ["-9223372036854775808", "9223372036854775807"] {
            let raw = format!("auth_date={}&hash=deadbeef", auth_date);
            let result = validate_init_data(&raw, BOT_TOKEN, at(1700000000), max_age);
            assert!(!result.valid);
        }

        // i64::MIN saturates to the stalest possible payload.
        let result = validate_init_data(
            "auth_date=-9223372036854775808&hash=deadbeef",
            BOT_TOKEN,
            at(1700000000),
            max_age,
        );
        assert!(result.errors[0].contains("too old"));
    }

    #[test]
    fn rejects_any_single_character_flip_in_hash() {
        let pairs = [
            ("auth_date", "1700000000"),
            ("user", "%7B%22id%22%3A42%7D"),
        ];
        let good_hash = sign(&pairs);
        let body: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let body = body.join("&");

        for i in 0..good_hash.len() {
            let mut bad: Vec<u8> = good_hash.clone().into_bytes();
            bad[i] = if bad[i] == b'0' { b'1' } else { b'0' };
            let raw = format!("{}&hash={}", body, String::from_utf8(bad).unwrap());
            let result = validate_init_data(&raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
            assert!(!result.valid, "flip at {} accepted", i);
            assert!(result.errors[0].contains("hash"));
        }
    }

    #[test]
    fn rejects_missing_hash() {
        let raw = "auth_date=1700000000&user=%7B%22id%22%3A42%7D";
        let result = validate_init_data(raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
        assert!(!result.valid);
        assert!(result.errors[0].contains("hash"));
    }

    #[test]
    fn data_check_string_is_insertion_order_invariant() {
        let hash = sign(&[
            ("auth_date", "1700000000"),
            ("query_id", "AAE"),
            ("user", "%7B%22id%22%3A42%7D"),
        ]);
        let orderings = [
            format!(
                "auth_date=1700000000&query_id=AAE&user=%7B%22id%22%3A42%7D&hash={}",
                hash
            ),
            format!(
                "user=%7B%22id%22%3A42%7D&hash={}&query_id=AAE&auth_date=1700000000",
                hash
            ),
            format!(
                "hash={}&query_id=AAE&user=%7B%22id%22%3A42%7D&auth_date=1700000000",
                hash
            ),
        ];
        for raw in &orderings {
            let result = validate_init_data(raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
            assert!(result.valid, "ordering rejected: {}", raw);
        }
    }

    #[test]
    fn duplicate_keys_last_occurrence_wins() {
        // Signed over the second query_id only.
        let hash = sign(&[
            ("auth_date", "1700000000"),
            ("query_id", "SECOND"),
            ("user", "%7B%22id%22%3A42%7D"),
        ]);
        let raw = format!(
            "query_id=FIRST&auth_date=1700000000&query_id=SECOND&user=%7B%22id%22%3A42%7D&hash={}",
            hash
        );
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn fails_closed_on_undecodable_user() {
        let raw = payload(&[("auth_date", "1700000000"), ("user", "not-json")]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
        assert!(!result.valid);
        assert!(result.errors[0].contains("user"));
    }

    #[test]
    fn fails_closed_on_missing_user() {
        let raw = payload(&[("auth_date", "1700000000"), ("query_id", "AAE")]);
        let result = validate_init_data(&raw, BOT_TOKEN, at(1700000100), Duration::hours(24));
        assert!(!result.valid);
        assert!(result.errors[0].contains("user"));
    }

    #[test]
    fn identical_inputs_yield_identical_results() {
        let raw = payload(&[
            ("auth_date", "1700000000"),
            ("user", "%7B%22id%22%3A42%7D"),
        ]);
        let now = at(1700000100);
        let first = validate_init_data(&raw, BOT_TOKEN, now, Duration::hours(24));
        let second = validate_init_data(&raw, BOT_TOKEN, now, Duration::hours(24));
        assert_eq!(first.valid, second.valid);
        assert_eq!(first.user, second.user);
        assert_eq!(first.errors, second.errors);
    }
}
