use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use collector::UpstreamError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const ONETOKEN_PATH_PREFIX: &str = "/api/v1";

/// 1Token: base64(HMAC-SHA256(base64 decode(secret), VERB + path + timestamp + body))。
/// path 不含 `/api/v1` 前綴，timestamp 為秒。
pub fn onetoken_signature(
    secret: &str,
    verb: &str,
    path: &str,
    timestamp: i64,
    body: &str,
) -> Result<String, UpstreamError> {
    let key = BASE64
        .decode(secret.trim())
        .map_err(|err| UpstreamError::Auth(format!("api secret is not valid base64: {err}")))?;
    let path = path.strip_prefix(ONETOKEN_PATH_PREFIX).unwrap_or(path);
    let message = format!("{}{}{}{}", verb.to_uppercase(), path, timestamp, body);

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|err| UpstreamError::Auth(format!("hmac key error: {err}")))?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Ceffu: hex(HMAC-SHA256(secret, timestamp_ms + METHOD + path + body))。
pub fn ceffu_signature(
    secret: &str,
    timestamp_ms: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, UpstreamError> {
    let message = format!("{}{}{}{}", timestamp_ms, method.to_uppercase(), path, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| UpstreamError::Auth(format!("hmac key error: {err}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    #[test]
    fn onetoken_signature_ignores_api_prefix() {
        let with_prefix = onetoken_signature(
            SECRET,
            "get",
            "/api/v1/fundv3/openapi/portfolio/list-portfolio",
            1_700_000_000,
            "",
        )
        .unwrap();
        let without_prefix = onetoken_signature(
            SECRET,
            "GET",
            "/fundv3/openapi/portfolio/list-portfolio",
            1_700_000_000,
            "",
        )
        .unwrap();
        assert_eq!(with_prefix, without_prefix);
        assert_eq!(BASE64.decode(&with_prefix).unwrap().len(), 32);
    }

    #[test]
    fn onetoken_signature_changes_with_timestamp() {
        let a = onetoken_signature(SECRET, "GET", "/x", 1, "").unwrap();
        let b = onetoken_signature(SECRET, "GET", "/x", 2, "").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn onetoken_rejects_non_base64_secret() {
        let err = onetoken_signature("not base64!!", "GET", "/x", 1, "").unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn ceffu_signature_is_lowercase_hex() {
        let signature =
            ceffu_signature("secret", 1_700_000_000_000, "get", "/open-api/v1/wallet/list", "")
                .unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        let upper = ceffu_signature("secret", 1_700_000_000_000, "GET", "/open-api/v1/wallet/list", "")
            .unwrap();
        assert_eq!(signature, upper);
    }
}
