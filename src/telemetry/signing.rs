use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Base64 HMAC-SHA256 of `url_encode(resource) + "\n" + expiry`, keyed with
/// the base64-decoded device key.
pub fn sign_sas(resource: &str, expiry: u64, key_b64: &str) -> Result<String, String> {
    let key = STANDARD
        .decode(key_b64.trim())
        .map_err(|e| format!("base64 decode error: {}", e))?;
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| format!("HMAC error: {}", e))?;
    let to_sign = format!("{}\n{}", url_encode(resource), expiry);
    mac.update(to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Value for the `Authorization` header of a device-to-cloud request.
pub fn sas_token(resource: &str, expiry: u64, key_b64: &str) -> Result<String, String> {
    let sig = sign_sas(resource, expiry, key_b64)?;
    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        url_encode(resource),
        url_encode(&sig),
        expiry
    ))
}
