use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Hex HMAC-SHA1 of `body` under `secret`, the scheme Webex uses for the
/// `X-Webex-Signature` header.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature over the exact raw bytes of the request body.
///
/// With no secret configured verification trivially passes: webhook
/// authentication is opt-in, and accounts that skip it accept unauthenticated
/// inbound traffic. Comparison is constant-time; a length mismatch is an
/// ordinary failure, never a pass.
pub fn verify(body: &[u8], signature: &str, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let expected = compute_signature(secret, body);
    let expected = expected.as_bytes();
    let provided = signature.trim().as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}
