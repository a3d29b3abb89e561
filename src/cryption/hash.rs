use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

type HmacMd5 = Hmac<Md5>;

/// `HMAC-MD5(uuid_bytes, int64_be(t_sec))` -- the time-keyed 16-byte user
/// hash placed at the head of a mask request.
pub fn time_hmac(uuid_bytes: &[u8; 16], t_sec: i64) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(uuid_bytes).expect("HMAC accepts any key length");
    mac.update(&t_sec.to_be_bytes());
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&result);
    out
}

/// `MD5(int64_be(t_sec))` -- the request-header IV. A single hash of the
/// 8-byte big-endian timestamp (see DESIGN.md for why this differs from an
/// earlier protocol revision that repeated the timestamp four times).
pub fn iv_from_timestamp(t_sec: i64) -> [u8; 16] {
    md5_bytes(&t_sec.to_be_bytes())
}

/// `MD5(data)`.
pub fn md5_bytes(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_hmac_is_deterministic() {
        let uuid = [1u8; 16];
        assert_eq!(time_hmac(&uuid, 1000), time_hmac(&uuid, 1000));
        assert_ne!(time_hmac(&uuid, 1000), time_hmac(&uuid, 1001));
    }

    #[test]
    fn iv_is_deterministic() {
        assert_eq!(iv_from_timestamp(42), iv_from_timestamp(42));
        assert_ne!(iv_from_timestamp(42), iv_from_timestamp(43));
    }
}
