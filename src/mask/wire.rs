use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::account::id::UserId;
use crate::account::set::TimedUserSet;
use crate::account::user::User;
use crate::cryption::hash::{iv_from_timestamp, md5_bytes, time_hmac};
use crate::cryption::{CfbDecryptor, CfbEncryptor};
use crate::error::{ProxyError, Result};
use crate::network::address::{Address, MASK_ADDR_DOMAIN, MASK_ADDR_IPV4, MASK_ADDR_IPV6};
use crate::network::destination::{Destination, Transport};

const MIN_PADDING: u8 = 1;
const MAX_PADDING: u8 = 32;

fn now_sec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// The fields carried by a mask request header, held by both sides for the
/// lifetime of the connection: the caller remembers them to authenticate
/// the response, the listener remembers them to dial/forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRequest {
    pub request_key: [u8; 16],
    pub request_iv: [u8; 16],
    pub response_header: [u8; 4],
    pub dest: Destination,
}

/// Derives `(MD5(request_key), MD5(request_iv))`, the key/IV pair keying
/// the response stream. Must match bit-for-bit on both sides.
pub fn response_key_iv(request_key: &[u8; 16], request_iv: &[u8; 16]) -> ([u8; 16], [u8; 16]) {
    (md5_bytes(request_key), md5_bytes(request_iv))
}

fn random_padding(rng: &mut impl Rng) -> Vec<u8> {
    let len = rng.gen_range(MIN_PADDING..=MAX_PADDING);
    let mut buf = vec![0u8; len as usize];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn encode_address(address: &Address, out: &mut Vec<u8>) {
    match address {
        Address::Ipv4(ip) => {
            out.push(MASK_ADDR_IPV4);
            out.extend_from_slice(&ip.octets());
        }
        Address::Domain(domain) => {
            out.push(MASK_ADDR_DOMAIN);
            out.push(domain.len() as u8);
            out.extend_from_slice(domain.as_bytes());
        }
        Address::Ipv6(ip) => {
            out.push(MASK_ADDR_IPV6);
            out.extend_from_slice(&ip.octets());
        }
    }
}

/// Build the wire bytes for a mask request: `user_hash || AES-CFB(body)`.
/// Returns the wire bytes, the `MaskRequest` the caller must remember, and
/// a `CfbEncryptor` already keyed for the forward application payload
/// (`request_key`, `request_iv`) so the caller can keep encrypting into the
/// same stream without constructing a fresh cipher.
pub fn encode_request(user: &UserId, dest: &Destination) -> (Vec<u8>, MaskRequest, CfbEncryptor) {
    let mut rng = rand::thread_rng();
    let t_rand = now_sec() + rng.gen_range(-30i64..=30i64);

    let p1 = random_padding(&mut rng);
    let mut request_key = [0u8; 16];
    OsRng.fill_bytes(&mut request_key);
    let mut request_iv = [0u8; 16];
    OsRng.fill_bytes(&mut request_iv);
    let mut response_header = [0u8; 4];
    OsRng.fill_bytes(&mut response_header);
    let p2 = random_padding(&mut rng);

    let mut body = Vec::with_capacity(64);
    body.push(p1.len() as u8);
    body.extend_from_slice(&p1);
    body.extend_from_slice(&request_key);
    body.extend_from_slice(&request_iv);
    body.extend_from_slice(&response_header);
    body.extend_from_slice(&dest.port.to_be_bytes());
    encode_address(&dest.address, &mut body);
    body.push(p2.len() as u8);
    body.extend_from_slice(&p2);

    let header_iv = iv_from_timestamp(t_rand);
    let mut header_enc = CfbEncryptor::new(user.command_key(), &header_iv);
    header_enc.encrypt_in_place(&mut body);

    let hash = time_hmac(user.uuid_bytes(), t_rand);

    let mut wire = Vec::with_capacity(16 + body.len());
    wire.extend_from_slice(&hash);
    wire.extend_from_slice(&body);

    let payload_enc = CfbEncryptor::new(&request_key, &request_iv);
    let request = MaskRequest { request_key, request_iv, response_header, dest: dest.clone() };
    (wire, request, payload_enc)
}

async fn read_decrypt<R: AsyncRead + Unpin>(
    reader: &mut R,
    dec: &mut CfbDecryptor,
    buf: &mut [u8],
) -> Result<()> {
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProxyError::Truncated("eof mid mask header".into())
        } else {
            ProxyError::Io(e)
        }
    })?;
    dec.decrypt_in_place(buf);
    Ok(())
}

async fn decode_address<R: AsyncRead + Unpin>(
    reader: &mut R,
    dec: &mut CfbDecryptor,
) -> Result<Address> {
    let mut tag = [0u8; 1];
    read_decrypt(reader, dec, &mut tag).await?;
    match tag[0] {
        MASK_ADDR_IPV4 => {
            let mut bytes = [0u8; 4];
            read_decrypt(reader, dec, &mut bytes).await?;
            Ok(Address::Ipv4(Ipv4Addr::from(bytes)))
        }
        MASK_ADDR_DOMAIN => {
            let mut len_buf = [0u8; 1];
            read_decrypt(reader, dec, &mut len_buf).await?;
            if len_buf[0] == 0 {
                return Err(ProxyError::MalformedRequest("domain length is zero".into()));
            }
            let mut domain = vec![0u8; len_buf[0] as usize];
            read_decrypt(reader, dec, &mut domain).await?;
            let domain = String::from_utf8(domain)
                .map_err(|_| ProxyError::MalformedRequest("domain is not valid utf-8".into()))?;
            Ok(Address::Domain(domain))
        }
        MASK_ADDR_IPV6 => {
            let mut bytes = [0u8; 16];
            read_decrypt(reader, dec, &mut bytes).await?;
            Ok(Address::Ipv6(Ipv6Addr::from(bytes)))
        }
        other => Err(ProxyError::MalformedRequest(format!("unknown mask addr_type {other:#x}"))),
    }
}

fn check_padding_len(len: u8) -> Result<()> {
    if (MIN_PADDING..=MAX_PADDING).contains(&len) {
        Ok(())
    } else {
        Err(ProxyError::MalformedRequest(format!(
            "padding length {len} outside [{MIN_PADDING},{MAX_PADDING}]"
        )))
    }
}

fn hash_prefix(hash: &[u8; 16]) -> String {
    format!("{:02x}{:02x}{:02x}{:02x}…", hash[0], hash[1], hash[2], hash[3])
}

/// Parse a mask request header off `reader`, resolving the presenting user
/// against `user_set`. On success, returns the resolved user, the parsed
/// request, and the header's own `CfbDecryptor` (keyed on the user's
/// command key), left exactly where header parsing finished. That
/// decryptor is spent: the forward application payload is a distinct CFB
/// stream keyed by the request's own `(request_key, request_iv)`, built
/// fresh by the listener (see `mask::listener`), never a continuation of
/// this one.
pub async fn decode_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    user_set: &TimedUserSet,
) -> Result<(Arc<User>, MaskRequest, CfbDecryptor)> {
    let mut hash = [0u8; 16];
    reader.read_exact(&mut hash).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProxyError::Truncated("eof reading user hash".into())
        } else {
            ProxyError::Io(e)
        }
    })?;

    let (user, t) = user_set
        .get_user(&hash)
        .ok_or_else(|| ProxyError::InvalidUser { hash_prefix: hash_prefix(&hash) })?;

    let header_iv = iv_from_timestamp(t);
    let mut dec = CfbDecryptor::new(user.id().command_key(), &header_iv);

    let mut p1_len = [0u8; 1];
    read_decrypt(reader, &mut dec, &mut p1_len).await?;
    check_padding_len(p1_len[0])?;
    let mut p1 = vec![0u8; p1_len[0] as usize];
    read_decrypt(reader, &mut dec, &mut p1).await?;

    let mut request_key = [0u8; 16];
    read_decrypt(reader, &mut dec, &mut request_key).await?;
    let mut request_iv = [0u8; 16];
    read_decrypt(reader, &mut dec, &mut request_iv).await?;
    let mut response_header = [0u8; 4];
    read_decrypt(reader, &mut dec, &mut response_header).await?;
    let mut port_buf = [0u8; 2];
    read_decrypt(reader, &mut dec, &mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    let address = decode_address(reader, &mut dec).await?;

    let mut p2_len = [0u8; 1];
    read_decrypt(reader, &mut dec, &mut p2_len).await?;
    check_padding_len(p2_len[0])?;
    let mut p2 = vec![0u8; p2_len[0] as usize];
    read_decrypt(reader, &mut dec, &mut p2).await?;

    let dest = Destination::new(address, port, Transport::Tcp);
    let request = MaskRequest { request_key, request_iv, response_header, dest };
    Ok((user, request, dec))
}

/// Decode and authenticate the response header off `reader`. Returns a
/// `CfbDecryptor` left in place to continue decrypting backward payload.
pub async fn decode_response_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected: &[u8; 4],
    request_key: &[u8; 16],
    request_iv: &[u8; 16],
) -> Result<CfbDecryptor> {
    let (key, iv) = response_key_iv(request_key, request_iv);
    let mut dec = CfbDecryptor::new(&key, &iv);
    let mut got = [0u8; 4];
    read_decrypt(reader, &mut dec, &mut got).await?;
    if &got != expected {
        return Err(ProxyError::UnexpectedResponseHeader {
            expected: hex4(expected),
            got: hex4(&got),
        });
    }
    Ok(dec)
}

fn hex4(bytes: &[u8; 4]) -> String {
    format!("{:02x}{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2], bytes[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn user_set_with(user: User) -> Arc<TimedUserSet> {
        let set = TimedUserSet::new(vec![user]);
        set.tick(now_sec());
        set
    }

    #[tokio::test]
    async fn round_trip_ipv4() {
        let id = UserId::parse("2418d087-648d-4990-86e8-19dca1d006d3").unwrap();
        let set = user_set_with(User::new(id.clone()));

        let dest = Destination::new(Address::Ipv4(Ipv4Addr::new(93, 184, 216, 34)), 80, Transport::Tcp);
        let (wire, sent, _payload_enc) = encode_request(&id, &dest);

        let mut cursor = Cursor::new(wire);
        let (_user, received, _dec) = decode_request(&mut cursor, &set).await.unwrap();

        assert_eq!(received.dest, sent.dest);
        assert_eq!(received.request_key, sent.request_key);
        assert_eq!(received.request_iv, sent.request_iv);
        assert_eq!(received.response_header, sent.response_header);
    }

    #[tokio::test]
    async fn round_trip_domain() {
        let id = UserId::parse("11111111-1111-1111-1111-111111111111").unwrap();
        let set = user_set_with(User::new(id.clone()));

        let dest = Destination::new(Address::Domain("example.com".to_string()), 443, Transport::Tcp);
        let (wire, sent, _) = encode_request(&id, &dest);

        let mut cursor = Cursor::new(wire);
        let (_user, received, _dec) = decode_request(&mut cursor, &set).await.unwrap();
        assert_eq!(received.dest, sent.dest);
    }

    #[tokio::test]
    async fn unknown_hash_is_invalid_user() {
        let id = UserId::parse("22222222-2222-2222-2222-222222222222").unwrap();
        let set = user_set_with(User::new(id));

        let garbage = vec![0xffu8; 16];
        let mut cursor = Cursor::new(garbage);
        let err = decode_request(&mut cursor, &set).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidUser { .. }));
    }

    #[test]
    fn response_authentication() {
        let request_key = [3u8; 16];
        let request_iv = [4u8; 16];
        let (key, iv) = response_key_iv(&request_key, &request_iv);
        let response_header = [9u8, 8, 7, 6];

        let mut enc = CfbEncryptor::new(&key, &iv);
        let mut payload = response_header.to_vec();
        payload.extend_from_slice(b"payload bytes");
        enc.encrypt_in_place(&mut payload);

        let mut dec = CfbDecryptor::new(&key, &iv);
        dec.decrypt_in_place(&mut payload);
        assert_eq!(&payload[..4], &response_header);
    }
}
