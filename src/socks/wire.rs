use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};
use crate::network::address::Address;
use crate::network::destination::{Destination, Transport};

pub const VERSION: u8 = 0x05;

pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_USERPASS: u8 = 0x02;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;

/// SOCKS5's own address-type bytes -- distinct from the mask wire's, see
/// `crate::network::address`.
pub const ADDR_IPV4: u8 = 0x01;
pub const ADDR_DOMAIN: u8 = 0x03;
pub const ADDR_IPV6: u8 = 0x04;

pub const STATUS_SUCCEEDED: u8 = 0x00;
pub const STATUS_COMMAND_NOT_SUPPORTED: u8 = 0x07;

fn eof_to_truncated(e: std::io::Error) -> ProxyError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProxyError::Truncated("eof mid socks5 header".into())
    } else {
        ProxyError::Io(e)
    }
}

/// Reads the client's method-negotiation request (VER, NMETHODS, METHODS)
/// and returns the offered method bytes.
pub async fn read_methods<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await.map_err(eof_to_truncated)?;
    if head[0] != VERSION {
        return Err(ProxyError::MalformedRequest(format!("unsupported socks version {}", head[0])));
    }
    let n = head[1] as usize;
    let mut methods = vec![0u8; n];
    reader.read_exact(&mut methods).await.map_err(eof_to_truncated)?;
    Ok(methods)
}

pub async fn write_method_selection<W: AsyncWrite + Unpin>(writer: &mut W, method: u8) -> Result<()> {
    writer.write_all(&[VERSION, method]).await?;
    Ok(())
}

/// Reads a username/password sub-negotiation request (RFC 1929).
pub async fn read_userpass<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(String, String)> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await.map_err(eof_to_truncated)?;
    let ulen = head[1] as usize;
    let mut uname = vec![0u8; ulen];
    reader.read_exact(&mut uname).await.map_err(eof_to_truncated)?;

    let mut plen_buf = [0u8; 1];
    reader.read_exact(&mut plen_buf).await.map_err(eof_to_truncated)?;
    let mut pass = vec![0u8; plen_buf[0] as usize];
    reader.read_exact(&mut pass).await.map_err(eof_to_truncated)?;

    Ok((
        String::from_utf8_lossy(&uname).into_owned(),
        String::from_utf8_lossy(&pass).into_owned(),
    ))
}

pub async fn write_userpass_status<W: AsyncWrite + Unpin>(writer: &mut W, success: bool) -> Result<()> {
    writer.write_all(&[0x01, if success { 0x00 } else { 0x01 }]).await?;
    Ok(())
}

/// Reads a CONNECT/BIND/UDP-ASSOCIATE request. Returns the command byte and
/// the parsed destination; the caller rejects anything but CONNECT.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u8, Destination)> {
    let mut head = [0u8; 4];
    reader.read_exact(&mut head).await.map_err(eof_to_truncated)?;
    if head[0] != VERSION {
        return Err(ProxyError::MalformedRequest(format!("unsupported socks version {}", head[0])));
    }
    let command = head[1];
    let addr_type = head[3];

    let address = match addr_type {
        ADDR_IPV4 => {
            let mut b = [0u8; 4];
            reader.read_exact(&mut b).await.map_err(eof_to_truncated)?;
            Address::Ipv4(Ipv4Addr::from(b))
        }
        ADDR_IPV6 => {
            let mut b = [0u8; 16];
            reader.read_exact(&mut b).await.map_err(eof_to_truncated)?;
            Address::Ipv6(Ipv6Addr::from(b))
        }
        ADDR_DOMAIN => {
            let mut len_buf = [0u8; 1];
            reader.read_exact(&mut len_buf).await.map_err(eof_to_truncated)?;
            if len_buf[0] == 0 {
                return Err(ProxyError::MalformedRequest("domain length is zero".into()));
            }
            let mut domain = vec![0u8; len_buf[0] as usize];
            reader.read_exact(&mut domain).await.map_err(eof_to_truncated)?;
            let domain = String::from_utf8(domain)
                .map_err(|_| ProxyError::MalformedRequest("domain is not valid utf-8".into()))?;
            Address::Domain(domain)
        }
        other => {
            return Err(ProxyError::MalformedRequest(format!("unknown socks addr_type {other:#x}")))
        }
    };

    let mut port_buf = [0u8; 2];
    reader.read_exact(&mut port_buf).await.map_err(eof_to_truncated)?;
    let port = u16::from_be_bytes(port_buf);

    Ok((command, Destination::new(address, port, Transport::Tcp)))
}

/// Writes a reply. `bound` mirrors the request's own address/port back,
/// matching the reference server, which never binds a distinct relay
/// address of its own.
pub async fn write_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u8,
    bound: &Destination,
) -> Result<()> {
    let mut buf = vec![VERSION, status, 0x00];
    match &bound.address {
        Address::Ipv4(ip) => {
            buf.push(ADDR_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        Address::Ipv6(ip) => {
            buf.push(ADDR_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
        Address::Domain(domain) => {
            buf.push(ADDR_DOMAIN);
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
        }
    }
    buf.extend_from_slice(&bound.port.to_be_bytes());
    writer.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[tokio::test]
    async fn request_ipv4_round_trip() {
        let mut buf = vec![VERSION, CMD_CONNECT, 0x00, ADDR_IPV4];
        buf.extend_from_slice(&[93, 184, 216, 34]);
        buf.extend_from_slice(&80u16.to_be_bytes());

        let mut cursor = Cursor::new(buf);
        let (command, dest) = read_request(&mut cursor).await.unwrap();
        assert_eq!(command, CMD_CONNECT);
        assert_eq!(dest.address, Address::Ipv4(Ipv4Addr::new(93, 184, 216, 34)));
        assert_eq!(dest.port, 80);
    }

    #[tokio::test]
    async fn request_domain_round_trip() {
        let mut buf = vec![VERSION, CMD_CONNECT, 0x00, ADDR_DOMAIN];
        buf.push(b"example.com".len() as u8);
        buf.extend_from_slice(b"example.com");
        buf.extend_from_slice(&443u16.to_be_bytes());

        let mut cursor = Cursor::new(buf);
        let (_command, dest) = read_request(&mut cursor).await.unwrap();
        assert_eq!(dest.address, Address::Domain("example.com".to_string()));
        assert_eq!(dest.port, 443);
    }

    #[tokio::test]
    async fn unknown_addr_type_is_malformed() {
        let buf = vec![VERSION, CMD_CONNECT, 0x00, 0x7f, 0, 0];
        let mut cursor = Cursor::new(buf);
        let err = read_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn zero_length_domain_is_malformed() {
        let buf = vec![VERSION, CMD_CONNECT, 0x00, ADDR_DOMAIN, 0x00];
        let mut cursor = Cursor::new(buf);
        let err = read_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn reply_echoes_bound_destination() {
        let dest = Destination::new(Address::Ipv4(Ipv4Addr::new(1, 2, 3, 4)), 8080, Transport::Tcp);
        let mut out = Vec::new();
        write_reply(&mut out, STATUS_SUCCEEDED, &dest).await.unwrap();
        assert_eq!(&out[..4], &[VERSION, STATUS_SUCCEEDED, 0x00, ADDR_IPV4]);
        assert_eq!(&out[4..8], &[1, 2, 3, 4]);
        assert_eq!(&out[8..10], &8080u16.to_be_bytes());
    }
}
