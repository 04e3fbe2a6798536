//! Minimal classical STUN (RFC 5389/8489) Binding transaction codec.
//!
//! Only what the peer runtime's reflexive-address discovery needs: encoding
//! a Binding request and decoding a Binding response's MAPPED-ADDRESS or
//! XOR-MAPPED-ADDRESS attribute. No long-term credentials, no
//! MESSAGE-INTEGRITY, no FINGERPRINT, no TURN methods.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use rand::Rng;

pub const MAGIC_COOKIE: [u8; 4] = 0x2112_A442u32.to_be_bytes();
const HEADER_LEN: usize = 20;

const METHOD_BINDING_REQUEST: u16 = 0x0001;
const METHOD_BINDING_RESPONSE: u16 = 0x0101;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

#[derive(Debug)]
pub enum Error {
    TooShort,
    BadCookie,
    NotABindingResponse,
    NoMappedAddress,
    BadFamily,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// 96-bit STUN transaction id.
pub type TransactionId = [u8; 12];

pub fn new_transaction_id() -> TransactionId {
    let mut id = [0u8; 12];
    rand::rng().fill(&mut id);
    id
}

/// Encode a Binding request with no attributes.
pub fn encode_binding_request(transaction_id: &TransactionId) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_u16(METHOD_BINDING_REQUEST);
    buf.put_u16(0);
    buf.put(&MAGIC_COOKIE[..]);
    buf.put(&transaction_id[..]);
    buf
}

/// Decode a Binding response, returning the first mapped address found.
/// XOR-MAPPED-ADDRESS is preferred over MAPPED-ADDRESS when both are present.
pub fn decode_binding_response(
    buf: &[u8],
    transaction_id: &TransactionId,
) -> Result<SocketAddr, Error> {
    if buf.len() < HEADER_LEN {
        return Err(Error::TooShort);
    }

    let method = u16::from_be_bytes([buf[0], buf[1]]);
    let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if buf[4..8] != MAGIC_COOKIE[..] {
        return Err(Error::BadCookie);
    }
    if method != METHOD_BINDING_RESPONSE {
        return Err(Error::NotABindingResponse);
    }
    if buf.len() < HEADER_LEN + len {
        return Err(Error::TooShort);
    }

    let mut mapped = None;
    let mut xor_mapped = None;
    let mut offset = HEADER_LEN;
    let end = HEADER_LEN + len;

    while end - offset >= 4 {
        let kind = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let size = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        offset += 4;
        if end - offset < size {
            break;
        }

        let body = &buf[offset..offset + size];
        match kind {
            ATTR_MAPPED_ADDRESS => mapped = decode_address(body, None).ok(),
            ATTR_XOR_MAPPED_ADDRESS => xor_mapped = decode_address(body, Some(transaction_id)).ok(),
            _ => {}
        }

        offset += size + pad_size(size);
    }

    xor_mapped.or(mapped).ok_or(Error::NoMappedAddress)
}

fn decode_address(body: &[u8], xor_token: Option<&TransactionId>) -> Result<SocketAddr, Error> {
    if body.len() < 4 {
        return Err(Error::TooShort);
    }

    let family = body[1];
    let port = u16::from_be_bytes([body[2], body[3]]);
    let ip = match family {
        FAMILY_IPV4 => {
            if body.len() < 8 {
                return Err(Error::TooShort);
            }
            let octets: [u8; 4] = body[4..8].try_into().unwrap();
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            if body.len() < 20 {
                return Err(Error::TooShort);
            }
            let octets: [u8; 16] = body[4..20].try_into().unwrap();
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(Error::BadFamily),
    };

    let addr = SocketAddr::new(ip, port);
    Ok(match xor_token {
        Some(token) => xor(&addr, token),
        None => addr,
    })
}

fn xor(addr: &SocketAddr, token: &TransactionId) -> SocketAddr {
    let port = addr.port() ^ (u32::from_be_bytes(MAGIC_COOKIE) >> 16) as u16;
    let ip = match addr.ip() {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            for (i, b) in octets.iter_mut().enumerate() {
                *b ^= MAGIC_COOKIE[i];
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            for (i, b) in octets.iter_mut().enumerate().take(4) {
                *b ^= MAGIC_COOKIE[i];
            }
            for (i, b) in octets.iter_mut().enumerate().skip(4) {
                *b ^= token[i - 4];
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    SocketAddr::new(ip, port)
}

fn pad_size(size: usize) -> usize {
    (4 - (size % 4)) % 4
}

/// Encode a Binding success response carrying XOR-MAPPED-ADDRESS, used only
/// by tests standing in for a real STUN server.
#[doc(hidden)]
pub fn encode_binding_response(transaction_id: &TransactionId, mapped: SocketAddr) -> BytesMut {
    let xor_addr = xor(&mapped, transaction_id);

    let mut attr = BytesMut::new();
    attr.put_u8(0);
    attr.put_u8(if xor_addr.is_ipv4() {
        FAMILY_IPV4
    } else {
        FAMILY_IPV6
    });
    attr.put_u16(xor_addr.port());
    match xor_addr.ip() {
        IpAddr::V4(v4) => attr.put(&v4.octets()[..]),
        IpAddr::V6(v6) => attr.put(&v6.octets()[..]),
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 + attr.len());
    buf.put_u16(METHOD_BINDING_RESPONSE);
    buf.put_u16(attr.len() as u16);
    buf.put(&MAGIC_COOKIE[..]);
    buf.put(&transaction_id[..]);
    buf.put_u16(ATTR_XOR_MAPPED_ADDRESS);
    buf.put_u16(attr.len() as u16);
    buf.put(attr);
    buf
}
