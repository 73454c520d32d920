//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use serde::{Deserialize, Serialize};

thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(4096))
);

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// Wire decoding errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    InvalidEnumValue(u8),
    InvalidPrefix,
}

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an IPv4 addr from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError>;

    /// Gets an IPv6 addr from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError>;

    /// Gets an IP addr tagged by a leading address-family byte (4 or 6).
    ///
    /// The current position is advanced by 5 or 17.
    fn try_get_ip(&mut self) -> Result<IpAddr, TryGetError>;

    /// Gets a length-prefixed (u16) UTF-8 string.
    fn try_get_string(&mut self) -> Result<String, TryGetError>;

    /// Gets a length-prefixed (u32) byte blob.
    fn try_get_blob(&mut self) -> Result<Bytes, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an IPv4 addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn put_ipv4(&mut self, addr: &Ipv4Addr);

    /// Writes an IPv6 addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn put_ipv6(&mut self, addr: &Ipv6Addr);

    /// Writes an IP addr to `self` preceded by an address-family byte.
    ///
    /// The current position is advanced by 5 or 17.
    fn put_ip(&mut self, addr: &IpAddr);

    /// Writes a length-prefixed (u16) UTF-8 string.
    ///
    /// # Panics
    ///
    /// This function panics if the string is longer than 65535 bytes.
    fn put_string(&mut self, s: &str);

    /// Writes a length-prefixed (u32) byte blob.
    fn put_blob(&mut self, data: &[u8]);
}

// ===== impl DecodeError =====

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::InvalidEnumValue(value) => {
                write!(f, "invalid enum value: {}", value)
            }
            DecodeError::InvalidPrefix => {
                write!(f, "invalid prefix encoding")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError> {
        let bytes = self.try_get_u32()?;
        Ok(Ipv4Addr::from(bytes))
    }

    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError> {
        let bytes = self.try_get_u128()?;
        Ok(Ipv6Addr::from(bytes))
    }

    fn try_get_ip(&mut self) -> Result<IpAddr, TryGetError> {
        match self.try_get_u8()? {
            6 => Ok(IpAddr::V6(self.try_get_ipv6()?)),
            _ => Ok(IpAddr::V4(self.try_get_ipv4()?)),
        }
    }

    fn try_get_string(&mut self) -> Result<String, TryGetError> {
        let len = self.try_get_u16()? as usize;
        if self.remaining() < len {
            return Err(TryGetError {
                requested: len,
                available: self.remaining(),
            });
        }
        let bytes = self.split_to(len);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn try_get_blob(&mut self) -> Result<Bytes, TryGetError> {
        let len = self.try_get_u32()? as usize;
        if self.remaining() < len {
            return Err(TryGetError {
                requested: len,
                available: self.remaining(),
            });
        }
        Ok(self.split_to(len))
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_slice(&addr.octets());
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets());
    }

    fn put_ip(&mut self, addr: &IpAddr) {
        match addr {
            IpAddr::V4(addr) => {
                self.put_u8(4);
                self.put_ipv4(addr);
            }
            IpAddr::V6(addr) => {
                self.put_u8(6);
                self.put_ipv6(addr);
            }
        }
    }

    fn put_string(&mut self, s: &str) {
        let len = u16::try_from(s.len()).expect("string too long to encode");
        self.put_u16(len);
        self.put_slice(s.as_bytes());
    }

    fn put_blob(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.put_slice(data);
    }
}
