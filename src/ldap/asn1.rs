// src/ldap/asn1.rs

use std::io::{Cursor, Read};
use thiserror::Error;

/// Минимальная модель BER, хватает для значений контролов LDAP
#[derive(Debug, Clone, PartialEq)]
pub enum Asn1 {
    Integer(i64),
    Enumerated(u32),
    OctetString(Vec<u8>),
    Sequence(Vec<Asn1>),
    Set(Vec<Asn1>),
    Boolean(bool),
    Null,
}

#[derive(Debug, Error)]
pub enum Asn1Error {
    #[error("invalid BER length")]
    InvalidLength,
    #[error("unexpected end of BER data")]
    UnexpectedEof,
    #[error("unsupported BER tag 0x{0:02x}")]
    UnsupportedType(u8),
}

impl From<std::io::Error> for Asn1Error {
    fn from(_: std::io::Error) -> Self {
        Asn1Error::UnexpectedEof
    }
}

pub struct Asn1Parser {
    cursor: Cursor<Vec<u8>>,
}

impl Asn1Parser {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }

    /// Разобрать следующее значение, `Ok(None)` в конце данных
    pub fn parse(&mut self) -> Result<Option<Asn1>, Asn1Error> {
        if self.remaining() == 0 {
            return Ok(None);
        }

        let tag = self.read_u8()?;
        let length = self.read_length()?;
        if length > self.remaining() {
            return Err(Asn1Error::UnexpectedEof);
        }
        let mut content = vec![0u8; length];
        self.cursor.read_exact(&mut content)?;

        let value = match tag {
            0x02 => Asn1::Integer(decode_integer(&content)?),
            0x0A => Asn1::Enumerated(decode_enumerated(&content)),
            0x04 => Asn1::OctetString(content),
            0x30 => Asn1::Sequence(parse_all(content)?),
            0x31 => Asn1::Set(parse_all(content)?),
            0x01 => match content.first() {
                Some(b) => Asn1::Boolean(*b != 0),
                None => return Err(Asn1Error::InvalidLength),
            },
            0x05 => Asn1::Null,
            _ => return Err(Asn1Error::UnsupportedType(tag)),
        };

        Ok(Some(value))
    }

    fn read_u8(&mut self) -> Result<u8, Asn1Error> {
        let mut buf = [0u8; 1];
        self.cursor.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_length(&mut self) -> Result<usize, Asn1Error> {
        let len_byte = self.read_u8()?;
        if len_byte & 0x80 == 0 {
            Ok(len_byte as usize)
        } else {
            let num_bytes = (len_byte & 0x7F) as usize;
            // Неопределённая длина в LDAP запрещена
            if num_bytes == 0 || num_bytes > std::mem::size_of::<usize>() {
                return Err(Asn1Error::InvalidLength);
            }
            let mut len = 0usize;
            for _ in 0..num_bytes {
                len = (len << 8) | (self.read_u8()? as usize);
            }
            Ok(len)
        }
    }
}

fn parse_all(content: Vec<u8>) -> Result<Vec<Asn1>, Asn1Error> {
    let mut parser = Asn1Parser::new(content);
    let mut items = Vec::new();
    while let Some(item) = parser.parse()? {
        items.push(item);
    }
    Ok(items)
}

fn decode_integer(bytes: &[u8]) -> Result<i64, Asn1Error> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(Asn1Error::InvalidLength);
    }
    let mut val: i64 = 0;
    for &b in bytes {
        val = (val << 8) | (b as i64);
    }
    // Если старший бит установлен, это отрицательное число
    if bytes[0] & 0x80 != 0 && bytes.len() < 8 {
        val -= 1i64 << (bytes.len() * 8);
    }
    Ok(val)
}

fn decode_enumerated(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | (b as u32))
}

// === Запись ===

pub fn write_integer(w: &mut Vec<u8>, n: i64) {
    // Минимальное big-endian представление в дополнительном коде
    let raw = n.to_be_bytes();
    let mut start = 0;
    while start < raw.len() - 1 {
        let redundant_zero = raw[start] == 0x00 && raw[start + 1] & 0x80 == 0;
        let redundant_ones = raw[start] == 0xFF && raw[start + 1] & 0x80 != 0;
        if !(redundant_zero || redundant_ones) {
            break;
        }
        start += 1;
    }
    write_type_and_length(w, 0x02, raw.len() - start);
    w.extend_from_slice(&raw[start..]);
}

pub fn write_octet_string(w: &mut Vec<u8>, data: &[u8]) {
    write_type_and_length(w, 0x04, data.len());
    w.extend_from_slice(data);
}

pub fn write_sequence<F>(w: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut body = Vec::new();
    f(&mut body);
    write_type_and_length(w, 0x30, body.len());
    w.extend(body);
}

fn write_type_and_length(w: &mut Vec<u8>, tag: u8, len: usize) {
    w.push(tag);
    if len < 0x80 {
        w.push(len as u8);
    } else {
        let mut n = len;
        let mut bytes = Vec::new();
        while n > 0 {
            bytes.push((n & 0xFF) as u8);
            n >>= 8;
        }
        w.push(0x80 | (bytes.len() as u8));
        w.extend(bytes.iter().rev());
    }
}
