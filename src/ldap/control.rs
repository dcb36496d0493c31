// src/ldap/control.rs

use crate::ldap::asn1::{self, Asn1, Asn1Parser};
use crate::ldap::DirectoryError;

/// OID контрола постраничной выдачи (RFC 2696)
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Значение контрола постраничной выдачи:
/// `SEQUENCE { size INTEGER, cookie OCTET STRING }`.
///
/// В запросе `size` это желаемый размер страницы, в ответе необязательная
/// оценка сервера общего числа результатов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResults {
    pub size: u32,
    pub cookie: Vec<u8>,
}

impl PagedResults {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::new();
        asn1::write_sequence(&mut w, |w| {
            asn1::write_integer(w, i64::from(self.size));
            asn1::write_octet_string(w, &self.cookie);
        });
        w
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DirectoryError> {
        let mut parser = Asn1Parser::new(bytes.to_vec());
        let value = parser
            .parse()
            .map_err(|e| DirectoryError::Protocol(format!("paged results control: {e}")))?;

        match value {
            Some(Asn1::Sequence(items)) => match items.as_slice() {
                [Asn1::Integer(size), Asn1::OctetString(cookie)] => Ok(Self {
                    size: u32::try_from(*size).unwrap_or(0),
                    cookie: cookie.clone(),
                }),
                _ => Err(DirectoryError::Protocol(
                    "paged results control has unexpected shape".to_string(),
                )),
            },
            _ => Err(DirectoryError::Protocol(
                "paged results control is not a sequence".to_string(),
            )),
        }
    }
}
