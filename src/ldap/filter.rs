// src/ldap/filter.rs

use std::fmt;
use thiserror::Error;

/// Фильтр поиска LDAP (RFC 4515).
///
/// Значения хранятся без экранирования, `Display` выводит экранированную строку.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equality(String, String),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    ApproxMatch(String, String),
    /// `attr=init*any*final`, `parts` разбиты по `*`
    Substring(String, Vec<String>),
    /// Extensible match, например `member:1.2.840.113556.1.4.1941:=...`
    Extensible(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter syntax: {0}")]
    InvalidSyntax(String),
}

impl Filter {
    pub fn equality(attribute: &str, value: &str) -> Self {
        Filter::Equality(attribute.to_string(), value.to_string())
    }

    /// `(&self other)`, без вложенности, если `self` уже конъюнкция
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut items) => {
                items.push(other);
                Filter::And(items)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Разбирает фильтр из строки (например, `(&(objectClass=user)(!(objectClass=computer)))`)
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        let s = s.trim();
        if !s.starts_with('(') || !s.ends_with(')') || s.len() < 3 {
            return Err(FilterError::InvalidSyntax(s.to_string()));
        }

        Self::parse_inner(&s[1..s.len() - 1])
    }

    fn parse_inner(s: &str) -> Result<Self, FilterError> {
        match s.chars().next() {
            Some('&') => Ok(Filter::And(Self::parse_list(&s[1..])?)),
            Some('|') => Ok(Filter::Or(Self::parse_list(&s[1..])?)),
            Some('!') => Ok(Filter::Not(Box::new(Self::parse(&s[1..])?))),
            Some(_) => Self::parse_item(s),
            None => Err(FilterError::InvalidSyntax(String::new())),
        }
    }

    fn parse_item(s: &str) -> Result<Self, FilterError> {
        let eq_pos = s
            .find('=')
            .ok_or_else(|| FilterError::InvalidSyntax(s.to_string()))?;
        let (lhs, raw_value) = (&s[..eq_pos], &s[eq_pos + 1..]);
        if lhs.is_empty() {
            return Err(FilterError::InvalidSyntax(s.to_string()));
        }

        if let Some(attr) = lhs.strip_suffix('>') {
            return Ok(Filter::GreaterOrEqual(attr.to_string(), unescape(raw_value)?));
        }
        if let Some(attr) = lhs.strip_suffix('<') {
            return Ok(Filter::LessOrEqual(attr.to_string(), unescape(raw_value)?));
        }
        if let Some(attr) = lhs.strip_suffix('~') {
            return Ok(Filter::ApproxMatch(attr.to_string(), unescape(raw_value)?));
        }
        if let Some(rule) = lhs.strip_suffix(':') {
            return Ok(Filter::Extensible(rule.to_string(), unescape(raw_value)?));
        }

        if raw_value == "*" {
            return Ok(Filter::Present(lhs.to_string()));
        }
        if raw_value.contains('*') {
            let parts = raw_value
                .split('*')
                .map(unescape)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Filter::Substring(lhs.to_string(), parts));
        }

        Ok(Filter::Equality(lhs.to_string(), unescape(raw_value)?))
    }

    fn parse_list(s: &str) -> Result<Vec<Filter>, FilterError> {
        let mut filters = Vec::new();
        let mut depth = 0i32;
        let mut start = 0;

        for (i, ch) in s.char_indices() {
            match ch {
                '(' => {
                    if depth == 0 {
                        start = i;
                    }
                    depth += 1;
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        filters.push(Filter::parse(&s[start..=i])?);
                    } else if depth < 0 {
                        return Err(FilterError::InvalidSyntax(s.to_string()));
                    }
                }
                _ if depth == 0 => return Err(FilterError::InvalidSyntax(s.to_string())),
                _ => {}
            }
        }

        if depth != 0 || filters.is_empty() {
            return Err(FilterError::InvalidSyntax(s.to_string()));
        }

        Ok(filters)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equality(attr, value) => write!(f, "({}={})", attr, escape(value)),
            Filter::GreaterOrEqual(attr, value) => write!(f, "({}>={})", attr, escape(value)),
            Filter::LessOrEqual(attr, value) => write!(f, "({}<={})", attr, escape(value)),
            Filter::ApproxMatch(attr, value) => write!(f, "({}~={})", attr, escape(value)),
            Filter::Extensible(rule, value) => write!(f, "({}:={})", rule, escape(value)),
            Filter::Substring(attr, parts) => {
                let parts: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({}={})", attr, parts.join("*"))
            }
            Filter::Present(attr) => write!(f, "({}=*)", attr),
            Filter::And(items) => write_list(f, '&', items),
            Filter::Or(items) => write_list(f, '|', items),
            Filter::Not(inner) => write!(f, "(!{})", inner),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, op: char, items: &[Filter]) -> fmt::Result {
    write!(f, "({}", op)?;
    for item in items {
        write!(f, "{}", item)?;
    }
    write!(f, ")")
}

/// Экранирует значение для фильтра (RFC 4515, раздел 3)
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, FilterError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = value
                .get(i + 1..i + 3)
                .ok_or_else(|| FilterError::InvalidSyntax(value.to_string()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| FilterError::InvalidSyntax(value.to_string()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| FilterError::InvalidSyntax(value.to_string()))
}
