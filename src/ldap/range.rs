// src/ldap/range.rs

use crate::ldap::{DirectoryConnection, DirectoryEntry, DirectoryError};
use std::fmt;
use tracing::{debug, warn};

const RANGE_MARKER: &str = ";range=";

/// Разобранный ключ `name;range=low-high`. `high == None` означает форму `*`,
/// которой сервер помечает последний кусок.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFragment {
    pub base: String,
    pub low: u32,
    pub high: Option<u32>,
}

impl RangeFragment {
    pub fn parse(key: &str) -> Option<Self> {
        let lower = key.to_ascii_lowercase();
        let pos = lower.find(RANGE_MARKER)?;
        let base = lower[..pos].to_string();
        let (low, high) = lower[pos + RANGE_MARKER.len()..].split_once('-')?;

        let low = low.parse().ok()?;
        let high = match high {
            "*" => None,
            n => Some(n.parse().ok()?),
        };

        Some(Self { base, low, high })
    }

    pub fn is_terminal(&self) -> bool {
        self.high.is_none()
    }
}

impl fmt::Display for RangeFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.high {
            Some(high) => write!(f, "{}{}{}-{}", self.base, RANGE_MARKER, self.low, high),
            None => write!(f, "{}{}{}-*", self.base, RANGE_MARKER, self.low),
        }
    }
}

/// Заменяет каждый ranged-атрибут `entry` собранным базовым атрибутом,
/// дочитывая остальные куски из каталога.
pub async fn resolve_ranged_attributes<C>(
    connection: &mut C,
    mut entry: DirectoryEntry,
) -> Result<DirectoryEntry, DirectoryError>
where
    C: DirectoryConnection + ?Sized,
{
    if !entry
        .attribute_names()
        .any(|name| name.contains(RANGE_MARKER))
    {
        return Ok(entry);
    }

    let raw = std::mem::take(&mut entry.attributes);
    for (key, values) in raw {
        match RangeFragment::parse(&key) {
            Some(fragment) => {
                let rest = fetch_remaining(connection, entry.dn(), &fragment).await?;
                let mut all = values;
                all.extend(rest);
                entry.extend(&fragment.base, all);
            }
            None => match key.find(RANGE_MARKER) {
                // Границы не разбираются (больше u32): оставляем то, что пришло
                Some(pos) => {
                    warn!(
                        dn = entry.dn(),
                        range = %key,
                        "unparseable attribute range, not following"
                    );
                    let base = key[..pos].to_string();
                    entry.extend(&base, values);
                }
                None => entry.extend(&key, values),
            },
        }
    }

    Ok(entry)
}

async fn fetch_remaining<C>(
    connection: &mut C,
    dn: &str,
    first: &RangeFragment,
) -> Result<Vec<String>, DirectoryError>
where
    C: DirectoryConnection + ?Sized,
{
    let mut values = Vec::new();

    let high = match first.high {
        Some(high) if high >= first.low => high,
        _ => return Ok(values),
    };
    // Размер куска выбирает сервер, дальше просим столько же
    let Some(chunk) = high.checked_sub(first.low).and_then(|d| d.checked_add(1)) else {
        warn!(dn, attribute = %first.base, "range covers the whole offset space, not following");
        return Ok(values);
    };
    let Some(mut next) = high.checked_add(1) else {
        return Ok(values);
    };

    loop {
        let Some(limit) = next.checked_add(chunk - 1) else {
            warn!(dn, attribute = %first.base, "range offset overflow, keeping partial values");
            break;
        };
        let requested = RangeFragment {
            base: first.base.clone(),
            low: next,
            high: Some(limit),
        };

        let Some(reply) = connection.read_entry(dn, &[requested.to_string()]).await? else {
            warn!(dn, attribute = %first.base, "entry vanished during ranged read");
            break;
        };

        let Some((key, chunk_values)) = reply
            .attributes
            .into_iter()
            .find(|(key, _)| key.contains(first.base.as_str()))
        else {
            debug!(dn, attribute = %first.base, "no further range returned");
            break;
        };

        debug!(dn, range = %key, count = chunk_values.len(), "fetched attribute range");
        values.extend(chunk_values);

        // Продолжение есть, только если сервер вернул ровно запрошенные границы
        match RangeFragment::parse(&key) {
            Some(returned) if returned == requested => match limit.checked_add(1) {
                Some(following) => next = following,
                None => break,
            },
            _ => break,
        }
    }

    Ok(values)
}
