// src/ldap/client.rs

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LdapConfig;
use crate::ldap::control::{PAGED_RESULTS_OID, PagedResults};
use crate::ldap::entry::guid_from_bytes;
use crate::ldap::tls::load_client_config;
use crate::ldap::{
    DirectoryConnection, DirectoryEntry, DirectoryError, PageCursor, SearchPage, SearchRequest,
};

/// Код результата LDAP: базовый объект не найден
const NO_SUCH_OBJECT: u32 = 32;

/// `DirectoryConnection` поверх привязанной сессии `ldap3`
pub struct LdapDirectory {
    ldap: Ldap,
    base_dn: String,
    operation_timeout: Option<Duration>,
    guid_attribute: String,
}

impl LdapDirectory {
    /// Подключается, запускает драйвер соединения и делает bind
    pub async fn connect(
        config: &LdapConfig,
        guid_attribute: &str,
    ) -> Result<Self, DirectoryError> {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(config.connect_timeout_secs))
            .set_starttls(config.starttls);

        if config.url.starts_with("ldaps://") || config.starttls {
            let ca_pem = match &config.ca_cert_file {
                Some(path) => Some(std::fs::read(path).map_err(|e| {
                    DirectoryError::Connection(format!("failed to read CA file {path}: {e}"))
                })?),
                None => None,
            };
            settings = settings.set_config(load_client_config(ca_pem.as_deref())?);
        }

        debug!(url = %config.url, "connecting to directory");
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &config.url)
            .await
            .map_err(|e| {
                DirectoryError::Connection(format!("failed to connect to {}: {e}", config.url))
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        if !config.bind_dn.is_empty() {
            let password = config.bind_password.as_deref().unwrap_or("");
            let result = ldap
                .simple_bind(&config.bind_dn, password)
                .await
                .map_err(|e| DirectoryError::Connection(format!("bind failed: {e}")))?;
            if result.rc != 0 {
                return Err(DirectoryError::Connection(format!(
                    "bind as {} rejected (code {}): {}",
                    config.bind_dn, result.rc, result.text
                )));
            }
        }

        info!(url = %config.url, bind_dn = %config.bind_dn, "bound to directory");

        Ok(Self {
            ldap,
            base_dn: config.base_dn.clone(),
            operation_timeout: config.operation_timeout_secs.map(Duration::from_secs),
            guid_attribute: guid_attribute.to_ascii_lowercase(),
        })
    }

    pub async fn unbind(mut self) -> Result<(), DirectoryError> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| DirectoryError::Connection(format!("unbind failed: {e}")))
    }

    fn apply_timeout(&mut self) {
        if let Some(timeout) = self.operation_timeout {
            self.ldap.with_timeout(timeout);
        }
    }
}

/// GUID-атрибут переводится в `8-4-4-4-12`, куда бы его ни положил ldap3:
/// 16 байт, случайно валидные в UTF-8, попадают в `attrs`.
fn convert_entry(
    entry: SearchEntry,
    guid_attribute: &str,
) -> Result<DirectoryEntry, DirectoryError> {
    if entry.dn.is_empty() {
        return Err(DirectoryError::Protocol(
            "search returned an entry without a DN".to_string(),
        ));
    }

    let mut out = DirectoryEntry::new(entry.dn);
    for (name, values) in entry.attrs {
        if name.eq_ignore_ascii_case(guid_attribute) {
            // Текстовые идентификаторы (например, `uid`) идут как есть
            let rendered = values
                .into_iter()
                .map(|v| guid_from_bytes(v.as_bytes()).unwrap_or(v))
                .collect();
            out.insert(&name, rendered);
        } else {
            out.insert(&name, values);
        }
    }
    for (name, values) in entry.bin_attrs {
        if name.eq_ignore_ascii_case(guid_attribute) {
            let rendered = values.iter().filter_map(|v| guid_from_bytes(v)).collect();
            out.insert(&name, rendered);
        } else {
            out.insert_binary(&name, values);
        }
    }
    Ok(out)
}

#[async_trait]
impl DirectoryConnection for LdapDirectory {
    async fn search(
        &mut self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<SearchPage, DirectoryError> {
        if cursor.is_exhausted() {
            return Err(DirectoryError::Protocol(
                "search requested past the last page".to_string(),
            ));
        }

        let control = RawControl {
            ctype: PAGED_RESULTS_OID.to_string(),
            crit: true,
            val: Some(
                PagedResults {
                    size: request.page_size,
                    cookie: cursor.cookie().to_vec(),
                }
                .encode(),
            ),
        };
        let base_dn = request
            .base_dn
            .clone()
            .unwrap_or_else(|| self.base_dn.clone());

        self.apply_timeout();
        let SearchResult(raw_entries, result) = self
            .ldap
            .with_controls(control)
            .search(
                &base_dn,
                Scope::Subtree,
                &request.filter,
                request.attributes.to_request(),
            )
            .await
            .map_err(|e| DirectoryError::Connection(format!("search failed: {e}")))?;

        if result.rc != 0 {
            return Err(DirectoryError::Search {
                code: result.rc,
                message: result.text,
            });
        }

        let response = result
            .ctrls
            .iter()
            .find(|ctrl| ctrl.1.ctype == PAGED_RESULTS_OID)
            .ok_or_else(|| {
                DirectoryError::Protocol(
                    "server did not return a paged results control".to_string(),
                )
            })?;
        let value = response.1.val.as_deref().ok_or_else(|| {
            DirectoryError::Protocol("paged results control has no value".to_string())
        })?;
        let paged = PagedResults::decode(value)?;

        let entries = raw_entries
            .into_iter()
            .filter(|e| !e.is_ref() && !e.is_intermediate())
            .map(|e| convert_entry(SearchEntry::construct(e), &self.guid_attribute))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchPage {
            entries,
            next: PageCursor::from_cookie(paged.cookie),
        })
    }

    async fn read_entry(
        &mut self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.apply_timeout();
        let SearchResult(raw_entries, result) = self
            .ldap
            .search(dn, Scope::Base, "(objectClass=*)", attributes.to_vec())
            .await
            .map_err(|e| DirectoryError::Connection(format!("read of {dn} failed: {e}")))?;

        match result.rc {
            0 => {}
            NO_SUCH_OBJECT => return Ok(None),
            code => {
                return Err(DirectoryError::Search {
                    code,
                    message: result.text,
                });
            }
        }

        raw_entries
            .into_iter()
            .find(|e| !e.is_ref() && !e.is_intermediate())
            .map(|e| convert_entry(SearchEntry::construct(e), &self.guid_attribute))
            .transpose()
    }
}
