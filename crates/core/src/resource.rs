//! Credentialed storage endpoints handed out by resource discovery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::IngestError;

/// A container, queue or table URI with its SAS query string split off.
///
/// `https://acct.blob.core.windows.net/container?sv=..&se=..&sig=..` becomes
/// account `acct`, object `container`, sas `sv=..&se=..&sig=..`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUri {
    base: String,
    account: String,
    object_name: String,
    sas: String,
}

impl ResourceUri {
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let url = Url::parse(raw)
            .map_err(|e| IngestError::Decode(format!("invalid resource URI: {e}")))?;

        let host = url
            .host_str()
            .ok_or_else(|| IngestError::Decode("resource URI has no host".into()))?;
        let account = host.split('.').next().unwrap_or(host).to_string();

        let object_name = url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::Decode(format!("resource URI has no object name: {host}"))
            })?;

        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            base: base.as_str().trim_end_matches('/').to_string(),
            account,
            object_name,
            sas: url.query().unwrap_or_default().to_string(),
        })
    }

    /// URI without credentials; safe to log.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn sas(&self) -> &str {
        &self.sas
    }

    /// Full URI including the SAS.
    pub fn authorized(&self) -> String {
        self.authorized_path("")
    }

    /// `{base}{suffix}?{sas}`; `suffix` is appended verbatim.
    pub fn authorized_path(&self, suffix: &str) -> String {
        if self.sas.is_empty() {
            format!("{}{}", self.base, suffix)
        } else {
            format!("{}{}?{}", self.base, suffix, self.sas)
        }
    }

    /// `{base}/{child}` without credentials.
    pub fn child(&self, child: &str) -> String {
        format!("{}/{}", self.base, child.trim_start_matches('/'))
    }

    /// `{base}/{child}?{sas}`.
    pub fn authorized_child(&self, child: &str) -> String {
        self.authorized_path(&format!("/{}", child.trim_start_matches('/')))
    }

    /// Signed expiry (`se=`) of the SAS, when present and parseable.
    pub fn signed_expiry(&self) -> Option<DateTime<Utc>> {
        url::form_urlencoded::parse(self.sas.as_bytes())
            .find(|(k, _)| k == "se")
            .and_then(|(_, v)| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl fmt::Debug for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceUri")
            .field("base", &self.base)
            .field("has_sas", &!self.sas.is_empty())
            .finish()
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}
