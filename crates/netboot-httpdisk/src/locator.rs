use std::fmt;

use url::Url;

use crate::{HttpDiskError, Result};

/// Resolved address of a remote disk image (e.g. `http://boot.example/disks/win.hdd`).
///
/// Only syntax is checked; nothing is sent to the server until the first transfer.
#[derive(Clone, PartialEq, Eq)]
pub struct Locator {
    url: Url,
}

impl Locator {
    pub fn parse(root_path: &str) -> Result<Self> {
        let invalid = |reason: &str| HttpDiskError::InvalidLocator {
            locator: root_path.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(root_path.trim()).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(&format!("unsupported scheme {other:?}"))),
        }
        if !url.has_host() || url.host_str().is_some_and(str::is_empty) {
            return Err(invalid("missing host"));
        }
        if url.cannot_be_a_base() {
            return Err(invalid("URL must be absolute"));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Copy of the URL that is safe to log: credentials, query and fragment are dropped.
    pub fn redacted(&self) -> Url {
        redact_url_for_logs(&self.url)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Signed URLs carry auth material in the query string.
        f.debug_tuple("Locator")
            .field(&self.redacted().as_str())
            .finish()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.redacted().as_str())
    }
}

pub(crate) fn redact_url_for_logs(url: &Url) -> Url {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    url
}
