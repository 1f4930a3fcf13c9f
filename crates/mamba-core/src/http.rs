use crate::config::FetchSettings;
use crate::retry::Transience;
use reqwest::{Certificate, Client, StatusCode};
use std::error::Error as _;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// A failed HTTP exchange.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },
    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// A local `file://` resource could not be read.
    #[error("failed to read {path}: {source}")]
    Local {
        /// Local path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl HttpError {
    /// Wrap a client error for `url`.
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// The response status, when the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Transience for HttpError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => status_is_transient(*status),
            Self::Transport { source, .. } => transport_is_transient(source),
            Self::Local { .. } => false,
        }
    }
}

/// Server-side and throttling statuses are worth retrying.
pub fn status_is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn transport_is_transient(err: &reqwest::Error) -> bool {
    if is_tls_failure(err) {
        return false;
    }
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&dyn std::error::Error> = err.source();
    while let Some(e) = source {
        let msg = e.to_string().to_lowercase();
        if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") {
            return true;
        }
        source = e.source();
    }
    false
}

/// The HTTP client could not be configured.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The CA certificate file could not be read.
    #[error("failed to read CA certificate {}: {source}", .path.display())]
    ReadCaCert {
        /// The certificate file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The CA certificate file is not a PEM bundle.
    #[error("invalid CA certificate {}: {source}", .path.display())]
    InvalidCaCert {
        /// The certificate file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: reqwest::Error,
    },
    /// The TLS backend could not be initialised.
    #[error(transparent)]
    Build(#[from] reqwest::Error),
}

/// Build the shared HTTP client.
///
/// With `ssl_verify` off, certificates are not checked at all. Otherwise
/// the certificates in `cacert_path` are trusted in addition to the
/// bundled roots.
///
/// # Errors
///
/// Returns [`ClientError`] if the CA bundle cannot be loaded or the TLS
/// backend cannot be initialised.
pub fn build_client(settings: &FetchSettings) -> Result<Client, ClientError> {
    let mut builder = Client::builder()
        .user_agent(crate::USER_AGENT)
        .connect_timeout(settings.connect_timeout);

    if !settings.ssl_verify {
        tracing::warn!("SSL verification is disabled");
        return Ok(builder.danger_accept_invalid_certs(true).build()?);
    }
    if let Some(path) = &settings.cacert_path {
        let pem = std::fs::read(path).map_err(|source| ClientError::ReadCaCert {
            path: path.clone(),
            source,
        })?;
        let certs = Certificate::from_pem_bundle(&pem).map_err(|source| {
            ClientError::InvalidCaCert {
                path: path.clone(),
                source,
            }
        })?;
        tracing::debug!("trusting {} certificates from {}", certs.len(), path.display());
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    Ok(builder.build()?)
}

/// Local path of a `file://` URL, percent-decoded.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    if !url.starts_with("file:") {
        return None;
    }
    Url::parse(url).ok()?.to_file_path().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(status_is_transient(StatusCode::BAD_GATEWAY));
        assert!(status_is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(status_is_transient(StatusCode::REQUEST_TIMEOUT));
        assert!(!status_is_transient(StatusCode::NOT_FOUND));
        assert!(!status_is_transient(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_file_urls() {
        assert_eq!(
            file_url_path("file:///srv/chan/noarch/repodata.json"),
            Some(PathBuf::from("/srv/chan/noarch/repodata.json"))
        );
        assert_eq!(file_url_path("https://host/x"), None);
    }

    #[test]
    fn test_file_urls_are_percent_decoded() {
        assert_eq!(
            file_url_path("file:///srv/my%20channel/noarch/repodata.json"),
            Some(PathBuf::from("/srv/my channel/noarch/repodata.json"))
        );
    }

    #[test]
    fn test_unreadable_cacert_is_reported() {
        let settings = FetchSettings {
            cacert_path: Some(PathBuf::from("/nonexistent/cacert.pem")),
            ..FetchSettings::default()
        };
        let err = build_client(&settings).unwrap_err();
        assert!(matches!(err, ClientError::ReadCaCert { .. }));
    }

    #[test]
    fn test_verification_can_be_disabled() {
        let settings = FetchSettings {
            ssl_verify: false,
            cacert_path: Some(PathBuf::from("/nonexistent/cacert.pem")),
            ..FetchSettings::default()
        };
        assert!(build_client(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = build_client(&FetchSettings::default()).unwrap();
        // Nothing listens on the discard port.
        let err = client.get("http://127.0.0.1:9/").send().await.unwrap_err();
        assert!(HttpError::transport("http://127.0.0.1:9/", err).is_transient());
    }
}
