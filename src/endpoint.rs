use std::{fmt, str::FromStr};

use reqwest::Url;

use crate::{BitcasterError, Result};

/// Environment variable holding the application endpoint URL.
pub const ENDPOINT_ENV: &str = "BITCASTER_AEP";

/// Application endpoint parsed from a URL of the form
/// `https://<token>@<host>/api/o/<organization>/a/<application>/`.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub token: String,
    /// Host name, with the port when one is given.
    pub host: String,
    pub organization: String,
    pub application: u64,
}

impl Endpoint {
    pub fn parse(aep: &str) -> Result<Self> {
        // The url carries the token, keep it out of the message.
        let invalid = |reason: &str| {
            BitcasterError::Configuration(format!("unable to parse Bitcaster url: {reason}"))
        };

        let url = Url::parse(aep.trim()).map_err(|err| invalid(&err.to_string()))?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(invalid("scheme must be http or https"));
        }

        let token = url.username();
        if token.is_empty() {
            return Err(invalid("missing token"));
        }

        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let (organization, application) = match segments.as_slice() {
            ["api", "o", organization, "a", application] => (*organization, *application),
            _ => return Err(invalid("expected path /api/o/<organization>/a/<application>/")),
        };
        let application = application
            .parse::<u64>()
            .map_err(|_| invalid("application must be numeric"))?;

        Ok(Self {
            scheme: scheme.to_owned(),
            token: token.to_owned(),
            host,
            organization: organization.to_owned(),
            application,
        })
    }

    /// Reads and parses [`ENDPOINT_ENV`].
    pub fn from_env() -> Result<Self> {
        let aep = std::env::var(ENDPOINT_ENV).map_err(|_| {
            BitcasterError::Configuration(format!("missing {ENDPOINT_ENV} environment variable"))
        })?;
        if aep.trim().is_empty() {
            return Err(BitcasterError::Configuration(format!(
                "{ENDPOINT_ENV} is set but empty"
            )));
        }
        Self::parse(&aep)
    }

    /// Application base URL without credentials.
    ///
    /// Example: `https://bitcaster.example/api/o/acme/a/7/`
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}/api/o/{}/a/{}/",
            self.scheme, self.host, self.organization, self.application
        )
    }
}

impl FromStr for Endpoint {
    type Err = BitcasterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .field("host", &self.host)
            .field("organization", &self.organization)
            .field("application", &self.application)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;
    use crate::BitcasterError;

    #[test]
    fn parses_application_endpoint() {
        let endpoint =
            Endpoint::parse("https://abc123@bitcaster.example/api/o/acme/a/7/").expect("valid");

        assert_eq!(endpoint.scheme, "https");
        assert_eq!(endpoint.token, "abc123");
        assert_eq!(endpoint.host, "bitcaster.example");
        assert_eq!(endpoint.organization, "acme");
        assert_eq!(endpoint.application, 7);
        assert_eq!(
            endpoint.base_url(),
            "https://bitcaster.example/api/o/acme/a/7/"
        );
    }

    #[test]
    fn keeps_explicit_port() {
        let endpoint: Endpoint = "http://tok@127.0.0.1:8000/api/o/org/a/12/"
            .parse()
            .expect("valid");
        assert_eq!(endpoint.base_url(), "http://127.0.0.1:8000/api/o/org/a/12/");
    }

    #[test]
    fn rejects_malformed_urls() {
        for aep in [
            "not a url",
            "ftp://tok@host/api/o/org/a/1/",
            "https://host/api/o/org/a/1/",
            "https://tok@host/api/o/org/",
            "https://tok@host/api/o/org/a/app/",
        ] {
            let err = Endpoint::parse(aep).expect_err(aep);
            assert!(matches!(err, BitcasterError::Configuration(_)), "{aep}");
        }
    }

    #[test]
    fn debug_redacts_token() {
        let endpoint =
            Endpoint::parse("https://secret-token@host/api/o/org/a/1/").expect("valid");
        let debug = format!("{endpoint:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
