use std::{fmt, time::Duration};

use reqwest::{header, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{BitcasterError, Result};

const USER_AGENT: &str = "Bitcaster-SDK";

/// Status, body and final URL of an HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub url: String,
}

impl Response {
    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|err| {
            BitcasterError::Decode(format!("invalid JSON from {}: {err}", self.url))
        })
    }
}

/// Maps a response onto the delivery outcome taxonomy.
///
/// Only 200 and 201 count as success. 5xx and 429 are transient, every
/// other failure is permanent.
pub fn check_response(response: Response) -> Result<Response> {
    let status = response.status;
    match status {
        200 | 201 => Ok(response),
        401 | 403 => Err(BitcasterError::Authentication {
            status,
            url: response.url,
        }),
        404 => Err(BitcasterError::StreamNotFound { url: response.url }),
        429 => Err(BitcasterError::RateLimited {
            body: response.body,
        }),
        400..=499 => Err(BitcasterError::Validation {
            status,
            body: response.body,
        }),
        500..=599 => Err(BitcasterError::Server {
            status,
            body: response.body,
        }),
        _ => Err(BitcasterError::UnexpectedStatus {
            status,
            url: response.url,
        }),
    }
}

/// Issues authenticated JSON requests relative to an application base URL.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: Url,
    authorization: String,
    timeout: Duration,
    debug: bool,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .field("authorization", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Transport {
    /// `base_url` must end with `/` so relative paths nest under it.
    pub fn new(base_url: &str, token: &str, timeout: Duration, debug: bool) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|err| {
            BitcasterError::Configuration(format!("invalid base url \"{base_url}\": {err}"))
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            authorization: format!("Key {}", token.trim()),
            timeout,
            debug,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Resolves `path` against the base URL. Paths starting with `/` are
    /// taken from the host root.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|err| {
            BitcasterError::Configuration(format!("invalid request path \"{path}\": {err}"))
        })
    }

    /// Sends one request. Any HTTP status is returned as a [`Response`];
    /// only network-level failures are errors here.
    pub async fn perform_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<Response> {
        let url = self.url(path)?;
        self.send(method, url, body).await
    }

    async fn send(&self, method: Method, url: Url, body: Option<&JsonValue>) -> Result<Response> {
        if self.debug {
            debug!(%method, url = %url, "sending request");
        }

        let mut request = self
            .http
            .request(method, url)
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .json(body);
        }

        let response = request.send().await.map_err(BitcasterError::Transport)?;
        let status: StatusCode = response.status();
        let url = response.url().to_string();
        let body = response.text().await.map_err(BitcasterError::Transport)?;

        if self.debug {
            debug!(status = status.as_u16(), url = %url, "received response");
        }

        Ok(Response {
            status: status.as_u16(),
            body,
            url,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.perform_request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &JsonValue) -> Result<Response> {
        self.perform_request(Method::POST, path, Some(body)).await
    }

    /// Delivers `payload` to `stream` and classifies the outcome.
    pub async fn trigger(&self, stream: &str, payload: &JsonValue) -> Result<Response> {
        let url = self.trigger_url(stream)?;
        let response = self.send(Method::POST, url, Some(payload)).await?;
        check_response(response)
    }

    /// `s/<stream>/trigger/` under the base URL, with the stream id encoded
    /// as a single path segment. Outer slashes are ignored.
    pub fn trigger_url(&self, stream: &str) -> Result<Url> {
        let stream = stream.trim_matches('/');
        if matches!(stream, "" | "." | "..") {
            return Err(BitcasterError::Configuration(format!(
                "invalid stream id \"{stream}\""
            )));
        }

        let mut url = self.url("s/")?;
        url.path_segments_mut()
            .map_err(|()| {
                BitcasterError::Configuration(format!(
                    "base url \"{}\" cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push(stream)
            .push("trigger")
            .push("");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{check_response, Response, Transport};
    use crate::BitcasterError;

    fn response(status: u16) -> Response {
        Response {
            status,
            body: "{\"error\":\"nope\"}".to_owned(),
            url: "http://localhost/api/o/acme/a/1/s/orders/trigger/".to_owned(),
        }
    }

    fn transport() -> Transport {
        Transport::new(
            "https://bitcaster.example/api/o/acme/a/7/",
            "secret-token",
            Duration::from_secs(1),
            false,
        )
        .expect("valid base url")
    }

    #[test]
    fn classifies_statuses() {
        assert!(check_response(response(200)).is_ok());
        assert!(check_response(response(201)).is_ok());
        assert!(matches!(
            check_response(response(403)),
            Err(BitcasterError::Authentication { status: 403, .. })
        ));
        assert!(matches!(
            check_response(response(404)),
            Err(BitcasterError::StreamNotFound { .. })
        ));
        assert!(matches!(
            check_response(response(422)),
            Err(BitcasterError::Validation { status: 422, .. })
        ));
        assert!(matches!(
            check_response(response(429)),
            Err(BitcasterError::RateLimited { .. })
        ));
        assert!(matches!(
            check_response(response(502)),
            Err(BitcasterError::Server { status: 502, .. })
        ));
        assert!(matches!(
            check_response(response(204)),
            Err(BitcasterError::UnexpectedStatus { status: 204, .. })
        ));
    }

    #[test]
    fn relative_paths_nest_under_base_and_absolute_paths_use_host_root() {
        let transport = transport();
        assert_eq!(
            transport.url("s/orders/trigger/").expect("url").as_str(),
            "https://bitcaster.example/api/o/acme/a/7/s/orders/trigger/"
        );
        assert_eq!(
            transport.url("/api/system/ping/").expect("url").as_str(),
            "https://bitcaster.example/api/system/ping/"
        );
    }

    #[test]
    fn trigger_url_nests_stream_under_base() {
        assert_eq!(
            transport().trigger_url("/orders/").expect("url").as_str(),
            "https://bitcaster.example/api/o/acme/a/7/s/orders/trigger/"
        );
    }

    #[test]
    fn trigger_url_encodes_stream_as_one_segment() {
        let transport = transport();
        assert_eq!(
            transport.trigger_url("a?b#c").expect("url").as_str(),
            "https://bitcaster.example/api/o/acme/a/7/s/a%3Fb%23c/trigger/"
        );
        assert_eq!(
            transport.trigger_url("team/orders").expect("url").as_str(),
            "https://bitcaster.example/api/o/acme/a/7/s/team%2Forders/trigger/"
        );
        assert_eq!(
            transport.trigger_url("50%").expect("url").as_str(),
            "https://bitcaster.example/api/o/acme/a/7/s/50%25/trigger/"
        );
    }

    #[test]
    fn trigger_url_rejects_empty_and_dot_segments() {
        let transport = transport();
        for stream in ["", "/", ".", ".."] {
            assert!(
                matches!(
                    transport.trigger_url(stream),
                    Err(BitcasterError::Configuration(_))
                ),
                "{stream:?} should be rejected"
            );
        }
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let debug = format!("{:?}", transport());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn response_json_reports_decode_errors() {
        let bad = Response {
            status: 200,
            body: "not json".to_owned(),
            url: "http://localhost/".to_owned(),
        };
        assert!(matches!(
            bad.json::<serde_json::Value>(),
            Err(BitcasterError::Decode(_))
        ));
    }
}
