//! HTTP lookup provider for the directory search API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ORIGIN, REFERER, RETRY_AFTER};
use tracing::debug;
use url::Url;

use enricher_shared::{
    ApiConfig, Credential, EnricherError, LookupProvider, RawResponse, Result, TransportError,
};

/// User-Agent string for lookup requests.
const USER_AGENT: &str = concat!("enricher/", env!("CARGO_PKG_VERSION"));

/// Issues one search request per lookup and hands back status and body unparsed.
pub struct HttpLookupProvider {
    client: Client,
    search_url: Url,
    page_size: u32,
    origin: String,
    referer: String,
}

impl HttpLookupProvider {
    /// Build a provider from the `[api]` config section.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let search_url = Url::parse(&format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            config.search_endpoint
        ))
        .map_err(|e| EnricherError::config(format!("invalid api.base_url/search_endpoint: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnricherError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            search_url,
            page_size: config.page_size,
            origin: config.origin.clone(),
            referer: config.referer.clone(),
        })
    }

    fn request_url(&self, query_key: &str) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("page", "0")
            .append_pair("result", &self.page_size.to_string())
            .append_pair("nom", query_key);
        url
    }
}

#[async_trait]
impl LookupProvider for HttpLookupProvider {
    async fn perform_lookup(
        &self,
        query_key: &str,
        credential: &Credential,
    ) -> std::result::Result<RawResponse, TransportError> {
        let url = self.request_url(query_key);
        debug!(%url, "lookup request");

        let response = self
            .client
            .get(url)
            .bearer_auth(&credential.token)
            .header(ACCEPT, "*/*")
            .header(ORIGIN, &self.origin)
            .header(REFERER, &self.referer)
            .send()
            .await
            .map_err(|e| TransportError(describe(&e)))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("body read failed: {}", describe(&e))))?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connect: {e}")
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> Credential {
        Credential {
            token: "tok-123".into(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    fn provider_for(server_uri: &str) -> HttpLookupProvider {
        let config = ApiConfig {
            base_url: server_uri.to_string(),
            search_endpoint: "/api/search".into(),
            timeout_secs: 5,
            ..ApiConfig::default()
        };
        HttpLookupProvider::new(&config).unwrap()
    }

    #[test]
    fn request_url_encodes_query() {
        let provider = provider_for("https://api.example.com/");
        let url = provider.request_url("Lise JEANNE DIT FOUQUE");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/search?page=0&result=30&nom=Lise+JEANNE+DIT+FOUQUE"
        );
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn sends_bearer_and_search_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search"))
            .and(query_param("nom", "Lise JEANNE DIT FOUQUE"))
            .and(query_param("page", "0"))
            .and(header("authorization", "Bearer tok-123"))
            .and(header("origin", "https://www.avocatparis.org"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"list":{"exact":[]}}"#))
            .expect(1)
            .mount(&server)
            .await;

        let raw = provider_for(&server.uri())
            .perform_lookup("Lise JEANNE DIT FOUQUE", &credential())
            .await
            .unwrap();
        assert_eq!(raw.status, 200);
        assert_eq!(raw.retry_after, None);
        assert!(raw.body.contains("exact"));
    }

    #[tokio::test]
    async fn passes_status_and_retry_hint_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let raw = provider_for(&server.uri())
            .perform_lookup("x", &credential())
            .await
            .unwrap();
        assert_eq!(raw.status, 429);
        assert_eq!(raw.retry_after, Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let err = provider_for(&uri)
            .perform_lookup("x", &credential())
            .await
            .unwrap_err();
        assert!(!err.0.is_empty());
    }
}
