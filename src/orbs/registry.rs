//! Orb registry access over the CircleCI GraphQL API

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::json;

use crate::config::Settings;
use crate::document::{OrbKey, VersionInfo};
use crate::error::FetchError;

const ORB_VERSION_QUERY: &str = r#"query($orbVersionRef: String!) {
  orbVersion(orbVersionRef: $orbVersionRef) {
    id
    version
    orb {
      id
      versions(count: 100) {
        version
      }
    }
    source
  }
}"#;

/// Source of a published orb version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedOrb {
    pub source: String,
    pub version_info: Option<VersionInfo>,
}

/// Fetches orb sources; the resolver's only network boundary
#[tower_lsp::async_trait]
pub trait OrbSourceFetcher: Send + Sync {
    async fn fetch_orb_source(
        &self,
        key: &OrbKey,
        settings: &Settings,
    ) -> Result<FetchedOrb, FetchError>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<OrbVersionData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbVersionData {
    orb_version: Option<OrbVersion>,
}

#[derive(Debug, Deserialize)]
struct OrbVersion {
    #[serde(default)]
    id: String,
    version: String,
    source: String,
    orb: Option<PublishedOrb>,
}

#[derive(Debug, Deserialize)]
struct PublishedOrb {
    #[serde(default)]
    versions: Vec<PublishedVersion>,
}

#[derive(Debug, Deserialize)]
struct PublishedVersion {
    version: String,
}

/// [`OrbSourceFetcher`] backed by the registry at `settings.host_url`
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("circleci-yaml-lsp/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("Falling back to a default HTTP client: {}", err);
                reqwest::Client::new()
            });

        Self { http }
    }
}

#[tower_lsp::async_trait]
impl OrbSourceFetcher for RegistryClient {
    async fn fetch_orb_source(
        &self,
        key: &OrbKey,
        settings: &Settings,
    ) -> Result<FetchedOrb, FetchError> {
        let url = format!("{}/graphql-unstable", settings.host_url);
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FetchError::InvalidUrl(settings.host_url.clone()));
        }

        let body = json!({
            "query": ORB_VERSION_QUERY,
            "variables": { "orbVersionRef": key.to_string() },
        });

        let mut request = self
            .http
            .post(&url)
            .json(&body)
            .timeout(settings.fetch_timeout());
        if let Some(token) = &settings.token {
            request = request.header("Circle-Token", token);
        }

        tracing::debug!("Fetching orb {} from {}", key, url);

        let response = request.send().await.map_err(|source| FetchError::Http {
            url: url.clone(),
            source,
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let payload: GraphQlResponse = response
            .json()
            .await
            .map_err(|source| FetchError::Http { url, source })?;

        into_fetched_orb(key, payload)
    }
}

fn into_fetched_orb(key: &OrbKey, payload: GraphQlResponse) -> Result<FetchedOrb, FetchError> {
    if !payload.errors.is_empty() {
        let messages: Vec<_> = payload.errors.into_iter().map(|e| e.message).collect();
        return Err(FetchError::GraphQl(messages.join("; ")));
    }

    let orb_version = payload
        .data
        .and_then(|data| data.orb_version)
        .filter(|orb_version| !orb_version.id.is_empty())
        .ok_or_else(|| FetchError::NotFound(key.to_string()))?;

    let published: Vec<String> = orb_version
        .orb
        .map(|orb| orb.versions.into_iter().map(|v| v.version).collect())
        .unwrap_or_default();

    Ok(FetchedOrb {
        version_info: version_info(&orb_version.version, &published),
        source: orb_version.source,
    })
}

/// Latest overall, latest with the same major and latest with the same
/// major.minor among `published`, starting from `current`.
pub fn version_info(current: &str, published: &[String]) -> Option<VersionInfo> {
    let current = semver::Version::parse(current).ok()?;

    let mut latest = current.clone();
    let mut latest_minor = current.clone();
    let mut latest_patch = current.clone();

    for candidate in published.iter().filter_map(|v| semver::Version::parse(v).ok()) {
        if candidate > latest {
            latest = candidate.clone();
        }
        if candidate.major != current.major {
            continue;
        }
        if candidate > latest_minor {
            latest_minor = candidate.clone();
        }
        if candidate.minor != current.minor {
            continue;
        }
        if candidate > latest_patch {
            latest_patch = candidate;
        }
    }

    Some(VersionInfo {
        latest: Some(latest.to_string()),
        latest_minor: Some(latest_minor.to_string()),
        latest_patch: Some(latest_patch.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn key() -> OrbKey {
        OrbKey::parse("circleci/node@5.1.0").unwrap()
    }

    #[test]
    fn test_version_info() {
        let published: Vec<String> = ["4.9.0", "5.1.0", "5.1.3", "5.2.0", "6.0.1", "garbage"]
            .iter()
            .map(|v| v.to_string())
            .collect();

        let info = version_info("5.1.0", &published).unwrap();
        assert_eq!(info.latest.as_deref(), Some("6.0.1"));
        assert_eq!(info.latest_minor.as_deref(), Some("5.2.0"));
        assert_eq!(info.latest_patch.as_deref(), Some("5.1.3"));

        assert!(version_info("volatile", &published).is_none());
    }

    #[test]
    fn test_payload_with_source() {
        let payload: GraphQlResponse = serde_json::from_value(json!({
            "data": {
                "orbVersion": {
                    "id": "abc",
                    "version": "5.1.0",
                    "orb": { "id": "def", "versions": [{ "version": "5.1.1" }] },
                    "source": "version: 2.1\n"
                }
            }
        }))
        .unwrap();

        let fetched = into_fetched_orb(&key(), payload).unwrap();
        assert_eq!(fetched.source, "version: 2.1\n");
        assert_eq!(
            fetched.version_info.unwrap().latest_patch.as_deref(),
            Some("5.1.1")
        );
    }

    #[test]
    fn test_payload_without_orb_is_not_found() {
        let payload: GraphQlResponse =
            serde_json::from_value(json!({ "data": { "orbVersion": null } })).unwrap();
        assert_matches!(into_fetched_orb(&key(), payload), Err(FetchError::NotFound(_)));
    }

    #[test]
    fn test_payload_errors() {
        let payload: GraphQlResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "bad token" }]
        }))
        .unwrap();
        assert_matches!(
            into_fetched_orb(&key(), payload),
            Err(FetchError::GraphQl(message)) if message == "bad token"
        );
    }

    #[tokio::test]
    async fn test_invalid_host_is_rejected_before_sending() {
        let settings = Settings::default().with_host("ftp://nowhere".to_string());
        let result = RegistryClient::new().fetch_orb_source(&key(), &settings).await;
        assert_matches!(result, Err(FetchError::InvalidUrl(_)));
    }
}
