//! Error types shared across the server

use thiserror::Error;

/// Failure to produce a syntax tree at all. Malformed YAML is not an error:
/// tree-sitter recovers and the problems become diagnostics.
#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("failed to load the YAML grammar: {0}")]
    Language(String),

    #[error("the YAML parser did not produce a tree")]
    NoTree,
}

/// Errors raised while talking to the orb registry
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry answered with status {0}")]
    Status(u16),

    #[error("registry returned errors: {0}")]
    GraphQl(String),

    #[error("orb `{0}` does not exist in the registry")]
    NotFound(String),

    #[error("invalid registry url `{0}`")]
    InvalidUrl(String),
}

/// Why an orb reference could not be turned into an [`OrbInfo`](crate::orbs::OrbInfo).
///
/// Cloned out of the resolver to every caller waiting on the same key, so the
/// variants carry rendered messages rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrbResolutionError {
    #[error("Orb `{0}` has no version; pin it as `namespace/name@version`")]
    MissingVersion(String),

    #[error("Invalid orb reference `{0}`")]
    InvalidReference(String),

    #[error("Could not fetch orb `{key}`: {message}")]
    Fetch { key: String, message: String },

    #[error("Orb `{0}` not found")]
    NotFound(String),

    #[error("Timed out fetching orb `{0}`")]
    Timeout(String),

    #[error("Orb `{key}` has an unreadable source: {message}")]
    Malformed { key: String, message: String },
}

impl OrbResolutionError {
    pub fn from_fetch(key: &str, err: FetchError) -> Self {
        match err {
            FetchError::NotFound(_) => OrbResolutionError::NotFound(key.to_string()),
            other => OrbResolutionError::Fetch {
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_fetch_maps_to_not_found() {
        let err = OrbResolutionError::from_fetch(
            "circleci/node@5.0.0",
            FetchError::NotFound("circleci/node@5.0.0".to_string()),
        );
        assert_eq!(
            err,
            OrbResolutionError::NotFound("circleci/node@5.0.0".to_string())
        );
    }

    #[test]
    fn test_status_maps_to_fetch() {
        let err = OrbResolutionError::from_fetch("circleci/node@5.0.0", FetchError::Status(502));
        assert_eq!(
            err.to_string(),
            "Could not fetch orb `circleci/node@5.0.0`: registry answered with status 502"
        );
    }
}
