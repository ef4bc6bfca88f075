//! Latest built document per URI

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tower_lsp::lsp_types::Url;

use crate::builder::build;
use crate::document::Document;
use crate::orbs::OrbLookup;

struct CachedDocument {
    version: i32,
    document: Arc<Document>,
}

/// Version-gated document cache
///
/// Building happens outside the map lock. The swap re-checks the version,
/// so an older build never replaces a newer one and readers only see
/// complete documents.
pub struct DocumentCache {
    entries: DashMap<Url, CachedDocument>,
    orbs: Arc<dyn OrbLookup>,
}

impl DocumentCache {
    pub fn new(orbs: Arc<dyn OrbLookup>) -> Self {
        Self {
            entries: DashMap::new(),
            orbs,
        }
    }

    /// The document for `version` of `uri`, building it if needed. A request
    /// older than the cached version returns the cached document.
    pub fn get_or_parse(&self, uri: &Url, text: &str, version: i32) -> Arc<Document> {
        if let Some(cached) = self.entries.get(uri) {
            if cached.version >= version {
                if cached.version > version {
                    tracing::debug!(
                        "Ignoring stale version {} of {} (cached {})",
                        version,
                        uri,
                        cached.version
                    );
                }
                return Arc::clone(&cached.document);
            }
        }

        let document = Arc::new(build(text, self.orbs.as_ref()));
        self.store(uri, version, document)
    }

    /// Rebuild the cached version of `uri`, e.g. once its orbs resolved
    pub fn refresh(&self, uri: &Url) -> Option<Arc<Document>> {
        let (version, content) = {
            let cached = self.entries.get(uri)?;
            (cached.version, cached.document.content.clone())
        };

        let document = Arc::new(build(&content, self.orbs.as_ref()));
        match self.entries.entry(uri.clone()) {
            Entry::Occupied(mut occupied) if occupied.get().version == version => {
                occupied.insert(CachedDocument {
                    version,
                    document: Arc::clone(&document),
                });
                Some(document)
            }
            Entry::Occupied(occupied) => {
                tracing::debug!("Dropping refresh of {}: version moved on", uri);
                Some(Arc::clone(&occupied.get().document))
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<Document>> {
        self.entries
            .get(uri)
            .map(|cached| Arc::clone(&cached.document))
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.entries.get(uri).map(|cached| cached.version)
    }

    pub fn invalidate(&self, uri: &Url) {
        self.entries.remove(uri);
    }

    fn store(&self, uri: &Url, version: i32, document: Arc<Document>) -> Arc<Document> {
        match self.entries.entry(uri.clone()) {
            Entry::Occupied(occupied) if occupied.get().version >= version => {
                tracing::debug!("Dropping build of {} version {}: superseded", uri, version);
                Arc::clone(&occupied.get().document)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(CachedDocument {
                    version,
                    document: Arc::clone(&document),
                });
                document
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedDocument {
                    version,
                    document: Arc::clone(&document),
                });
                document
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orbs::NoOrbs;

    fn uri() -> Url {
        Url::parse("file:///project/.circleci/config.yml").unwrap()
    }

    fn cache() -> DocumentCache {
        DocumentCache::new(Arc::new(NoOrbs))
    }

    #[test]
    fn test_newer_version_replaces() {
        let cache = cache();
        let first = cache.get_or_parse(&uri(), "version: 2\n", 1);
        let second = cache.get_or_parse(&uri(), "version: 2.1\n", 2);

        assert_eq!(first.content, "version: 2\n");
        assert_eq!(second.content, "version: 2.1\n");
        assert_eq!(cache.version(&uri()), Some(2));
    }

    #[test]
    fn test_stale_version_returns_cached() {
        let cache = cache();
        cache.get_or_parse(&uri(), "version: 2.1\n", 5);
        let stale = cache.get_or_parse(&uri(), "version: 2\n", 3);

        assert_eq!(stale.content, "version: 2.1\n");
        assert_eq!(cache.version(&uri()), Some(5));
    }

    #[test]
    fn test_same_version_is_not_rebuilt() {
        let cache = cache();
        let first = cache.get_or_parse(&uri(), "version: 2.1\n", 1);
        let again = cache.get_or_parse(&uri(), "version: 2.1\n", 1);

        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_refresh_and_invalidate() {
        let cache = cache();
        assert!(cache.refresh(&uri()).is_none());

        let first = cache.get_or_parse(&uri(), "version: 2.1\n", 1);
        let refreshed = cache.refresh(&uri()).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(*first, *refreshed);

        cache.invalidate(&uri());
        assert!(cache.get(&uri()).is_none());
        assert_eq!(cache.version(&uri()), None);
    }
}
