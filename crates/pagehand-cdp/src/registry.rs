//! Registry of targets the browser has reported.
//!
//! Kept current by the event republisher; lookups by url or title are
//! linear scans over the current snapshot.

use dashmap::DashMap;

use pagehand_core::{TargetDescriptor, TargetId};

#[derive(Default)]
pub struct TargetRegistry {
    targets: DashMap<TargetId, TargetDescriptor>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, target: TargetDescriptor) {
        self.targets.insert(target.id.clone(), target);
    }

    pub fn remove(&self, id: &TargetId) -> Option<TargetDescriptor> {
        self.targets.remove(id).map(|(_, t)| t)
    }

    pub fn get(&self, id: &TargetId) -> Option<TargetDescriptor> {
        self.targets.get(id).map(|entry| entry.value().clone())
    }

    /// Previous url of a target, updated in place. Returns the old value.
    pub fn update_url(&self, id: &TargetId, url: &str) -> Option<String> {
        self.targets.get_mut(id).map(|mut entry| {
            let old = entry.url.clone();
            entry.url = url.to_string();
            old
        })
    }

    pub fn snapshot(&self) -> Vec<TargetDescriptor> {
        self.targets.iter().map(|kv| kv.value().clone()).collect()
    }

    pub fn pages(&self) -> Vec<TargetDescriptor> {
        self.snapshot().into_iter().filter(|t| t.is_page()).collect()
    }

    /// Find a page target whose url or title matches `needle` exactly.
    pub fn find(&self, needle: &str) -> Option<TargetDescriptor> {
        self.pages()
            .into_iter()
            .find(|t| t.url == needle || t.title == needle)
    }

    pub fn page_count(&self) -> usize {
        self.pages().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, url: &str, title: &str) -> TargetDescriptor {
        TargetDescriptor {
            id: TargetId(id.into()),
            kind: "page".into(),
            url: url.into(),
            title: title.into(),
        }
    }

    #[test]
    fn find_matches_url_or_title() {
        let registry = TargetRegistry::new();
        registry.upsert(page("t1", "http://a.example/", "Alpha"));
        registry.upsert(page("t2", "http://b.example/", "Beta"));

        assert_eq!(registry.find("http://b.example/").unwrap().id.0, "t2");
        assert_eq!(registry.find("Alpha").unwrap().id.0, "t1");
        assert!(registry.find("Gamma").is_none());
    }

    #[test]
    fn non_page_targets_are_not_found() {
        let registry = TargetRegistry::new();
        registry.upsert(TargetDescriptor {
            id: TargetId("w1".into()),
            kind: "service_worker".into(),
            url: "http://a.example/sw.js".into(),
            title: "worker".into(),
        });
        assert!(registry.find("http://a.example/sw.js").is_none());
        assert_eq!(registry.page_count(), 0);
    }

    #[test]
    fn update_url_returns_previous_value() {
        let registry = TargetRegistry::new();
        registry.upsert(page("t1", "about:blank", ""));
        let old = registry.update_url(&TargetId("t1".into()), "http://a.example/");
        assert_eq!(old.as_deref(), Some("about:blank"));
        assert_eq!(registry.get(&TargetId("t1".into())).unwrap().url, "http://a.example/");
    }
}
