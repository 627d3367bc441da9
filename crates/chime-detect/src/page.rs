//! The view of a rendered chat page that site adapters inspect

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Read-only queries against a rendered page
///
/// Selectors are CSS selector strings; a comma-separated group matches if any
/// member matches.
pub trait Page: Send + Sync {
    /// Whether at least one element matches
    fn exists(&self, selector: &str) -> bool;

    /// Text content of every matching element, in document order
    fn texts(&self, selector: &str) -> Vec<String>;

    /// Document title
    fn title(&self) -> String;

    /// Whether the tab is currently visible to the user
    fn is_visible(&self) -> bool;
}

/// A serializable capture of the parts of a page the adapters look at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSnapshot {
    /// Selectors that match at least one element
    pub present: BTreeSet<String>,
    /// Text of the elements matching each selector
    pub texts: BTreeMap<String, Vec<String>>,
    pub title: String,
    pub visible: bool,
}

impl Default for PageSnapshot {
    fn default() -> Self {
        Self {
            present: BTreeSet::new(),
            texts: BTreeMap::new(),
            title: String::new(),
            visible: true,
        }
    }
}

impl PageSnapshot {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Mark a selector as matching
    pub fn with_element(mut self, selector: impl Into<String>) -> Self {
        self.present.insert(selector.into());
        self
    }

    /// Set the texts matched by a selector
    pub fn with_texts<I, S>(mut self, selector: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.texts
            .insert(selector.into(), texts.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    fn group(selector: &str) -> impl Iterator<Item = &str> {
        selector.split(',').map(str::trim).filter(|s| !s.is_empty())
    }
}

impl Page for PageSnapshot {
    fn exists(&self, selector: &str) -> bool {
        Self::group(selector).any(|s| {
            self.present.contains(s) || self.texts.get(s).is_some_and(|t| !t.is_empty())
        })
    }

    fn texts(&self, selector: &str) -> Vec<String> {
        Self::group(selector)
            .filter_map(|s| self.texts.get(s))
            .flatten()
            .cloned()
            .collect()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}

/// A page whose contents change underneath the detector
///
/// Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct LivePage {
    inner: Arc<RwLock<PageSnapshot>>,
}

impl LivePage {
    pub fn new(snapshot: PageSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Replace the whole snapshot
    pub fn replace(&self, snapshot: PageSnapshot) {
        *self.inner.write() = snapshot;
    }

    /// Edit the snapshot in place
    pub fn update(&self, f: impl FnOnce(&mut PageSnapshot)) {
        f(&mut self.inner.write());
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.inner.read().clone()
    }
}

impl Page for LivePage {
    fn exists(&self, selector: &str) -> bool {
        self.inner.read().exists(selector)
    }

    fn texts(&self, selector: &str) -> Vec<String> {
        self.inner.read().texts(selector)
    }

    fn title(&self) -> String {
        self.inner.read().title()
    }

    fn is_visible(&self) -> bool {
        self.inner.read().is_visible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_groups() {
        let page = PageSnapshot::new("t")
            .with_element(".markdown")
            .with_texts(".prose", ["a", "b"]);
        assert!(page.exists(".prose, .markdown"));
        assert!(page.exists(".markdown"));
        assert!(!page.exists(".missing"));
        assert_eq!(page.texts(".prose, .missing"), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_text_list_does_not_match() {
        let page = PageSnapshot::new("t").with_texts(".prose", Vec::<String>::new());
        assert!(!page.exists(".prose"));
    }

    #[test]
    fn test_snapshot_deserializes_with_defaults() {
        let page: PageSnapshot =
            serde_json::from_str(r#"{"present":["button[data-testid=\"stop-button\"]"]}"#)
                .unwrap();
        assert!(page.visible);
        assert!(page.exists(r#"button[data-testid="stop-button"]"#));
    }

    #[test]
    fn test_live_page_shared_between_clones() {
        let page = LivePage::new(PageSnapshot::new("before"));
        let clone = page.clone();
        clone.update(|s| s.title = "after".into());
        assert_eq!(page.title(), "after");
        page.replace(PageSnapshot::new("x").with_visible(false));
        assert!(!clone.is_visible());
    }
}
