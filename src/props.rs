//! Dead property storage.
//!
//! Dead properties are stored verbatim as XML elements, keyed by
//! resource path and qualified name. The store travels with the
//! resource: copied on COPY, moved on MOVE, dropped on DELETE.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use xmltree::Element;

/// An XML qualified name. The empty string is the empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub ns: String,
    pub local: String,
}

impl PropName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> PropName {
        PropName {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub(crate) fn of_element(elem: &Element) -> PropName {
        PropName {
            ns: elem.namespace.clone().unwrap_or_default(),
            local: elem.name.clone(),
        }
    }

    /// Names in the DAV: namespace are reserved for live properties.
    pub fn is_dav(&self) -> bool {
        self.ns == "DAV:"
    }
}

/// Per-resource storage of dead properties.
///
/// The reference implementation is [`MemPropStore`]; durable backends
/// satisfy the same contract. Operations taking a collection path
/// apply to the whole retained subtree.
pub trait PropStore: Send + Sync + 'static {
    /// All dead properties of a resource.
    fn get(&self, path: &str) -> Vec<(PropName, Element)>;

    /// One dead property of a resource.
    fn find(&self, path: &str, name: &PropName) -> Option<Element>;

    /// Set (or replace) a dead property.
    fn set(&self, path: &str, name: PropName, value: Element);

    /// Remove a single dead property. Removing an absent property is
    /// not an error.
    fn remove(&self, path: &str, name: &PropName);

    /// Duplicate all properties under `src` to the same place under `dst`.
    fn copy(&self, src: &str, dst: &str);

    /// Like `copy`, but the source side is dropped.
    fn move_all(&self, src: &str, dst: &str);

    /// Drop all properties of `path` and its descendants.
    fn delete(&self, path: &str);
}

fn is_within(key: &str, path: &str) -> bool {
    key == path || (path != "/" && key.starts_with(&format!("{path}/")))
        || (path == "/" && key.starts_with('/'))
}

fn rebase(key: &str, src: &str, dst: &str) -> String {
    if key == src {
        dst.to_string()
    } else {
        format!("{dst}{}", &key[src.len()..])
    }
}

/// In-memory property store.
pub struct MemPropStore {
    map: RwLock<HashMap<String, HashMap<PropName, Element>>>,
}

impl MemPropStore {
    pub fn new() -> Arc<MemPropStore> {
        Arc::new(MemPropStore {
            map: RwLock::new(HashMap::new()),
        })
    }
}

impl PropStore for MemPropStore {
    fn get(&self, path: &str) -> Vec<(PropName, Element)> {
        let map = self.map.read();
        map.get(path)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, elem)| (name.clone(), elem.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find(&self, path: &str, name: &PropName) -> Option<Element> {
        let map = self.map.read();
        map.get(path).and_then(|props| props.get(name)).cloned()
    }

    fn set(&self, path: &str, name: PropName, value: Element) {
        let mut map = self.map.write();
        map.entry(path.to_string()).or_default().insert(name, value);
    }

    fn remove(&self, path: &str, name: &PropName) {
        let mut map = self.map.write();
        if let Some(props) = map.get_mut(path) {
            props.remove(name);
            if props.is_empty() {
                map.remove(path);
            }
        }
    }

    fn copy(&self, src: &str, dst: &str) {
        let mut map = self.map.write();
        let moved: Vec<(String, HashMap<PropName, Element>)> = map
            .iter()
            .filter(|(k, _)| is_within(k, src))
            .map(|(k, v)| (rebase(k, src, dst), v.clone()))
            .collect();
        for (k, v) in moved {
            map.insert(k, v);
        }
    }

    fn move_all(&self, src: &str, dst: &str) {
        let mut map = self.map.write();
        let keys: Vec<String> = map
            .keys()
            .filter(|k| is_within(k, src))
            .cloned()
            .collect();
        for k in keys {
            if let Some(v) = map.remove(&k) {
                map.insert(rebase(&k, src, dst), v);
            }
        }
    }

    fn delete(&self, path: &str) {
        let mut map = self.map.write();
        map.retain(|k, _| !is_within(k, path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(xml: &str) -> Element {
        Element::parse(xml.as_bytes()).unwrap()
    }

    fn name(ns: &str, local: &str) -> PropName {
        PropName::new(ns, local)
    }

    #[test]
    fn set_get_roundtrip() {
        let store = MemPropStore::new();
        let value = elem(r#"<bar xmlns="urn:foo">v</bar>"#);
        store.set("/a", name("urn:foo", "bar"), value.clone());

        assert_eq!(store.find("/a", &name("urn:foo", "bar")), Some(value));
        assert_eq!(store.find("/a", &name("urn:foo", "other")), None);
        assert_eq!(store.get("/a").len(), 1);
        // a different namespace is a different property.
        assert_eq!(store.find("/a", &name("urn:quux", "bar")), None);
    }

    #[test]
    fn remove_drops_entry() {
        let store = MemPropStore::new();
        store.set("/a", name("", "n"), elem("<n>1</n>"));
        store.remove("/a", &name("", "n"));
        assert!(store.get("/a").is_empty());
        // removing twice is fine.
        store.remove("/a", &name("", "n"));
    }

    #[test]
    fn copy_and_move_take_descendants() {
        let store = MemPropStore::new();
        store.set("/d", name("", "p"), elem("<p>root</p>"));
        store.set("/d/f", name("", "p"), elem("<p>leaf</p>"));

        store.copy("/d", "/c");
        assert!(store.find("/c", &name("", "p")).is_some());
        assert!(store.find("/c/f", &name("", "p")).is_some());
        assert!(store.find("/d/f", &name("", "p")).is_some());

        store.move_all("/d", "/m");
        assert!(store.find("/d", &name("", "p")).is_none());
        assert!(store.find("/d/f", &name("", "p")).is_none());
        assert!(store.find("/m/f", &name("", "p")).is_some());
    }

    #[test]
    fn delete_takes_descendants() {
        let store = MemPropStore::new();
        store.set("/d", name("", "p"), elem("<p>1</p>"));
        store.set("/d/f", name("", "p"), elem("<p>2</p>"));
        store.set("/dx", name("", "p"), elem("<p>3</p>"));

        store.delete("/d");
        assert!(store.get("/d").is_empty());
        assert!(store.get("/d/f").is_empty());
        // sibling with a common name prefix survives.
        assert_eq!(store.get("/dx").len(), 1);
    }
}
