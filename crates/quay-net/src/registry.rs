use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Handle returned for every registration; pass it back to deregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId {
    name: String,
    seq: u64,
}

impl ListenerId {
    /// Case-folded name the listener was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered per-name listener lists with case-insensitive names.
pub struct Registry<L: ?Sized> {
    inner: Mutex<RegistryInner<L>>,
}

struct RegistryInner<L: ?Sized> {
    next_seq: u64,
    listeners: HashMap<String, Vec<(u64, Arc<L>)>>,
}

impl<L: ?Sized> Default for Registry<L> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_seq: 0,
                listeners: HashMap::new(),
            }),
        }
    }
}

pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

impl<L: ?Sized> Registry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener`; the same listener may be registered more than once.
    pub fn register(&self, name: &str, listener: Arc<L>) -> ListenerId {
        let name = fold(name);
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .listeners
            .entry(name.clone())
            .or_default()
            .push((seq, listener));
        ListenerId { name, seq }
    }

    pub fn remove(&self, id: &ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(list) = inner.listeners.get_mut(&id.name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(seq, _)| *seq != id.seq);
        let removed = list.len() != before;
        if list.is_empty() {
            inner.listeners.remove(&id.name);
        }
        removed
    }

    /// Listeners for `name` in registration order. The lock is released
    /// before the caller invokes them.
    pub fn snapshot(&self, name: &str) -> Vec<Arc<L>> {
        self.inner
            .lock()
            .listeners
            .get(&fold(name))
            .map(|list| list.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Listener = dyn Fn(&mut Vec<&'static str>) + Send + Sync;

    fn tag(label: &'static str) -> Arc<Listener> {
        Arc::new(move |out: &mut Vec<&'static str>| out.push(label))
    }

    fn fire(registry: &Registry<Listener>, name: &str) -> Vec<&'static str> {
        let mut out = Vec::new();
        for listener in registry.snapshot(name) {
            listener(&mut out);
        }
        out
    }

    #[test]
    fn names_are_case_insensitive() {
        let registry = Registry::<Listener>::new();
        let id = registry.register("Foo", tag("a"));
        assert_eq!(id.name(), "foo");
        assert_eq!(fire(&registry, "FOO"), vec!["a"]);
        assert_eq!(fire(&registry, "fOo"), vec!["a"]);
    }

    #[test]
    fn dispatch_follows_registration_order() {
        let registry = Registry::<Listener>::new();
        registry.register("tick", tag("first"));
        registry.register("tick", tag("second"));
        registry.register("other", tag("never"));
        assert_eq!(fire(&registry, "tick"), vec!["first", "second"]);
    }

    #[test]
    fn duplicate_registrations_fire_each_time() {
        let registry = Registry::<Listener>::new();
        let listener = tag("dup");
        registry.register("tick", listener.clone());
        registry.register("tick", listener);
        assert_eq!(fire(&registry, "tick"), vec!["dup", "dup"]);
    }

    #[test]
    fn remove_drops_only_that_registration() {
        let registry = Registry::<Listener>::new();
        let listener = tag("dup");
        let first = registry.register("tick", listener.clone());
        registry.register("tick", listener);
        assert!(registry.remove(&first));
        assert!(!registry.remove(&first));
        assert_eq!(fire(&registry, "tick"), vec!["dup"]);
    }

    #[test]
    fn unknown_name_yields_nothing() {
        let registry = Registry::<Listener>::new();
        assert!(registry.snapshot("missing").is_empty());
    }
}
