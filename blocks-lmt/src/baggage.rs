//! Key/value context carried from an activity to all of its descendants.
//!
//! The entry under [`TENANT_ID_KEY`] is the tenant every log record and span
//! produced in that flow is tagged with. Baggage lives either on the
//! [`Context`] or on an activity. A new activity takes its parent's baggage
//! with the context's entries layered on top, and its own context starts with
//! no context-level baggage. Entries added to a context while an activity is
//! current therefore override that activity's baggage.
use crate::{Context, Key};
use serde::Serialize;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Baggage key holding the tenant of a flow.
pub const TENANT_ID_KEY: &str = "TenantId";

static DEFAULT_BAGGAGE: OnceLock<Baggage> = OnceLock::new();

const MAX_KEY_VALUE_PAIRS: usize = 64;
const MAX_LEN_OF_ALL_PAIRS: usize = 8192;

fn get_default_baggage() -> &'static Baggage {
    DEFAULT_BAGGAGE.get_or_init(Baggage::default)
}

/// A set of name/value pairs.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Baggage {
    inner: BTreeMap<Key, String>,
    #[serde(skip)]
    kv_content_len: usize,
}

impl Baggage {
    /// Empty baggage.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// The value stored under `key`.
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.inner.get(key.as_ref()).map(String::as_str)
    }

    /// Insert a pair, returning the previous value.
    ///
    /// Entries beyond 64 pairs or 8192 bytes in total are refused and
    /// `None` is returned.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<Key>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        let added = key.as_str().len() + value.len();

        match self.inner.get(key.as_str()) {
            Some(old) => {
                let new_len = self.kv_content_len - key.as_str().len() - old.len() + added;
                if new_len > MAX_LEN_OF_ALL_PAIRS {
                    return None;
                }
                self.kv_content_len = new_len;
            }
            None => {
                if self.inner.len() + 1 > MAX_KEY_VALUE_PAIRS
                    || self.kv_content_len + added > MAX_LEN_OF_ALL_PAIRS
                {
                    return None;
                }
                self.kv_content_len += added;
            }
        }
        self.inner.insert(key, value)
    }

    /// Remove a pair, returning its value.
    pub fn remove<K: AsRef<str>>(&mut self, key: K) -> Option<String> {
        let removed = self.inner.remove(key.as_ref());
        if let Some(value) = &removed {
            self.kv_content_len -= key.as_ref().len() + value.len();
        }
        removed
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Pairs in key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.inner.iter())
    }

    /// A copy of this baggage with every entry of `overrides` inserted.
    pub(crate) fn layered(&self, overrides: &Baggage) -> Baggage {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// The tenant override carried by this baggage, if any.
    pub fn tenant_id(&self) -> Option<&str> {
        self.get(TENANT_ID_KEY).filter(|tenant| !tenant.is_empty())
    }
}

/// An iterator over the entries of a [`Baggage`].
#[derive(Debug)]
pub struct Iter<'a>(btree_map::Iter<'a, Key, String>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Key, &'a String);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl<'a> IntoIterator for &'a Baggage {
    type Item = (&'a Key, &'a String);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Baggage
where
    K: Into<Key>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut baggage = Baggage::default();
        for (key, value) in iter {
            baggage.insert(key, value);
        }
        baggage
    }
}

impl fmt::Display for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.inner.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Methods for sorting and retrieving baggage data in a context.
pub trait BaggageExt {
    /// A copy of this context carrying `baggage`.
    fn with_baggage<T: Into<Baggage>>(&self, baggage: T) -> Self;

    /// The current context carrying `baggage`.
    fn current_with_baggage<T: Into<Baggage>>(baggage: T) -> Self;

    /// A copy of this context with the tenant override set to `tenant_id`.
    fn with_tenant(&self, tenant_id: impl Into<String>) -> Self;

    /// The current context with the tenant override set to `tenant_id`.
    fn current_with_tenant(tenant_id: impl Into<String>) -> Self;

    /// Baggage stored directly on the context.
    fn baggage(&self) -> &Baggage;

    /// Baggage in effect for this flow: the baggage of the current activity,
    /// if any, with the context's own entries taking precedence.
    fn effective_baggage(&self) -> Baggage;
}

#[derive(Debug)]
struct BaggageContextValue(Baggage);

impl BaggageExt for Context {
    fn with_baggage<T: Into<Baggage>>(&self, baggage: T) -> Self {
        self.with_value(BaggageContextValue(baggage.into()))
    }

    fn current_with_baggage<T: Into<Baggage>>(baggage: T) -> Self {
        Context::map_current(|cx| cx.with_baggage(baggage))
    }

    fn with_tenant(&self, tenant_id: impl Into<String>) -> Self {
        let mut baggage = self.baggage().clone();
        baggage.insert(TENANT_ID_KEY, tenant_id);
        self.with_baggage(baggage)
    }

    fn current_with_tenant(tenant_id: impl Into<String>) -> Self {
        Context::map_current(|cx| cx.with_tenant(tenant_id))
    }

    fn baggage(&self) -> &Baggage {
        self.get::<BaggageContextValue>()
            .map_or(get_default_baggage(), |b| &b.0)
    }

    fn effective_baggage(&self) -> Baggage {
        match &self.activity {
            Some(activity) if self.baggage().is_empty() => activity.baggage(),
            Some(activity) => activity.baggage().layered(self.baggage()),
            None => self.baggage().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_and_tracks_length() {
        let mut baggage = Baggage::new();
        assert_eq!(baggage.insert(TENANT_ID_KEY, "t1"), None);
        assert_eq!(baggage.insert(TENANT_ID_KEY, "t2"), Some("t1".to_string()));
        assert_eq!(baggage.tenant_id(), Some("t2"));
        assert_eq!(baggage.len(), 1);
        assert_eq!(baggage.remove(TENANT_ID_KEY), Some("t2".to_string()));
        assert!(baggage.is_empty());
    }

    #[test]
    fn too_many_entries_are_refused() {
        let mut baggage = Baggage::new();
        for i in 0..MAX_KEY_VALUE_PAIRS + 10 {
            baggage.insert(format!("key{}", i), "v");
        }
        assert_eq!(baggage.len(), MAX_KEY_VALUE_PAIRS);
    }

    #[test]
    fn empty_tenant_is_not_an_override() {
        let baggage: Baggage = [(TENANT_ID_KEY, "")].into_iter().collect();
        assert_eq!(baggage.tenant_id(), None);
    }

    #[test]
    fn context_without_activity_uses_its_own_baggage() {
        let _guard = Context::current_with_tenant("t1").attach();
        let baggage = Context::map_current(|cx| cx.effective_baggage());
        assert_eq!(baggage.tenant_id(), Some("t1"));
        assert_eq!(Context::new().baggage().tenant_id(), None);
    }

    #[test]
    fn layered_entries_override_and_extend() {
        let base: Baggage = [(TENANT_ID_KEY, "t1"), ("region", "eu")].into_iter().collect();
        let overrides: Baggage = [(TENANT_ID_KEY, "t2")].into_iter().collect();
        let merged = base.layered(&overrides);
        assert_eq!(merged.tenant_id(), Some("t2"));
        assert_eq!(merged.get("region"), Some("eu"));
        assert_eq!(base.tenant_id(), Some("t1"));
    }

    #[test]
    fn serializes_as_a_flat_object() {
        let baggage: Baggage = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(serde_json::to_string(&baggage).unwrap(), r#"{"a":"1","b":"2"}"#);
        assert_eq!(baggage.to_string(), "a=1,b=2");
    }
}
