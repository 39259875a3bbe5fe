//! BindingInstance - an immutable, comparable data path

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::keys;

/// One step in a binding path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Object key (interned)
    Key(Arc<str>),
    /// Array index
    Index(usize),
}

impl Segment {
    pub fn key(name: &str) -> Self {
        Segment::Key(keys::key(name))
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(_) => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::key(s)
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

struct BindingInner {
    segments: Vec<Segment>,
    path: String,
}

/// A parsed binding path.
///
/// Cheap to clone (shared). Equality is structural, with a pointer fast path
/// for instances handed out by the parser cache.
#[derive(Clone)]
pub struct BindingInstance {
    inner: Arc<BindingInner>,
}

impl BindingInstance {
    pub fn new(segments: Vec<Segment>) -> Self {
        let path = segments
            .iter()
            .map(Segment::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self {
            inner: Arc::new(BindingInner { segments, path }),
        }
    }

    /// The empty path (the whole data model)
    pub fn root() -> Self {
        Self::new(Vec::new())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.inner.segments
    }

    /// Canonical dotted form: `foo.bar.0.baz`
    pub fn as_string(&self) -> &str {
        &self.inner.path
    }

    pub fn as_array(&self) -> Vec<Segment> {
        self.inner.segments.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.inner.segments.is_empty()
    }

    /// Binding one segment shorter; `None` for top-level and root bindings
    pub fn parent(&self) -> Option<BindingInstance> {
        match self.inner.segments.len() {
            0 | 1 => None,
            n => Some(Self::new(self.inner.segments[..n - 1].to_vec())),
        }
    }

    /// Last segment
    pub fn key(&self) -> Option<&Segment> {
        self.inner.segments.last()
    }

    /// True if `other` is this binding or lives underneath it
    pub fn contains(&self, other: &BindingInstance) -> bool {
        other.segments().starts_with(self.segments())
    }

    /// Append segments below this binding
    pub fn descendent<I, S>(&self, relative: I) -> BindingInstance
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        let mut segments = self.as_array();
        segments.extend(relative.into_iter().map(Into::into));
        Self::new(segments)
    }

    /// Path of this binding relative to `parent`, if `parent` contains it
    pub fn relative(&self, parent: &BindingInstance) -> Option<BindingInstance> {
        parent
            .contains(self)
            .then(|| Self::new(self.segments()[parent.len()..].to_vec()))
    }

    /// Same shared instance (not just equal)
    pub fn ptr_eq(&self, other: &BindingInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for BindingInstance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.inner.segments == other.inner.segments
    }
}

impl Eq for BindingInstance {}

impl Hash for BindingInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.segments.hash(state);
    }
}

impl fmt::Debug for BindingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({})", self.inner.path)
    }
}

impl fmt::Display for BindingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.path)
    }
}

impl Serialize for BindingInstance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(segments: Vec<Segment>) -> BindingInstance {
        BindingInstance::new(segments)
    }

    #[test]
    fn as_string_joins_with_dots() {
        let binding = b(vec!["foo".into(), 0.into(), "bar".into()]);
        assert_eq!(binding.as_string(), "foo.0.bar");
        assert_eq!(binding.len(), 3);
    }

    #[test]
    fn parent_and_key() {
        let binding = b(vec!["a".into(), "b".into()]);
        assert_eq!(binding.parent(), Some(b(vec!["a".into()])));
        assert_eq!(binding.key(), Some(&Segment::key("b")));
        assert_eq!(b(vec!["a".into()]).parent(), None);
        assert_eq!(BindingInstance::root().key(), None);
    }

    #[test]
    fn contains_is_prefix_check() {
        let parent = b(vec!["a".into()]);
        let child = b(vec!["a".into(), "b".into()]);
        assert!(parent.contains(&child));
        assert!(parent.contains(&parent));
        assert!(!child.contains(&parent));
        assert!(BindingInstance::root().contains(&child));
    }

    #[test]
    fn descendent_and_relative_are_inverse() {
        let parent = b(vec!["items".into()]);
        let child = parent.descendent([Segment::Index(2), Segment::key("name")]);
        assert_eq!(child.as_string(), "items.2.name");
        assert_eq!(child.relative(&parent).unwrap().as_string(), "2.name");
        assert!(parent.relative(&child).is_none());
    }

    #[test]
    fn equality_is_structural() {
        let x = b(vec!["a".into()]);
        let y = b(vec!["a".into()]);
        assert_eq!(x, y);
        assert!(!x.ptr_eq(&y));
    }
}
