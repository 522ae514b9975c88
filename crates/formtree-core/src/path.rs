#![forbid(unsafe_code)]

//! Dotted/bracketed node paths.
//!
//! A path addresses a node relative to the form root: `"email"`,
//! `"address.city"`, `"items[0].title"`. The empty string is the root.
//! Purely numeric dotted segments (`"items.0.title"`) are accepted as indices.
//!
//! [`FieldPath`] is the typed descriptor handed to schema functions. It
//! carries the path string plus, when known, the [`Shape`] of the node it
//! points at, so that stepping into a key that the form does not have can be
//! reported as a configuration error while the schema is still running.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{FormError, FormResult};
use crate::scope;

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

fn is_index(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Split a path string into segments.
pub fn parse_path(path: &str) -> FormResult<Vec<PathSegment>> {
    let invalid = || FormError::InvalidPath {
        path: path.to_string(),
    };
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    for part in path.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if name.is_empty() || name.contains(']') {
            return Err(invalid());
        }
        if is_index(name) {
            segments.push(PathSegment::Index(name.parse().map_err(|_| invalid())?));
        } else {
            segments.push(PathSegment::Key(name.to_string()));
        }

        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(invalid)?;
            let digits = &rest[1..close];
            if !is_index(digits) {
                return Err(invalid());
            }
            segments.push(PathSegment::Index(digits.parse().map_err(|_| invalid())?));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid());
            }
        }
    }
    Ok(segments)
}

/// Render segments back into canonical path syntax.
#[must_use]
pub fn format_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Key(key) => out = join_key(&out, key),
            PathSegment::Index(index) => out = join_index(&out, *index),
        }
    }
    out
}

/// `join_key("a", "b") == "a.b"`, `join_key("", "b") == "b"`.
#[must_use]
pub fn join_key(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

/// `join_index("items", 2) == "items[2]"`.
#[must_use]
pub fn join_index(base: &str, index: usize) -> String {
    format!("{base}[{index}]")
}

/// Whether `path` is `prefix` itself or lies underneath it.
#[must_use]
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || path == prefix {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// The structural outline of a node configuration, without values.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Field,
    Group(IndexMap<String, Rc<Shape>>),
    Array(Rc<Shape>),
}

impl Shape {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Group(_) => "group",
            Self::Array(_) => "array",
        }
    }
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// Typed path descriptor passed to validation and behavior schemas.
///
/// Cloning is cheap. Descriptors are plain data: they hold no reference to
/// live nodes and can be captured by closures freely.
#[derive(Clone)]
pub struct FieldPath {
    path: Rc<str>,
    shape: Option<Rc<Shape>>,
}

impl FieldPath {
    /// Descriptor for the root of a form with the given shape.
    #[must_use]
    pub fn root(shape: Rc<Shape>) -> Self {
        Self {
            path: Rc::from(""),
            shape: Some(shape),
        }
    }

    /// Descriptor for an arbitrary path with no structural knowledge.
    #[must_use]
    pub fn unchecked(path: &str) -> Self {
        Self {
            path: Rc::from(path),
            shape: None,
        }
    }

    pub(crate) fn with_shape(path: &str, shape: Option<Rc<Shape>>) -> Self {
        Self {
            path: Rc::from(path),
            shape,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    #[must_use]
    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_deref()
    }

    /// Child keys when this descriptor points at a group.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self.shape.as_deref() {
            Some(Shape::Group(fields)) => fields.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Step into a group child.
    ///
    /// Stepping into a key the group does not declare is recorded as a
    /// configuration error on the schema currently being collected.
    #[must_use]
    pub fn field(&self, key: &str) -> FieldPath {
        let path = join_key(&self.path, key);
        match self.shape.as_deref() {
            None => Self::with_shape(&path, None),
            Some(Shape::Group(fields)) => match fields.get(key) {
                Some(shape) => Self::with_shape(&path, Some(Rc::clone(shape))),
                None => {
                    scope::report_config_error(FormError::UnknownField { path: path.clone() });
                    Self::with_shape(&path, None)
                }
            },
            Some(Shape::Array(_)) if is_index(key) => match key.parse() {
                Ok(index) => self.item(index),
                Err(_) => Self::with_shape(&path, None),
            },
            Some(other) => {
                scope::report_config_error(FormError::InvalidConfig {
                    path: path.clone(),
                    reason: format!("cannot take key `{key}` of a {}", other.kind_name()),
                });
                Self::with_shape(&path, None)
            }
        }
    }

    /// Step into an array item.
    #[must_use]
    pub fn item(&self, index: usize) -> FieldPath {
        let path = join_index(&self.path, index);
        match self.shape.as_deref() {
            Some(Shape::Array(item)) => Self::with_shape(&path, Some(Rc::clone(item))),
            None => Self::with_shape(&path, None),
            Some(other) => {
                scope::report_config_error(FormError::InvalidConfig {
                    path: path.clone(),
                    reason: format!("cannot index into a {}", other.kind_name()),
                });
                Self::with_shape(&path, None)
            }
        }
    }

    /// Step through a relative path such as `"address.city"`.
    #[must_use]
    pub fn at(&self, relative: &str) -> FieldPath {
        let segments = match parse_path(relative) {
            Ok(segments) => segments,
            Err(err) => {
                scope::report_config_error(err);
                return Self::with_shape(&join_key(&self.path, relative), None);
            }
        };
        segments.iter().fold(self.clone(), |acc, segment| match segment {
            PathSegment::Key(key) => acc.field(key),
            PathSegment::Index(index) => acc.item(*index),
        })
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldPath")
            .field("path", &&*self.path)
            .field("kind", &self.shape.as_deref().map(Shape::kind_name))
            .finish()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl PartialEq for FieldPath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FieldPath {}

/// Navigate a [`FieldPath`] with dotted syntax.
///
/// ```ignore
/// required(&path!(p.address.city));
/// ```
#[macro_export]
macro_rules! path {
    ($root:ident $(. $key:ident)+) => {
        $root $(.field(stringify!($key)))+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shape() -> Rc<Shape> {
        let mut address = IndexMap::new();
        address.insert("city".to_string(), Rc::new(Shape::Field));
        let mut item = IndexMap::new();
        item.insert("title".to_string(), Rc::new(Shape::Field));
        let mut root = IndexMap::new();
        root.insert("email".to_string(), Rc::new(Shape::Field));
        root.insert("address".to_string(), Rc::new(Shape::Group(address)));
        root.insert(
            "items".to_string(),
            Rc::new(Shape::Array(Rc::new(Shape::Group(item)))),
        );
        Rc::new(Shape::Group(root))
    }

    #[test]
    fn parses_keys_and_indices() {
        assert_eq!(
            parse_path("items[0].title").unwrap(),
            vec![
                PathSegment::Key("items".into()),
                PathSegment::Index(0),
                PathSegment::Key("title".into()),
            ]
        );
        assert_eq!(
            parse_path("items.3").unwrap(),
            vec![PathSegment::Key("items".into()), PathSegment::Index(3)]
        );
        assert_eq!(
            parse_path("grid[1][2]").unwrap(),
            vec![
                PathSegment::Key("grid".into()),
                PathSegment::Index(1),
                PathSegment::Index(2),
            ]
        );
        assert!(parse_path("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["a..b", ".a", "a.", "a[", "a[x]", "a[]", "a[1]b", "[0]", "a[-1]"] {
            assert!(
                matches!(parse_path(bad), Err(FormError::InvalidPath { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn joins() {
        assert_eq!(join_key("", "a"), "a");
        assert_eq!(join_key("a", "b"), "a.b");
        assert_eq!(join_index("items", 2), "items[2]");
        assert!(is_within("items[0].title", "items"));
        assert!(is_within("items", "items"));
        assert!(!is_within("itemsX", "items"));
        assert!(is_within("anything", ""));
    }

    #[test]
    fn field_path_navigation() {
        let root = FieldPath::root(shape());
        assert!(root.is_root());
        assert_eq!(root.keys(), vec!["email", "address", "items"]);

        let city = root.field("address").field("city");
        assert_eq!(city.path(), "address.city");
        assert_eq!(city.shape(), Some(&Shape::Field));

        let title = root.field("items").item(1).field("title");
        assert_eq!(title.path(), "items[1].title");
        assert_eq!(title.shape(), Some(&Shape::Field));

        assert_eq!(root.at("items[0].title").path(), "items[0].title");
        assert_eq!(root.field("items").field("2").path(), "items[2]");
    }

    #[test]
    fn path_macro_walks_keys() {
        let p = FieldPath::root(shape());
        assert_eq!(path!(p.address.city).path(), "address.city");
    }

    #[test]
    fn unknown_key_outside_schema_scope_still_yields_path() {
        let root = FieldPath::root(shape());
        let missing = root.field("nope");
        assert_eq!(missing.path(), "nope");
        assert!(missing.shape().is_none());
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9_]{0,6}"
    }

    fn segments_strategy() -> impl Strategy<Value = Vec<PathSegment>> {
        (
            key_strategy(),
            proptest::collection::vec(
                prop_oneof![
                    key_strategy().prop_map(PathSegment::Key),
                    (0usize..50).prop_map(PathSegment::Index),
                ],
                0..6,
            ),
        )
            .prop_map(|(first, rest)| {
                let mut all = vec![PathSegment::Key(first)];
                all.extend(rest);
                all
            })
    }

    proptest! {
        #[test]
        fn format_then_parse_is_identity(segments in segments_strategy()) {
            let text = format_path(&segments);
            prop_assert_eq!(parse_path(&text).unwrap(), segments);
        }
    }
}
