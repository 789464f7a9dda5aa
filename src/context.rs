//! Evaluation subjects.
//!
//! A [`Context`] is made of one or more [`IndividualContext`]s, each identified by a kind (e.g.,
//! `"user"`, `"organization"`) and a key. Contexts are validated at construction, so evaluation can
//! always assume a well-formed subject.
use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::{attr_ref::AttrRef, error::ContextError};

/// Kind used when none is specified.
pub const DEFAULT_KIND: &str = "user";

/// A subject of evaluation: either a single individual context or a multi-kind context.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Sorted by kind for multi-kind contexts; exactly one entry for single-kind contexts.
    individuals: Vec<IndividualContext>,
}

/// One kind of a [`Context`], with its key and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct IndividualContext {
    kind: String,
    key: String,
    name: Option<String>,
    anonymous: bool,
    secondary: Option<String>,
    attributes: Map<String, Value>,
}

impl Context {
    /// Create a context of the default `"user"` kind with no attributes.
    ///
    /// ```
    /// # use flageval::Context;
    /// let context = Context::new("user-key-123").unwrap();
    /// assert_eq!(context.kinds().collect::<Vec<_>>(), ["user"]);
    /// ```
    pub fn new(key: impl Into<String>) -> Result<Context, ContextError> {
        Context::builder(key).build()
    }

    pub fn builder(key: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(key)
    }

    /// Combine several contexts into a multi-kind context.
    ///
    /// Multi-kind inputs are flattened. A single resulting individual yields a single-kind context.
    pub fn multi(contexts: impl IntoIterator<Item = Context>) -> Result<Context, ContextError> {
        let mut individuals: Vec<IndividualContext> = contexts
            .into_iter()
            .flat_map(|context| context.individuals)
            .collect();
        if individuals.is_empty() {
            return Err(ContextError::EmptyMultiKind);
        }
        individuals.sort_by(|a, b| a.kind.cmp(&b.kind));
        if let Some(pair) = individuals.windows(2).find(|pair| pair[0].kind == pair[1].kind) {
            return Err(ContextError::DuplicateKind(pair[0].kind.clone()));
        }
        Ok(Context { individuals })
    }

    pub fn is_multi(&self) -> bool {
        self.individuals.len() > 1
    }

    /// All kinds present in this context.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.individuals.iter().map(|c| c.kind.as_str())
    }

    /// All individual contexts.
    pub fn individuals(&self) -> &[IndividualContext] {
        &self.individuals
    }

    /// Select the individual context of the given kind (`None` means the default kind).
    pub fn individual(&self, kind: Option<&str>) -> Option<&IndividualContext> {
        let kind = kind.filter(|k| !k.is_empty()).unwrap_or(DEFAULT_KIND);
        self.individuals.iter().find(|c| c.kind == kind)
    }

    /// Key of the single-kind context, or a canonical key combining all kinds for multi-kind
    /// contexts.
    pub fn fully_qualified_key(&self) -> Cow<'_, str> {
        match self.individuals.as_slice() {
            [single] if single.kind == DEFAULT_KIND => Cow::Borrowed(single.key.as_str()),
            individuals => Cow::Owned(
                individuals
                    .iter()
                    .map(|c| format!("{}:{}", c.kind, escape_key(&c.key)))
                    .collect::<Vec<_>>()
                    .join(":"),
            ),
        }
    }
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if key.contains(['%', ':']) {
        Cow::Owned(key.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(key)
    }
}

impl IndividualContext {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Secondary key. When present, it is mixed into bucketing.
    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    /// Look up a value by attribute reference.
    ///
    /// Returns `None` if the reference is invalid, the attribute is missing, or the path walks
    /// through a non-object value. A JSON `null` is returned as `Some(Null)`; callers decide whether
    /// that counts as absent.
    pub fn get_value(&self, attr: &AttrRef) -> Option<Cow<'_, Value>> {
        let components = attr.components().ok()?;
        let (first, rest) = components.split_first()?;
        let mut value: Cow<'_, Value> = match (first.as_str(), rest.is_empty()) {
            ("kind", true) => Cow::Owned(Value::String(self.kind.clone())),
            ("key", true) => Cow::Owned(Value::String(self.key.clone())),
            ("name", true) => Cow::Owned(Value::String(self.name.clone()?)),
            ("anonymous", true) => Cow::Owned(Value::Bool(self.anonymous)),
            _ => Cow::Borrowed(self.attributes.get(first)?),
        };
        for component in rest {
            value = match value {
                Cow::Borrowed(Value::Object(map)) => Cow::Borrowed(map.get(component)?),
                _ => return None,
            };
        }
        Some(value)
    }
}

/// Builder for single-kind [`Context`]s.
///
/// ```
/// # use flageval::Context;
/// let context = Context::builder("org-key")
///     .kind("organization")
///     .name("Acme")
///     .set("employees", 1200)
///     .build()
///     .unwrap();
/// assert!(context.individual(Some("organization")).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    individual: IndividualContext,
}

impl ContextBuilder {
    pub fn new(key: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            individual: IndividualContext {
                kind: DEFAULT_KIND.to_owned(),
                key: key.into(),
                name: None,
                anonymous: false,
                secondary: None,
                attributes: Map::new(),
            },
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> ContextBuilder {
        self.individual.kind = kind.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> ContextBuilder {
        self.individual.name = Some(name.into());
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> ContextBuilder {
        self.individual.anonymous = anonymous;
        self
    }

    pub fn secondary(mut self, secondary: impl Into<String>) -> ContextBuilder {
        self.individual.secondary = Some(secondary.into());
        self
    }

    /// Set a custom attribute.
    ///
    /// Built-in names are routed to their fields: `name` (string) and `anonymous` (boolean).
    /// `kind` and `key` can only be set through the builder and are ignored here.
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> ContextBuilder {
        let attribute = attribute.into();
        let value = value.into();
        match attribute.as_str() {
            "kind" | "key" => {}
            "name" => match value {
                Value::String(name) => self.individual.name = Some(name),
                Value::Null => self.individual.name = None,
                _ => {}
            },
            "anonymous" => {
                if let Value::Bool(anonymous) = value {
                    self.individual.anonymous = anonymous;
                }
            }
            _ => {
                self.individual.attributes.insert(attribute, value);
            }
        }
        self
    }

    pub fn build(self) -> Result<Context, ContextError> {
        let individual = self.individual;
        if !is_valid_kind(&individual.kind) {
            return Err(ContextError::InvalidKind(individual.kind));
        }
        if individual.key.is_empty() {
            return Err(ContextError::EmptyKey);
        }
        Ok(Context {
            individuals: vec![individual],
        })
    }
}

fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind != "kind"
        && kind != "multi"
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Context;
    use crate::{attr_ref::AttrRef, error::ContextError};

    #[test]
    fn builds_user_by_default() {
        let context = Context::new("u1").unwrap();
        let user = context.individual(None).unwrap();
        assert_eq!(user.kind(), "user");
        assert_eq!(user.key(), "u1");
        assert!(!context.is_multi());
    }

    #[test]
    fn rejects_invalid_contexts() {
        assert_eq!(Context::new("").unwrap_err(), ContextError::EmptyKey);
        for kind in ["", "kind", "multi", "has space", "ü"] {
            assert!(matches!(
                Context::builder("k").kind(kind).build(),
                Err(ContextError::InvalidKind(_))
            ));
        }
    }

    #[test]
    fn multi_kind_sorted_and_flattened() {
        let org = Context::builder("o1").kind("org").build().unwrap();
        let user = Context::new("u1").unwrap();
        let device = Context::builder("d1").kind("device").build().unwrap();
        let inner = Context::multi([org, user]).unwrap();
        let context = Context::multi([inner, device]).unwrap();
        assert_eq!(
            context.kinds().collect::<Vec<_>>(),
            ["device", "org", "user"]
        );
        assert_eq!(context.individual(Some("org")).unwrap().key(), "o1");
        assert!(context.individual(Some("other")).is_none());
        assert_eq!(context.fully_qualified_key(), "device:d1:org:o1:user:u1");
    }

    #[test]
    fn multi_kind_rejects_duplicates() {
        let a = Context::new("a").unwrap();
        let b = Context::new("b").unwrap();
        assert_eq!(
            Context::multi([a, b]).unwrap_err(),
            ContextError::DuplicateKind("user".into())
        );
        assert_eq!(
            Context::multi(Vec::new()).unwrap_err(),
            ContextError::EmptyMultiKind
        );
    }

    #[test]
    fn single_entry_multi_is_single() {
        let context = Context::multi([Context::new("a").unwrap()]).unwrap();
        assert!(!context.is_multi());
        assert_eq!(context.fully_qualified_key(), "a");
    }

    #[test]
    fn get_value_built_ins_and_paths() {
        let context = Context::builder("u1")
            .name("Ann")
            .set("address", json!({"city": "Oslo", "zip": {"code": "0150"}}))
            .set("anonymous", true)
            .set("key", "ignored")
            .build()
            .unwrap();
        let user = context.individual(None).unwrap();
        assert_eq!(*user.get_value(&AttrRef::new("key")).unwrap(), json!("u1"));
        assert_eq!(*user.get_value(&AttrRef::new("kind")).unwrap(), json!("user"));
        assert_eq!(*user.get_value(&AttrRef::new("name")).unwrap(), json!("Ann"));
        assert_eq!(*user.get_value(&AttrRef::new("anonymous")).unwrap(), json!(true));
        assert_eq!(
            *user.get_value(&AttrRef::new("/address/city")).unwrap(),
            json!("Oslo")
        );
        assert_eq!(
            *user.get_value(&AttrRef::new("/address/zip/code")).unwrap(),
            json!("0150")
        );
        assert!(user.get_value(&AttrRef::new("/address/city/x")).is_none());
        assert!(user.get_value(&AttrRef::new("missing")).is_none());
        assert!(user.get_value(&AttrRef::new("/a//b")).is_none());
    }

    #[test]
    fn escaped_fully_qualified_key() {
        let org = Context::builder("a:b%c").kind("org").build().unwrap();
        assert_eq!(org.fully_qualified_key(), "org:a%3Ab%25c");
    }
}
