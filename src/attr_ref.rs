//! Attribute references.
//!
//! An attribute reference selects a value from a context. A reference starting with `/` is a path:
//! components are separated by `/`, and `~1`/`~0` escape a literal `/`/`~` inside a component. Any
//! other string is a single attribute name.

/// Why an attribute reference cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrRefError {
    /// The reference is an empty string.
    Empty,
    /// The reference has invalid path syntax (empty component, trailing slash, or bad escape).
    Invalid,
}

/// A parsed attribute reference.
///
/// Parsing never fails outright: an invalid reference is still constructed and carries its error,
/// so that the problem surfaces as a malformed-flag result when (and only if) the reference is
/// actually used during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrRef {
    raw: String,
    components: Result<Vec<String>, AttrRefError>,
}

impl AttrRef {
    /// Parse a reference using path syntax.
    pub fn new(raw: impl Into<String>) -> AttrRef {
        let raw = raw.into();
        let components = parse_path(&raw);
        AttrRef { raw, components }
    }

    /// Make a single-component reference, treating `name` literally even if it starts with `/`.
    pub fn literal(name: impl Into<String>) -> AttrRef {
        let raw = name.into();
        let components = if raw.is_empty() {
            Err(AttrRefError::Empty)
        } else {
            Ok(vec![raw.clone()])
        };
        AttrRef { raw, components }
    }

    /// Reference for the given attribute, honoring path syntax only for context-aware data.
    ///
    /// Data written before contexts existed has no context kind, and its attribute names are
    /// always literal.
    pub fn for_data(raw: &str, context_kind: Option<&str>) -> AttrRef {
        if context_kind.is_some() {
            AttrRef::new(raw)
        } else {
            AttrRef::literal(raw)
        }
    }

    /// The original string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn error(&self) -> Option<AttrRefError> {
        self.components.as_ref().err().copied()
    }

    /// Path components, or the parse error.
    pub fn components(&self) -> Result<&[String], AttrRefError> {
        match &self.components {
            Ok(components) => Ok(components),
            Err(err) => Err(*err),
        }
    }

    /// Return `true` if this is the reserved `kind` pseudo-attribute.
    pub fn is_kind(&self) -> bool {
        matches!(self.components(), Ok([single]) if single == "kind")
    }
}

fn parse_path(raw: &str) -> Result<Vec<String>, AttrRefError> {
    if raw.is_empty() {
        return Err(AttrRefError::Empty);
    }
    let Some(path) = raw.strip_prefix('/') else {
        return Ok(vec![raw.to_owned()]);
    };
    if path.is_empty() {
        return Err(AttrRefError::Invalid);
    }
    path.split('/').map(unescape_component).collect()
}

fn unescape_component(component: &str) -> Result<String, AttrRefError> {
    if component.is_empty() {
        return Err(AttrRefError::Invalid);
    }
    let mut result = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => result.push('~'),
            Some('1') => result.push('/'),
            _ => return Err(AttrRefError::Invalid),
        }
    }
    Ok(result)
}
