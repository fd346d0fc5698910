use crate::util::is_false;
use crate::AttributeValue;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Kind describes the type of entity represented by a [Context].
/// The meaning of a kind is entirely up to the application. To construct a custom kind other than
/// ["user"](Kind::user), see [Kind::try_from].
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    /// Returns true if the kind is "user".
    pub fn is_user(&self) -> bool {
        self.as_ref() == "user"
    }

    /// Returns true if the kind is "multi".
    pub fn is_multi(&self) -> bool {
        self.as_ref() == "multi"
    }

    /// Constructs a kind of type "user".
    pub fn user() -> Self {
        Self(Cow::Borrowed("user"))
    }

    pub(crate) fn multi() -> Self {
        Self(Cow::Borrowed("multi"))
    }
}

impl AsRef<str> for Kind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Default for Kind {
    /// Kind defaults to "user".
    fn default() -> Self {
        Kind::user()
    }
}

impl TryFrom<&str> for Kind {
    type Error = String;

    /// Fallibly constructs a kind.
    /// To be a valid kind, the value cannot be empty, "kind" or "multi", and must be composed
    /// entirely of ASCII alphanumeric characters plus `-`, `.` and `_`.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "" => Err(String::from("context kind cannot be empty")),
            "kind" => Err(String::from("context kind cannot be 'kind'")),
            "multi" => Err(String::from("context kind cannot be 'multi'")),
            "user" => Ok(Kind::user()),
            k if !k
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')) =>
            {
                Err(String::from("context kind contains disallowed characters"))
            }
            _ => Ok(Kind(Cow::Owned(value.to_owned()))),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl Serialize for Kind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_ref())
    }
}

/// Context is the identity and attribute bundle the evaluation client computes flag values for.
///
/// A context might describe the user of an application, the device it runs on, the session, or any
/// combination of those at once. To create a context of a single kind use
/// [crate::ContextBuilder]; to combine several kinds use [crate::MultiContextBuilder].
///
/// The flag store never inspects or validates a context. It is handed to the evaluation client
/// as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    pub(super) kind: Kind,
    // Only present for a multi-context, in which case kind is always "multi".
    pub(super) contexts: Option<Vec<Context>>,
    pub(super) name: Option<String>,
    pub(super) anonymous: bool,
    pub(super) canonical_key: String,
    pub(super) attributes: HashMap<String, AttributeValue>,
    // Empty for a multi-context.
    pub(super) key: String,
}

impl Context {
    /// Returns true if the context is a multi-context.
    pub fn is_multi(&self) -> bool {
        self.kind.is_multi()
    }

    /// Returns the "key" attribute, or an empty string for a multi-context.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the canonical key.
    ///
    /// 1. For a single context of kind "user", the canonical key is equivalent to the key.
    /// 2. For other kinds of single contexts, the canonical key is "kind:key".
    /// 3. For a multi-context, the canonical key is the concatenation of its constituent contexts'
    ///    canonical keys with `:` according to (2) (including kind "user").
    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    /// Returns the "kind" attribute.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Returns the "name" attribute, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true if the context was marked anonymous.
    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    /// Looks up a top-level attribute of a single context by name, including the built-in
    /// "kind", "key", "name" and "anonymous" attributes.
    pub fn get_value(&self, name: &str) -> Option<AttributeValue> {
        if self.is_multi() {
            return match name {
                "kind" => Some(AttributeValue::String(self.kind.to_string())),
                _ => None,
            };
        }

        match name {
            "kind" => Some(AttributeValue::String(self.kind.to_string())),
            "key" => Some(AttributeValue::String(self.key.clone())),
            "name" => self.name.clone().map(AttributeValue::String),
            "anonymous" => Some(AttributeValue::Bool(self.anonymous)),
            _ => self.attributes.get(name).cloned(),
        }
    }

    /// If the specified kind exists within the context, returns a reference to it.
    pub fn as_kind(&self, kind: &Kind) -> Option<&Context> {
        match &self.contexts {
            Some(contexts) => contexts.iter().find(|c| c.kind() == kind),
            None => (self.kind == *kind).then_some(self),
        }
    }

    /// Returns a list of all kinds represented by this context.
    pub fn kinds(&self) -> Vec<&Kind> {
        match &self.contexts {
            Some(contexts) => contexts.iter().map(Context::kind).collect(),
            None => vec![self.kind()],
        }
    }
}

#[derive(Serialize)]
struct SingleKindRepr<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'a Kind>,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "is_false")]
    anonymous: bool,
    #[serde(flatten)]
    attributes: &'a HashMap<String, AttributeValue>,
}

impl<'a> SingleKindRepr<'a> {
    fn new(context: &'a Context, with_kind: bool) -> Self {
        Self {
            kind: with_kind.then_some(&context.kind),
            key: &context.key,
            name: context.name.as_deref(),
            anonymous: context.anonymous,
            attributes: &context.attributes,
        }
    }
}

impl Serialize for Context {
    /// Serializes to the JSON context shape understood by evaluation clients. Multi-contexts are
    /// written as `{"kind": "multi", "<kind>": {...}, ...}`.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.contexts {
            None => SingleKindRepr::new(self, true).serialize(serializer),
            Some(contexts) => {
                let mut map = serializer.serialize_map(Some(contexts.len() + 1))?;
                map.serialize_entry("kind", &self.kind)?;
                for context in contexts {
                    map.serialize_entry(context.kind.as_ref(), &SingleKindRepr::new(context, false))?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Kind;
    use crate::{ContextBuilder, MultiContextBuilder};
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;
        use test_case::test_case;

    #[test_case("user", true)]
    #[test_case("org", true)]
    #[test_case("device.mobile_v2-x", true)]
    #[test_case("", false)]
    #[test_case("kind", false)]
    #[test_case("multi", false)]
    #[test_case("no spaces", false)]
    fn kind_validation(kind: &str, valid: bool) {
        assert_that!(Kind::try_from(kind).is_ok()).is_equal_to(valid);
    }

    #[test]
    fn single_context_serializes_attributes_inline() {
        let context = ContextBuilder::new("user1")
            .name("Ada")
            .set_string("plan", "pro")
            .build()
            .unwrap();

        assert_json_eq!(
            serde_json::to_value(&context).unwrap(),
            json!({"kind": "user", "key": "user1", "name": "Ada", "plan": "pro"})
        );
    }

    #[test]
    fn anonymous_is_only_written_when_set() {
        let context = ContextBuilder::new("session-7")
            .kind("session")
            .anonymous(true)
            .build()
            .unwrap();

        assert_json_eq!(
            serde_json::to_value(&context).unwrap(),
            json!({"kind": "session", "key": "session-7", "anonymous": true})
        );
    }

    #[test]
    fn multi_context_serializes_per_kind() {
        let multi = MultiContextBuilder::new()
            .add_context(ContextBuilder::new("user1").build().unwrap())
            .add_context(
                ContextBuilder::new("ios-42")
                    .kind("device")
                    .set_bool("tablet", true)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        assert_json_eq!(
            serde_json::to_value(&multi).unwrap(),
            json!({
                "kind": "multi",
                "user": {"key": "user1"},
                "device": {"key": "ios-42", "tablet": true}
            })
        );
    }

    #[test]
    fn get_value_reads_builtins_and_custom_attributes() {
        let context = ContextBuilder::new("user1")
            .set_float("age", 42.0)
            .build()
            .unwrap();

        assert_that!(context.get_value("key").and_then(|v| v.as_str().map(str::to_owned)))
            .contains_value("user1".to_string());
        assert_that!(context.get_value("anonymous").and_then(|v| v.as_bool()))
            .contains_value(false);
        assert_that!(context.get_value("age").and_then(|v| v.to_f64())).contains_value(42.0);
        assert_that!(context.get_value("missing")).is_none();
    }
}
