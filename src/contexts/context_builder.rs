use super::context::{Context, Kind};
use crate::AttributeValue;
use itertools::Itertools;
use log::warn;

use std::collections::HashMap;

const DEFAULT_MULTI_BUILDER_CAPACITY: usize = 3; // arbitrary value based on presumed likely use cases

/// Contains methods for building a [Context] with a specified key.
///
/// To define a multi-context (containing more than one kind) see [MultiContextBuilder].
///
/// If you do not change any values, the defaults for the [Context] are:
/// - its kind is "user"
/// - its key is set to whatever value you passed to [ContextBuilder::new]
/// - its [anonymous attribute](ContextBuilder::anonymous) is `false`
/// - it has no values for any other attributes.
pub struct ContextBuilder {
    kind: String,
    name: Option<String>,
    anonymous: bool,
    key: String,
    attributes: HashMap<String, AttributeValue>,
}

impl ContextBuilder {
    /// Create a new context builder with the provided "key" attribute.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            kind: "user".to_owned(),
            name: None,
            anonymous: false,
            key: key.into(),
            attributes: HashMap::new(),
        }
    }

    /// Sets the context's "kind" attribute, which is "user" by default.
    ///
    /// If the value is invalid, you will receive an error when [ContextBuilder::build] is called.
    /// See [Kind::try_from] for the rules.
    pub fn kind(&mut self, kind: impl Into<String>) -> &mut Self {
        self.kind = kind.into();
        self
    }

    /// Sets the context's key attribute. The provided key cannot be an empty string.
    pub fn key(&mut self, key: impl Into<String>) -> &mut Self {
        self.key = key.into();
        self
    }

    /// Sets the context's "name" attribute.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Sets whether the context is only intended for flag evaluations and should not be indexed by
    /// the evaluation service.
    pub fn anonymous(&mut self, value: bool) -> &mut Self {
        self.anonymous = value;
        self
    }

    /// Sets an attribute to a boolean value.
    pub fn set_bool(&mut self, attribute_name: &str, value: bool) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Bool(value))
    }

    /// Sets an attribute to a f64 numeric value.
    pub fn set_float(&mut self, attribute_name: &str, value: f64) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Number(value))
    }

    /// Sets an attribute to a string value.
    pub fn set_string(&mut self, attribute_name: &str, value: impl Into<String>) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::String(value.into()))
    }

    /// Sets the value of any attribute for the context.
    ///
    /// The built-in attributes have type restrictions; values of an unsupported type are ignored
    /// and leave the attribute unchanged:
    ///
    /// - "kind", "key": must be a string.
    /// - "name": must be a string or null.
    /// - "anonymous": must be a boolean.
    ///
    /// Setting any other attribute to [AttributeValue::Null] removes it.
    pub fn set_value(&mut self, attribute_name: &str, value: AttributeValue) -> &mut Self {
        match (attribute_name, value) {
            ("kind", AttributeValue::String(s)) => {
                self.kind(s);
            }
            ("key", AttributeValue::String(s)) => {
                self.key(s);
            }
            ("name", AttributeValue::String(s)) => {
                self.name(s);
            }
            ("name", AttributeValue::Null) => self.name = None,
            ("anonymous", AttributeValue::Bool(b)) => {
                self.anonymous(b);
            }
            ("kind" | "key" | "name" | "anonymous", value) => {
                warn!(
                    "ignoring value {:?} of unsupported type for attribute {}",
                    value, attribute_name
                );
            }
            (_, AttributeValue::Null) => {
                self.attributes.remove(attribute_name);
            }
            (_, value) => {
                self.attributes.insert(attribute_name.to_owned(), value);
            }
        }
        self
    }

    /// Creates a context from the current builder's properties.
    ///
    /// The context is immutable and will not be affected by any subsequent actions on the builder.
    pub fn build(&self) -> Result<Context, String> {
        let kind = Kind::try_from(self.kind.as_str())?;

        if self.key.is_empty() {
            return Err(String::from("context key cannot be empty"));
        }

        let canonical_key = canonical_key_for_kind(&kind, &self.key, true);

        Ok(Context {
            kind,
            contexts: None,
            name: self.name.clone(),
            anonymous: self.anonymous,
            canonical_key,
            attributes: self.attributes.clone(),
            key: self.key.clone(),
        })
    }
}

fn canonical_key_for_kind(kind: &Kind, key: &str, omit_user_kind: bool) -> String {
    if omit_user_kind && kind.is_user() {
        return key.to_owned();
    }
    format!("{}:{}", kind, key.replace('%', "%25").replace(':', "%3A"))
}

/// Contains methods for building a multi-context.
///
/// Use this type if you need to construct a context that has multiple kinds, each representing
/// their own [Context]. Otherwise, use [ContextBuilder].
pub struct MultiContextBuilder {
    contexts: Vec<Context>,
}

impl MultiContextBuilder {
    /// Create a new multi-context builder. An empty builder would create an invalid [Context]; you
    /// must add one or more kinds via [MultiContextBuilder::add_context] before calling
    /// [MultiContextBuilder::build].
    pub fn new() -> Self {
        Self {
            contexts: Vec::with_capacity(DEFAULT_MULTI_BUILDER_CAPACITY),
        }
    }

    /// Create a new multi-context builder from the given vector of contexts.
    pub fn of(contexts: Vec<Context>) -> Self {
        let mut this = MultiContextBuilder::new();
        for c in contexts {
            this.add_context(c);
        }
        this
    }

    /// Adds a context to the multi-context builder.
    ///
    /// If a multi-context is added, its individual kinds are added instead. Adding the same kind
    /// twice makes [MultiContextBuilder::build] fail.
    pub fn add_context(&mut self, context: Context) -> &mut Self {
        match context.contexts {
            Some(contexts) => self.contexts.extend(contexts),
            None => self.contexts.push(context),
        }
        self
    }

    /// Creates a context from the builder's current properties.
    ///
    /// If exactly one context was added, that context is returned as-is.
    pub fn build(&self) -> Result<Context, String> {
        if self.contexts.is_empty() {
            return Err("multi-kind context must contain at least one nested context".into());
        }

        if self.contexts.len() == 1 {
            return Ok(self.contexts[0].clone());
        }

        if !self.contexts.iter().map(Context::kind).all_unique() {
            return Err("multi-kind context cannot have same kind more than once".into());
        }

        let mut contexts = self.contexts.clone();
        contexts.sort_by(|a, b| a.kind.cmp(&b.kind));

        let canonical_key = contexts
            .iter()
            .map(|context| canonical_key_for_kind(context.kind(), context.key(), false))
            .join(":");

        Ok(Context {
            kind: Kind::multi(),
            contexts: Some(contexts),
            name: None,
            anonymous: false,
            canonical_key,
            attributes: HashMap::new(),
            key: "".to_owned(),
        })
    }
}

impl Default for MultiContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
