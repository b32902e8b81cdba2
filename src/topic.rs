//! Topic identities.
//!
//! A [`TopicSpec`] may still have undefined parts (a segment or parameter
//! the caller does not know yet). Only a fully defined [`Topic`] is ever sent
//! on the wire; [`TopicSpec::resolve`] performs that readiness check.
//!
//! Two identities that differ only in parameter insertion order map to the
//! same [`TopicKey`].

use std::collections::BTreeMap;
use std::fmt;

use crate::session::SessionError;

/// Canonical identity of a topic, used to deduplicate subscriptions.
///
/// Percent-encoded segments joined with `/`, then `?`, then the parameters
/// sorted by name as `name=value` pairs joined with `&`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey(String);

impl TopicKey {
    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully defined topic: non-empty segments plus string parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    segments: Vec<String>,
    params: BTreeMap<String, String>,
}

impl Topic {
    /// Build a topic from its path segments.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTopic`] if any segment is empty.
    pub fn new<I, S>(segments: I) -> Result<Self, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicSpec::new(segments).resolve()
    }

    /// Add or replace a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Parameters, sorted by name.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Canonical identity key.
    #[must_use]
    pub fn key(&self) -> TopicKey {
        identity_key(
            self.segments.iter().map(|s| Some(s.as_str())),
            self.params.iter().map(|(k, v)| (k.as_str(), Some(v.as_str()))),
        )
    }

    pub(crate) fn segments_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.segments.clone())
    }

    /// Parameters as a JSON object, or `None` when there are none.
    pub(crate) fn params_json(&self) -> Option<serde_json::Value> {
        if self.params.is_empty() {
            return None;
        }
        Some(serde_json::Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        ))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "?{}", params.join("&"))?;
        }
        Ok(())
    }
}

/// A topic that may still contain undefined segments or parameter values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSpec {
    segments: Vec<Option<String>>,
    params: BTreeMap<String, Option<String>>,
}

impl TopicSpec {
    /// Spec with every segment defined.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_parts(segments.into_iter().map(|s| Some(s.into())))
    }

    /// Spec whose segments may be undefined (`None`).
    pub fn from_parts<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        Self {
            segments: segments.into_iter().collect(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter whose value may be undefined.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Whether every segment and parameter value is defined.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.segments.iter().all(Option::is_some) && self.params.values().all(Option::is_some)
    }

    /// Identity key. Undefined parts are written as `*`, which never occurs
    /// in a percent-encoded defined part, so an undefined value and an empty
    /// one produce different keys.
    #[must_use]
    pub fn identity_key(&self) -> TopicKey {
        identity_key(
            self.segments.iter().map(Option::as_deref),
            self.params.iter().map(|(k, v)| (k.as_str(), v.as_deref())),
        )
    }

    /// Validate and convert into a [`Topic`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTopic`] naming the first undefined or
    /// empty part.
    pub fn resolve(&self) -> Result<Topic, SessionError> {
        let mut segments = Vec::with_capacity(self.segments.len());
        for (i, segment) in self.segments.iter().enumerate() {
            match segment.as_deref() {
                None => {
                    return Err(SessionError::InvalidTopic(format!(
                        "topic segment {i} is undefined"
                    )))
                }
                Some("") => {
                    return Err(SessionError::InvalidTopic(format!("topic segment {i} is empty")))
                }
                Some(s) => segments.push(s.to_string()),
            }
        }

        let mut params = BTreeMap::new();
        for (name, value) in &self.params {
            let value = value.as_ref().ok_or_else(|| {
                SessionError::InvalidTopic(format!("topic parameter `{name}` is undefined"))
            })?;
            params.insert(name.clone(), value.clone());
        }

        Ok(Topic { segments, params })
    }
}

impl From<Topic> for TopicSpec {
    fn from(topic: Topic) -> Self {
        Self {
            segments: topic.segments.into_iter().map(Some).collect(),
            params: topic.params.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }
}

impl From<&Topic> for TopicSpec {
    fn from(topic: &Topic) -> Self {
        Self::from(topic.clone())
    }
}

impl<const N: usize> From<[&str; N]> for TopicSpec {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl From<&[&str]> for TopicSpec {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

impl From<Vec<String>> for TopicSpec {
    fn from(segments: Vec<String>) -> Self {
        Self::new(segments)
    }
}

/// Key marker for an undefined part.
const UNDEFINED: &str = "*";

fn encode_part(part: Option<&str>) -> String {
    part.map_or_else(|| UNDEFINED.to_string(), |s| urlencoding::encode(s).into_owned())
}

fn identity_key<'a>(
    segments: impl Iterator<Item = Option<&'a str>>,
    params: impl Iterator<Item = (&'a str, Option<&'a str>)>,
) -> TopicKey {
    let path: Vec<String> = segments.map(encode_part).collect();
    let mut pairs: Vec<(&str, Option<&str>)> = params.collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let query: Vec<String> = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), encode_part(v)))
        .collect();
    TopicKey(format!("{}?{}", path.join("/"), query.join("&")))
}
