//! Structural patch operations applied to cached topic values.
//!
//! Patches never mutate their input. The root is cloned (a reference-count
//! bump) and every container on the path to the target is made unique with
//! [`Rc::make_mut`]: shared containers are shallow-copied, so siblings off
//! the path keep their identity in both the old and the new root.
//!
//! # Wire format
//!
//! ```text
//! [0, path, value]          Set
//! [1, path, key]            Delete
//! [2, path, index|null, []] Splice (null = append)
//! [3, path, index, count]   Remove
//! [4, path, {partial}]      Merge
//! ```

use std::fmt;
use std::rc::Rc;

use crate::protocol::ProtocolError;
use crate::value::{Map, Value};

/// One step of a path into a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKey {
    /// Key into an object.
    Key(String),
    /// Index into an array.
    Index(usize),
}

/// Sequence of keys from the root to a node.
pub type Path = Vec<PathKey>;

/// A single structural edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the node at `path`.
    Set {
        /// Target node.
        path: Path,
        /// Replacement value.
        value: Value,
    },
    /// Remove `key` from the object at `path`.
    Delete {
        /// Object node.
        path: Path,
        /// Key to remove.
        key: String,
    },
    /// Insert `items` into the array at `path`.
    Splice {
        /// Array node.
        path: Path,
        /// Insertion index; `None` appends.
        index: Option<usize>,
        /// Items to insert, in order.
        items: Vec<Value>,
    },
    /// Remove `count` elements from the array at `path`.
    Remove {
        /// Array node.
        path: Path,
        /// First index removed.
        index: usize,
        /// Number of elements removed.
        count: usize,
    },
    /// Shallow-merge `entries` into the object at `path`.
    Merge {
        /// Object node (absent or null becomes a fresh object).
        path: Path,
        /// Entries to overwrite or add.
        entries: Map,
    },
}

/// Failure while applying an update to a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// An object was required at this point of the path.
    ExpectedObject,
    /// An array was required at this point of the path.
    ExpectedArray,
    /// A path index does not exist in the array.
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Array length.
        len: usize,
    },
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectedObject => write!(f, "expected object"),
            Self::ExpectedArray => write!(f, "expected array"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for array of length {len}")
            }
        }
    }
}

impl std::error::Error for UpdateError {}

impl Update {
    /// Tag used on the wire for this operation.
    #[must_use]
    pub fn tag(&self) -> u64 {
        match self {
            Self::Set { .. } => 0,
            Self::Delete { .. } => 1,
            Self::Splice { .. } => 2,
            Self::Remove { .. } => 3,
            Self::Merge { .. } => 4,
        }
    }

    /// Path of the node this update targets.
    #[must_use]
    pub fn path(&self) -> &[PathKey] {
        match self {
            Self::Set { path, .. }
            | Self::Delete { path, .. }
            | Self::Splice { path, .. }
            | Self::Remove { path, .. }
            | Self::Merge { path, .. } => path,
        }
    }

    /// Parse one update from its wire array.
    pub fn from_wire(raw: &serde_json::Value) -> Result<Self, ProtocolError> {
        let parts = raw
            .as_array()
            .ok_or_else(|| ProtocolError::malformed("update is not an array"))?;
        let tag = parts
            .first()
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ProtocolError::malformed("update has no numeric tag"))?;
        let path = parse_path(parts.get(1))?;
        let arg = |i: usize| parts.get(i + 2);

        let update = match tag {
            0 => Self::Set {
                path,
                value: Value::from(arg(0).cloned().unwrap_or_default()),
            },
            1 => Self::Delete {
                path,
                key: arg(0)
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| ProtocolError::malformed("delete key is not a string"))?
                    .to_string(),
            },
            2 => {
                let index = match arg(0) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(v) => Some(as_index(v, "splice index")?),
                };
                let items = arg(1)
                    .and_then(serde_json::Value::as_array)
                    .ok_or_else(|| ProtocolError::malformed("splice items are not an array"))?
                    .iter()
                    .cloned()
                    .map(Value::from)
                    .collect();
                Self::Splice { path, index, items }
            }
            3 => Self::Remove {
                path,
                index: as_index(
                    arg(0).ok_or_else(|| ProtocolError::malformed("remove has no index"))?,
                    "remove index",
                )?,
                count: as_index(
                    arg(1).ok_or_else(|| ProtocolError::malformed("remove has no count"))?,
                    "remove count",
                )?,
            },
            4 => {
                let entries = match arg(0) {
                    Some(serde_json::Value::Object(map)) => map
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                        .collect(),
                    _ => return Err(ProtocolError::malformed("merge value is not an object")),
                };
                Self::Merge { path, entries }
            }
            other => return Err(ProtocolError::UnknownUpdate(other)),
        };
        Ok(update)
    }
}

fn as_index(raw: &serde_json::Value, what: &str) -> Result<usize, ProtocolError> {
    raw.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ProtocolError::malformed(format!("{what} is not a non-negative integer")))
}

fn parse_path(raw: Option<&serde_json::Value>) -> Result<Path, ProtocolError> {
    let keys = raw
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ProtocolError::malformed("update path is not an array"))?;
    keys.iter()
        .map(|key| match key {
            serde_json::Value::String(s) => Ok(PathKey::Key(s.clone())),
            other => as_index(other, "path index").map(PathKey::Index),
        })
        .collect()
}

/// Apply a batch of updates in order, returning the new root.
///
/// The batch is atomic: on error the input is untouched and no partial
/// result escapes.
pub fn apply_updates(root: &Value, updates: &[Update]) -> Result<Value, UpdateError> {
    let mut current = root.clone();
    for update in updates {
        apply_update(&mut current, update)?;
    }
    Ok(current)
}

/// Apply a single update in place on a value the caller owns.
///
/// Containers shared with other values are copied before being written.
pub fn apply_update(root: &mut Value, update: &Update) -> Result<(), UpdateError> {
    match update {
        Update::Set { path, value } => update_in(root, path, |node| {
            *node = value.clone();
            Ok(())
        }),
        Update::Delete { path, key } => update_in(root, path, |node| match node {
            Value::Object(map) => {
                Rc::make_mut(map).remove(key);
                Ok(())
            }
            _ => Err(UpdateError::ExpectedObject),
        }),
        Update::Splice { path, index, items } => update_in(root, path, |node| match node {
            Value::Array(list) => {
                let list = Rc::make_mut(list);
                let at = index.map_or(list.len(), |i| i.min(list.len()));
                list.splice(at..at, items.iter().cloned());
                Ok(())
            }
            _ => Err(UpdateError::ExpectedArray),
        }),
        Update::Remove { path, index, count } => update_in(root, path, |node| match node {
            Value::Array(list) => {
                let list = Rc::make_mut(list);
                let start = (*index).min(list.len());
                let end = index.saturating_add(*count).min(list.len());
                list.drain(start..end);
                Ok(())
            }
            _ => Err(UpdateError::ExpectedArray),
        }),
        Update::Merge { path, entries } => update_in(root, path, |node| {
            if node.is_null() {
                *node = Value::Object(Rc::new(entries.clone()));
                return Ok(());
            }
            let Value::Object(map) = node else {
                return Err(UpdateError::ExpectedObject);
            };
            let map = Rc::make_mut(map);
            for (k, v) in entries {
                map.insert(k.clone(), v.clone());
            }
            Ok(())
        }),
    }
}

/// Walk `path` from `node`, copying shared containers, and run `op` on the
/// target.
fn update_in<F>(node: &mut Value, path: &[PathKey], op: F) -> Result<(), UpdateError>
where
    F: FnOnce(&mut Value) -> Result<(), UpdateError>,
{
    let Some((key, rest)) = path.split_first() else {
        return op(node);
    };
    match key {
        PathKey::Index(index) => {
            let Value::Array(list) = node else {
                return Err(UpdateError::ExpectedArray);
            };
            let len = list.len();
            let child = Rc::make_mut(list)
                .get_mut(*index)
                .ok_or(UpdateError::IndexOutOfRange { index: *index, len })?;
            update_in(child, rest, op)
        }
        PathKey::Key(key) => {
            if node.is_null() {
                *node = Value::Object(Rc::new(Map::new()));
            }
            let Value::Object(map) = node else {
                return Err(UpdateError::ExpectedObject);
            };
            let child = Rc::make_mut(map).entry(key.clone()).or_default();
            update_in(child, rest, op)
        }
    }
}
