//! Reconciliation of two named collections.
//!
//! # Design
//! - Pure: callers receive callbacks and decide what each transition means.
//! - Every old key is visited exactly once; exits are reported after all
//!   enters and updates.

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

use spyglass_config::{ClusterConfig, DataCubeConfig};

/// Failure raised while indexing the previous collection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    /// Two items in the previous collection share a key.
    #[error("duplicate key '{key}' in previous collection")]
    DuplicateKey {
        /// Rendered key.
        key: String,
    },
}

/// Items addressable by a unique name.
pub trait Named {
    /// Unique name of the item.
    fn name(&self) -> &str;
}

impl Named for ClusterConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for DataCubeConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Callbacks invoked by [`reconcile`].
pub trait DiffHandler<'a, T> {
    /// Item present only in the new collection.
    fn on_enter(&mut self, new: &'a T);
    /// Item present in both collections but not equal.
    fn on_update(&mut self, new: &'a T, old: &'a T);
    /// Item present only in the old collection.
    fn on_exit(&mut self, old: &'a T);
}

/// Reconcile `old` against `new` with explicit key and equality functions.
///
/// # Errors
///
/// Returns [`DiffError::DuplicateKey`] when two `old` items share a key. No
/// callback runs in that case.
pub fn reconcile<'a, T, K, H>(
    old: &'a [T],
    new: &'a [T],
    key_of: impl Fn(&T) -> K,
    equals: impl Fn(&T, &T) -> bool,
    handler: &mut H,
) -> Result<(), DiffError>
where
    K: Eq + Hash + ToString,
    H: DiffHandler<'a, T>,
{
    let mut index: HashMap<K, &'a T> = HashMap::with_capacity(old.len());
    for item in old {
        let key = key_of(item);
        if index.contains_key(&key) {
            return Err(DiffError::DuplicateKey {
                key: key.to_string(),
            });
        }
        index.insert(key, item);
    }

    for item in new {
        match index.remove(&key_of(item)) {
            None => handler.on_enter(item),
            Some(previous) if !equals(item, previous) => handler.on_update(item, previous),
            Some(_) => {}
        }
    }

    for item in old {
        if index.remove(&key_of(item)).is_some() {
            handler.on_exit(item);
        }
    }
    Ok(())
}

/// Transitions collected by [`diff`].
#[derive(Debug)]
pub struct Changes<'a, T> {
    /// Items only in the new collection, in new order.
    pub entered: Vec<&'a T>,
    /// `(new, old)` pairs that differ, in new order.
    pub updated: Vec<(&'a T, &'a T)>,
    /// Items only in the old collection, in old order.
    pub exited: Vec<&'a T>,
}

impl<T> Default for Changes<'_, T> {
    fn default() -> Self {
        Self {
            entered: Vec::new(),
            updated: Vec::new(),
            exited: Vec::new(),
        }
    }
}

impl<T> Changes<'_, T> {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.updated.is_empty() && self.exited.is_empty()
    }
}

impl<'a, T> DiffHandler<'a, T> for Changes<'a, T> {
    fn on_enter(&mut self, new: &'a T) {
        self.entered.push(new);
    }

    fn on_update(&mut self, new: &'a T, old: &'a T) {
        self.updated.push((new, old));
    }

    fn on_exit(&mut self, old: &'a T) {
        self.exited.push(old);
    }
}

/// Reconcile named items using their name as key and `PartialEq` as equality.
///
/// # Errors
///
/// Returns [`DiffError::DuplicateKey`] when two `old` items share a name.
pub fn diff<'a, T>(old: &'a [T], new: &'a [T]) -> Result<Changes<'a, T>, DiffError>
where
    T: Named + PartialEq,
{
    let mut changes = Changes::default();
    reconcile(
        old,
        new,
        |item| item.name().to_string(),
        |a, b| a == b,
        &mut changes,
    )?;
    Ok(changes)
}
