//! Named generators and groups.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::generator::{Generator, WeakGenerator};

#[derive(Default)]
struct RegistryInner {
    generators: HashMap<String, WeakGenerator>,
    groups: HashMap<String, Vec<WeakGenerator>>,
}

/// Maps names to generators and group names to their members.
///
/// A cheap handle: clones share the same tables. Only weak references are
/// kept, so a dropped generator disappears from lookups.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `generator` under `name`, replacing any previous entry.
    pub fn register_generator(&self, name: impl Into<String>, generator: &Generator) {
        let name = name.into();
        let previous = self
            .inner
            .borrow_mut()
            .generators
            .insert(name.clone(), generator.downgrade());
        if previous.is_some_and(|p| p.upgrade().is_some()) {
            warn!(name = %name, "generator_name_overwritten");
        }
        debug!(name = %name, "generator_registered");
    }

    pub fn generator(&self, name: &str) -> Option<Generator> {
        self.inner
            .borrow()
            .generators
            .get(name)
            .and_then(WeakGenerator::upgrade)
    }

    /// Add `generator` to `group`.
    pub fn register_group(&self, group: impl Into<String>, generator: &Generator) {
        let group = group.into();
        let mut inner = self.inner.borrow_mut();
        let members = inner.groups.entry(group.clone()).or_default();
        members.retain(|m| m.upgrade().is_some());
        if !members.iter().any(|m| m.points_to(generator)) {
            members.push(generator.downgrade());
        }
        debug!(group = %group, members = members.len(), "group_member_registered");
    }

    /// Live members of `group`, in registration order.
    pub fn group(&self, group: &str) -> Vec<Generator> {
        self.inner
            .borrow()
            .groups
            .get(group)
            .map(|members| members.iter().filter_map(WeakGenerator::upgrade).collect())
            .unwrap_or_default()
    }

    /// Registered names with a live generator, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        let mut names: Vec<String> = inner
            .generators
            .iter()
            .filter(|(_, g)| g.upgrade().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.generators.clear();
        inner.groups.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let mut groups: Vec<_> = inner.groups.keys().collect();
        groups.sort();
        f.debug_struct("Registry")
            .field("generators", &self.names())
            .field("groups", &groups)
            .finish()
    }
}
