use crate::graph::{canonical_domain, OpId};
use crate::inference::InferenceRule;
use crate::kernels::Kernel;
use log::debug;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No kernel for operator {op_type} in domain \"{domain}\" at opset version {version}")]
pub struct UnsupportedOperatorError {
    pub op_type: String,
    pub domain: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Registering {op_type} in domain \"{domain}\" for versions {requested} overlaps existing versions {existing}")]
    RegistrationConflict {
        op_type: String,
        domain: String,
        existing: VersionRange,
        requested: VersionRange,
    },
    #[error("The global operator registry is already initialized")]
    AlreadyInitialized,
}

/// Inclusive range of opset versions, `since..=until`, open ended when `until` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub since: i64,
    pub until: Option<i64>,
}

impl VersionRange {
    pub fn from(since: i64) -> Self {
        Self { since, until: None }
    }

    pub fn between(since: i64, until: i64) -> Self {
        Self {
            since,
            until: Some(until),
        }
    }

    pub fn contains(&self, version: i64) -> bool {
        version >= self.since && self.until.is_none_or(|until| version <= until)
    }

    pub fn overlaps(&self, other: &VersionRange) -> bool {
        let self_before = self.until.is_some_and(|until| until < other.since);
        let other_before = other.until.is_some_and(|until| until < self.since);
        !self_before && !other_before
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.until {
            Some(until) => write!(f, "{}..={}", self.since, until),
            None => write!(f, "{}..", self.since),
        }
    }
}

pub struct OperatorEntry {
    versions: VersionRange,
    inference: Arc<dyn InferenceRule>,
    kernel: Arc<dyn Kernel>,
}

impl OperatorEntry {
    pub fn versions(&self) -> VersionRange {
        self.versions
    }

    pub fn inference(&self) -> &dyn InferenceRule {
        self.inference.as_ref()
    }

    pub fn kernel(&self) -> &dyn Kernel {
        self.kernel.as_ref()
    }
}

impl std::fmt::Debug for OperatorEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorEntry").field("versions", &self.versions).finish_non_exhaustive()
    }
}

/// Maps `(op_type, domain)` to kernels and inference rules over disjoint version ranges.
///
/// A registry is populated mutably and then shared read-only behind an `Arc`.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    entries: HashMap<(String, String), Vec<OperatorEntry>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in operator set.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::kernels::register_builtins(&mut registry)?;
        debug!("Registered {} built-in operator versions", registry.len());
        Ok(registry)
    }

    pub fn register(
        &mut self,
        op_type: &str,
        domain: &str,
        versions: VersionRange,
        inference: impl InferenceRule + 'static,
        kernel: impl Kernel + 'static,
    ) -> Result<(), RegistryError> {
        let domain = canonical_domain(domain).to_string();
        let list = self.entries.entry((op_type.to_string(), domain.clone())).or_default();
        if let Some(existing) = list.iter().find(|e| e.versions.overlaps(&versions)) {
            return Err(RegistryError::RegistrationConflict {
                op_type: op_type.to_string(),
                domain,
                existing: existing.versions,
                requested: versions,
            });
        }
        list.push(OperatorEntry {
            versions,
            inference: Arc::new(inference),
            kernel: Arc::new(kernel),
        });
        list.sort_by_key(|e| e.versions.since);
        Ok(())
    }

    /// Selects the entry with the highest starting version not above `version`, provided its
    /// upper bound admits `version`.
    pub fn lookup(&self, op_type: &str, domain: &str, version: i64) -> Result<&OperatorEntry, UnsupportedOperatorError> {
        let domain = canonical_domain(domain);
        let unsupported = || UnsupportedOperatorError {
            op_type: op_type.to_string(),
            domain: domain.to_string(),
            version,
        };
        let list = self
            .entries
            .get(&(op_type.to_string(), domain.to_string()))
            .ok_or_else(unsupported)?;
        let entry = list.iter().rev().find(|e| e.versions.since <= version).ok_or_else(unsupported)?;
        if entry.versions.contains(version) { Ok(entry) } else { Err(unsupported()) }
    }

    pub fn lookup_op(&self, op: &OpId) -> Result<&OperatorEntry, UnsupportedOperatorError> {
        self.lookup(&op.op_type, &op.domain, op.version)
    }

    /// Number of registered `(operator, version range)` pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered operators as `(op_type, domain, versions)`, sorted.
    pub fn operators(&self) -> Vec<(&str, &str, VersionRange)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .flat_map(|((op, domain), list)| list.iter().map(move |e| (op.as_str(), domain.as_str(), e.versions)))
            .collect();
        out.sort_by_key(|(op, domain, v)| (*domain, *op, v.since));
        out
    }
}

static GLOBAL: OnceLock<Arc<OperatorRegistry>> = OnceLock::new();

/// The process-wide registry, initialized with the built-in operators on first use unless
/// [`install_global`] ran first.
pub fn global() -> Result<Arc<OperatorRegistry>, RegistryError> {
    if let Some(registry) = GLOBAL.get() {
        return Ok(registry.clone());
    }
    let registry = Arc::new(OperatorRegistry::with_builtins()?);
    Ok(GLOBAL.get_or_init(|| registry).clone())
}

/// Installs `registry` as the process-wide registry. Only the first installation succeeds.
pub fn install_global(registry: OperatorRegistry) -> Result<Arc<OperatorRegistry>, RegistryError> {
    let registry = Arc::new(registry);
    GLOBAL.set(registry.clone()).map_err(|_| RegistryError::AlreadyInitialized)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_overlap_inclusively() {
        assert!(VersionRange::between(1, 12).overlaps(&VersionRange::between(12, 13)));
        assert!(!VersionRange::between(1, 12).overlaps(&VersionRange::from(13)));
        assert!(VersionRange::from(5).overlaps(&VersionRange::from(1)));
        assert!(VersionRange::between(1, 12).contains(12));
        assert!(!VersionRange::between(1, 12).contains(13));
    }
}
