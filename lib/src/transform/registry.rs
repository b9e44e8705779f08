use std::collections::HashSet;

/// The set of classes eligible for transformation
///
/// Built once from canonical dotted names (`com.acme.Widget`), immutable afterwards, and safe to
/// share across concurrently dispatched load events without locking.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: HashSet<String>,
}

impl TargetRegistry {
    pub fn new<I, S>(targets: I) -> TargetRegistry
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TargetRegistry {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    /// Membership test against a canonical dotted class name
    pub fn is_target(&self, class_name: &str) -> bool {
        self.targets.contains(class_name)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn membership_is_exact() {
        let registry = TargetRegistry::new(["com.acme.Widget", "com.acme.Gadget"]);
        assert!(registry.is_target("com.acme.Widget"));
        assert!(!registry.is_target("com.acme.widget"));
        assert!(!registry.is_target("com.acme.Widge"));
        assert!(!registry.is_target("com/acme/Widget"));
    }
}
