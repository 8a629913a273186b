//! Access control collaborator
//!
//! Permission evaluation is external to the core subsystems: they only see a
//! boolean decision per virtual path. The default implementation combines the
//! configured permission flags with simple path rules, which is enough to
//! gate exports over mixed-permission subtrees.

use std::sync::Arc;

use crate::config::PermissionsConfig;

/// Per-operation permission flags.
#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    pub download: bool,
    pub create: bool,
    pub modify: bool,
    pub delete: bool,
    pub rename: bool,
}

impl From<&PermissionsConfig> for Permissions {
    fn from(cfg: &PermissionsConfig) -> Self {
        Permissions {
            download: cfg.download,
            create: cfg.create,
            modify: cfg.modify,
            delete: cfg.delete,
            rename: cfg.rename,
        }
    }
}

/// Boolean per-path access decision.
///
/// `check` receives a cleaned virtual path (always starting with `/`).
/// Returning `false` for a directory hides its entire subtree from listings
/// and archive exports.
pub trait AccessCheck: Send + Sync {
    fn check(&self, vpath: &str) -> bool;
}

/// Path rule: the most specific matching rule wins; `allow` decides.
#[derive(Debug, Clone)]
pub struct Rule {
    pub path: String,
    pub allow: bool,
}

/// Rule-based access policy.
pub struct AccessPolicy {
    rules: Vec<Rule>,
}

impl AccessPolicy {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Everything allowed.
    pub fn allow_all() -> Arc<dyn AccessCheck> {
        Arc::new(AccessPolicy::new(Vec::new()))
    }
}

impl AccessCheck for AccessPolicy {
    fn check(&self, vpath: &str) -> bool {
        let mut decision = true;
        let mut best_len = 0;

        for rule in &self.rules {
            let matches = vpath == rule.path
                || vpath.starts_with(&format!("{}/", rule.path.trim_end_matches('/')))
                || rule.path == "/";
            if matches && rule.path.len() >= best_len {
                best_len = rule.path.len();
                decision = rule.allow;
            }
        }

        decision
    }
}
