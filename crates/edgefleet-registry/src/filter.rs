use crate::node::{Node, Role};

/// Declarative node selection used to scope operations, e.g. "all GPU nodes"
/// or "all except legacy".
///
/// Empty criteria match everything. When several criteria are set a node must
/// satisfy all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
  pub names: Vec<String>,
  pub roles: Vec<Role>,
  pub exclude_roles: Vec<Role>,
  pub capabilities: Vec<String>,
}

impl NodeFilter {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
      ..Self::default()
    }
  }

  pub fn role(mut self, role: impl Into<Role>) -> Self {
    self.roles.push(role.into());
    self
  }

  pub fn exclude_role(mut self, role: impl Into<Role>) -> Self {
    self.exclude_roles.push(role.into());
    self
  }

  pub fn capability(mut self, capability: impl Into<String>) -> Self {
    self.capabilities.push(capability.into());
    self
  }

  pub fn matches(&self, node: &Node) -> bool {
    (self.names.is_empty() || self.names.iter().any(|n| *n == node.name))
      && (self.roles.is_empty() || self.roles.contains(&node.role))
      && !self.exclude_roles.contains(&node.role)
      && self.capabilities.iter().all(|c| node.has_capability(c))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capability::HAS_GPU;

  #[test]
  fn test_empty_filter_matches_everything() {
    let node = Node::new("pi31", "192.168.1.234", "legacy");
    assert!(NodeFilter::all().matches(&node));
  }

  #[test]
  fn test_criteria_are_conjunctive() {
    let agx = Node::new("agx0", "192.168.1.154", "primary-ai").with_capability(HAS_GPU);
    let pi = Node::new("pi51", "192.168.1.147", "gateway");

    let gpu_ai = NodeFilter::all().role("primary-ai").capability(HAS_GPU);
    assert!(gpu_ai.matches(&agx));
    assert!(!gpu_ai.matches(&pi));

    let not_gateway = NodeFilter::all().exclude_role("gateway");
    assert!(not_gateway.matches(&agx));
    assert!(!not_gateway.matches(&pi));
  }
}
