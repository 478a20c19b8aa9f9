use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capability policy for tools calling into the sandbox.
///
/// Permission names are the upper-case identifiers (`READ_FILES`,
/// `NETWORK_ACCESS`, ...); they are checked when the permission manager is
/// built.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PermissionsConfig {
    /// Policy for tools without their own entry
    #[serde(default)]
    pub default_policy: PermissionPolicy,

    /// Per-tool overrides keyed by tool name
    #[serde(default)]
    pub tools: BTreeMap<String, ToolPermissionsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ToolPermissionsConfig {
    /// Starting point; falls back to the default policy
    #[serde(default)]
    pub policy: Option<PermissionPolicy>,

    #[serde(default)]
    pub allow: Vec<String>,

    /// Applied after `allow`
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Canned permission sets, from least to most privileged.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    #[default]
    Restricted,
    Standard,
    Elevated,
    Admin,
}
