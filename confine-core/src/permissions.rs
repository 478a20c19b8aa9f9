//! Capability gating for tools that call into the sandbox.
//!
//! A `PermissionManager` holds a default `PermissionSet` and optional per-tool
//! sets. A tool with its own set is judged only by that set; every other tool
//! falls back to the default. Nothing here is enforced by the OS: the hosting
//! application asks before it acts.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use confine_config::{PermissionPolicy, PermissionsConfig};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ReadFiles,
    WriteFiles,
    ExecuteFiles,
    NetworkAccess,
    OutboundConnections,
    InboundConnections,
    CreateProcesses,
    KillProcesses,
    ReadEnvironment,
    ModifyEnvironment,
    UseTools,
    ModifyTools,
    BypassSandbox,
    ModifySandbox,
}

impl Permission {
    pub const ALL: [Permission; 14] = [
        Permission::ReadFiles,
        Permission::WriteFiles,
        Permission::ExecuteFiles,
        Permission::NetworkAccess,
        Permission::OutboundConnections,
        Permission::InboundConnections,
        Permission::CreateProcesses,
        Permission::KillProcesses,
        Permission::ReadEnvironment,
        Permission::ModifyEnvironment,
        Permission::UseTools,
        Permission::ModifyTools,
        Permission::BypassSandbox,
        Permission::ModifySandbox,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadFiles => "READ_FILES",
            Self::WriteFiles => "WRITE_FILES",
            Self::ExecuteFiles => "EXECUTE_FILES",
            Self::NetworkAccess => "NETWORK_ACCESS",
            Self::OutboundConnections => "OUTBOUND_CONNECTIONS",
            Self::InboundConnections => "INBOUND_CONNECTIONS",
            Self::CreateProcesses => "CREATE_PROCESSES",
            Self::KillProcesses => "KILL_PROCESSES",
            Self::ReadEnvironment => "READ_ENVIRONMENT",
            Self::ModifyEnvironment => "MODIFY_ENVIRONMENT",
            Self::UseTools => "USE_TOOLS",
            Self::ModifyTools => "MODIFY_TOOLS",
            Self::BypassSandbox => "BYPASS_SANDBOX",
            Self::ModifySandbox => "MODIFY_SANDBOX",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    /// Accepts the canonical names case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Permission::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// A missing capability, naming the permission and the tool that lacked it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Permission '{permission}' required{}",
    .tool.as_ref().map(|tool| format!(" for tool '{tool}'")).unwrap_or_default()
)]
pub struct PermissionDenied {
    pub permission: Permission,
    pub tool: Option<String>,
}

impl PermissionDenied {
    pub fn new(permission: Permission, tool: Option<&str>) -> Self {
        Self {
            permission,
            tool: tool.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: BTreeSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    /// Read-only access to files and the environment.
    pub fn restricted() -> Self {
        [Permission::ReadFiles, Permission::ReadEnvironment]
            .into_iter()
            .collect()
    }

    pub fn standard() -> Self {
        let mut set = Self::restricted();
        set.extend([
            Permission::WriteFiles,
            Permission::ExecuteFiles,
            Permission::CreateProcesses,
            Permission::UseTools,
        ]);
        set
    }

    pub fn elevated() -> Self {
        let mut set = Self::standard();
        set.extend([
            Permission::NetworkAccess,
            Permission::OutboundConnections,
            Permission::KillProcesses,
            Permission::ModifyEnvironment,
            Permission::ModifyTools,
        ]);
        set
    }

    pub fn admin() -> Self {
        Self::all()
    }

    pub fn for_policy(policy: PermissionPolicy) -> Self {
        match policy {
            PermissionPolicy::Restricted => Self::restricted(),
            PermissionPolicy::Standard => Self::standard(),
            PermissionPolicy::Elevated => Self::elevated(),
            PermissionPolicy::Admin => Self::admin(),
        }
    }

    pub fn add(&mut self, permission: Permission) {
        self.permissions.insert(permission);
    }

    pub fn remove(&mut self, permission: Permission) {
        self.permissions.remove(&permission);
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn clear(&mut self) {
        self.permissions.clear();
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.permissions.iter().copied()
    }

    pub fn to_list(&self) -> Vec<String> {
        self.iter().map(|p| p.name().to_string()).collect()
    }

    /// Names that do not parse are skipped.
    pub fn from_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| name.as_ref().parse().ok())
            .collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self {
            permissions: iter.into_iter().collect(),
        }
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<T: IntoIterator<Item = Permission>>(&mut self, iter: T) {
        self.permissions.extend(iter);
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermissionSet({})", self.to_list().join(", "))
    }
}

#[derive(Debug, Default)]
struct PermissionTable {
    default: PermissionSet,
    tools: HashMap<String, PermissionSet>,
}

/// Default and per-tool permission sets. Share it behind an `Arc`; all
/// methods take `&self`.
#[derive(Debug)]
pub struct PermissionManager {
    table: RwLock<PermissionTable>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::restricted()
    }
}

impl PermissionManager {
    pub fn new(default: PermissionSet) -> Self {
        Self {
            table: RwLock::new(PermissionTable {
                default,
                tools: HashMap::new(),
            }),
        }
    }

    pub fn restricted() -> Self {
        Self::new(PermissionSet::restricted())
    }

    pub fn standard() -> Self {
        Self::new(PermissionSet::standard())
    }

    pub fn elevated() -> Self {
        Self::new(PermissionSet::elevated())
    }

    pub fn admin() -> Self {
        Self::new(PermissionSet::admin())
    }

    /// Build from configuration. Unlike `PermissionSet::from_list`, unknown
    /// names are rejected here so typos in a policy file surface early.
    pub fn from_config(config: &PermissionsConfig) -> Result<Self, UnknownPermission> {
        let manager = Self::new(PermissionSet::for_policy(config.default_policy));
        for (tool, entry) in &config.tools {
            let mut set = PermissionSet::for_policy(entry.policy.unwrap_or(config.default_policy));
            for name in &entry.allow {
                set.add(name.parse()?);
            }
            for name in &entry.deny {
                set.remove(name.parse()?);
            }
            manager.set_tool_permissions(tool.clone(), set);
        }
        Ok(manager)
    }

    pub fn default_permissions(&self) -> PermissionSet {
        self.table.read().default.clone()
    }

    pub fn set_default_permissions(&self, permissions: PermissionSet) {
        self.table.write().default = permissions;
    }

    pub fn tool_permissions(&self, tool: &str) -> Option<PermissionSet> {
        self.table.read().tools.get(tool).cloned()
    }

    pub fn set_tool_permissions(&self, tool: impl Into<String>, permissions: PermissionSet) {
        self.table.write().tools.insert(tool.into(), permissions);
    }

    pub fn remove_tool_permissions(&self, tool: &str) -> Option<PermissionSet> {
        self.table.write().tools.remove(tool)
    }

    pub fn check_permission(&self, permission: Permission, tool: Option<&str>) -> bool {
        let table = self.table.read();
        match tool.and_then(|name| table.tools.get(name)) {
            Some(set) => set.has(permission),
            None => table.default.has(permission),
        }
    }

    pub fn require_permission(
        &self,
        permission: Permission,
        tool: Option<&str>,
    ) -> Result<(), PermissionDenied> {
        if self.check_permission(permission, tool) {
            Ok(())
        } else {
            Err(PermissionDenied::new(permission, tool))
        }
    }

    /// Fails on the first missing permission, in iteration order.
    pub fn require_all(
        &self,
        permissions: impl IntoIterator<Item = Permission>,
        tool: Option<&str>,
    ) -> Result<(), PermissionDenied> {
        permissions
            .into_iter()
            .try_for_each(|permission| self.require_permission(permission, tool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confine_config::ToolPermissionsConfig;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn presets_are_nested() {
        let restricted = PermissionSet::restricted();
        let standard = PermissionSet::standard();
        let elevated = PermissionSet::elevated();
        let admin = PermissionSet::admin();

        assert!(restricted.iter().all(|p| standard.has(p)));
        assert!(standard.iter().all(|p| elevated.has(p)));
        assert!(elevated.iter().all(|p| admin.has(p)));
        assert_eq!(admin.len(), Permission::ALL.len());
        assert!(!elevated.has(Permission::BypassSandbox));
        assert!(!standard.has(Permission::NetworkAccess));
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("network_access".parse::<Permission>(), Ok(Permission::NetworkAccess));
        assert_eq!("READ_FILES".parse::<Permission>(), Ok(Permission::ReadFiles));
        assert!("TELEPORT".parse::<Permission>().is_err());
    }

    #[test]
    fn from_list_skips_unknown_names() {
        let set = PermissionSet::from_list(["READ_FILES", "bogus", "use_tools"]);
        assert_eq!(set.to_list(), vec!["READ_FILES".to_string(), "USE_TOOLS".to_string()]);
    }

    #[test]
    fn set_operations() {
        let mut set = PermissionSet::new();
        set.add(Permission::KillProcesses);
        set.add(Permission::KillProcesses);
        assert_eq!(set.len(), 1);
        set.remove(Permission::KillProcesses);
        assert!(set.is_empty());
        set.extend([Permission::ReadFiles, Permission::WriteFiles]);
        assert_eq!(set.to_string(), "PermissionSet(READ_FILES, WRITE_FILES)");
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn tool_override_replaces_default() {
        let manager = PermissionManager::standard();
        manager.set_tool_permissions("reader", PermissionSet::restricted());

        assert!(manager.check_permission(Permission::WriteFiles, None));
        assert!(manager.check_permission(Permission::WriteFiles, Some("other")));
        assert!(!manager.check_permission(Permission::WriteFiles, Some("reader")));

        let err = manager
            .require_permission(Permission::WriteFiles, Some("reader"))
            .expect_err("reader cannot write");
        assert_eq!(err.to_string(), "Permission 'WRITE_FILES' required for tool 'reader'");

        assert!(manager.remove_tool_permissions("reader").is_some());
        assert!(manager.check_permission(Permission::WriteFiles, Some("reader")));
    }

    #[test]
    fn default_manager_is_restricted() {
        let manager = PermissionManager::default();
        assert_eq!(manager.default_permissions(), PermissionSet::restricted());
        assert!(manager.require_permission(Permission::ReadFiles, None).is_ok());
        assert!(manager.require_permission(Permission::CreateProcesses, None).is_err());
    }

    #[test]
    fn config_builds_tool_overrides() {
        let mut config = PermissionsConfig {
            default_policy: PermissionPolicy::Standard,
            ..PermissionsConfig::default()
        };
        config.tools.insert(
            "fetcher".into(),
            ToolPermissionsConfig {
                policy: Some(PermissionPolicy::Restricted),
                allow: vec!["NETWORK_ACCESS".into()],
                deny: vec!["READ_ENVIRONMENT".into()],
            },
        );

        let manager = PermissionManager::from_config(&config).expect("valid config");
        let fetcher = manager.tool_permissions("fetcher").expect("fetcher entry");
        assert_eq!(
            fetcher.to_list(),
            vec!["READ_FILES".to_string(), "NETWORK_ACCESS".to_string()]
        );
        assert!(manager.check_permission(Permission::UseTools, Some("anyone")));
    }

    #[test]
    fn config_rejects_unknown_names() {
        let mut config = PermissionsConfig::default();
        config.tools.insert(
            "typo".into(),
            ToolPermissionsConfig {
                allow: vec!["NETWORK".into()],
                ..ToolPermissionsConfig::default()
            },
        );
        let err = PermissionManager::from_config(&config).expect_err("unknown name");
        assert_eq!(err, UnknownPermission("NETWORK".into()));
    }

    fn any_permission() -> impl Strategy<Value = Permission> {
        (0..Permission::ALL.len()).prop_map(|i| Permission::ALL[i])
    }

    fn any_set() -> impl Strategy<Value = PermissionSet> {
        proptest::collection::vec(any_permission(), 0..8)
            .prop_map(|perms| perms.into_iter().collect())
    }

    proptest! {
        #[test]
        fn check_follows_tool_then_default(
            default in any_set(),
            tool_set in proptest::option::of(any_set()),
            permission in any_permission(),
            ask_as_tool in any::<bool>(),
        ) {
            let manager = PermissionManager::new(default.clone());
            if let Some(set) = &tool_set {
                manager.set_tool_permissions("tool", set.clone());
            }
            let tool = ask_as_tool.then_some("tool");

            let expected = match (tool, &tool_set) {
                (Some(_), Some(set)) => set.has(permission),
                _ => default.has(permission),
            };
            prop_assert_eq!(manager.check_permission(permission, tool), expected);
            prop_assert_eq!(manager.require_permission(permission, tool).is_ok(), expected);
        }
    }
}
