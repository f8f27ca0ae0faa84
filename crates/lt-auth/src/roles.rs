//! Role table for La Tanda Auth RS
//!
//! Four predefined roles ordered by level, each carrying a set of
//! permission strings. ADMIN satisfies every permission check regardless
//! of what its set lists.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use lt_core::ConfigError;
use serde::{Deserialize, Serialize};

// ============================================================================
// Role
// ============================================================================

/// Predefined roles, declared from least to most privileged so that the
/// derived ordering agrees with the default levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Role {
    #[default]
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "MIT")]
    Mit,
    #[serde(rename = "IT")]
    It,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::It, Role::Mit, Role::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::It => "IT",
            Role::Mit => "MIT",
            Role::User => "USER",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    /// Role names are matched exactly (`"ADMIN"`, not `"admin"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "IT" => Ok(Role::It),
            "MIT" => Ok(Role::Mit),
            "USER" => Ok(Role::User),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

// ============================================================================
// Permission names
// ============================================================================

/// Built-in permission names
pub mod permission {
    pub const MANAGE_USERS: &str = "manage_users";
    pub const MANAGE_ROLES: &str = "manage_roles";
    pub const SYSTEM_CONFIG: &str = "system_config";
    pub const VIEW_AUDIT_LOG: &str = "view_audit_log";
    pub const MANAGE_INTEGRATIONS: &str = "manage_integrations";
    pub const MANAGE_GROUPS: &str = "manage_groups";
    pub const MANAGE_PAYMENTS: &str = "manage_payments";
    pub const CREATE_GROUPS: &str = "create_groups";
    pub const MANAGE_OWN_GROUPS: &str = "manage_own_groups";
    pub const APPROVE_MEMBERS: &str = "approve_members";
    pub const VIEW_REPORTS: &str = "view_reports";
    pub const VIEW_GROUPS: &str = "view_groups";
    pub const JOIN_GROUPS: &str = "join_groups";
    pub const MAKE_CONTRIBUTIONS: &str = "make_contributions";
    pub const VIEW_OWN_PROFILE: &str = "view_own_profile";
    pub const EDIT_OWN_PROFILE: &str = "edit_own_profile";
}

// ============================================================================
// Role Table
// ============================================================================

/// One row of the role table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: Role,
    pub level: u32,
    pub permissions: BTreeSet<String>,
    pub description: String,
}

impl RoleDefinition {
    pub fn new<I, P>(role: Role, level: u32, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            role,
            level,
            permissions: permissions.into_iter().map(Into::into).collect(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Immutable role table
///
/// Built once at startup and shared behind an `Arc`. Queries that take a
/// role *name* answer `false` for names that do not parse or are not in the
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTable {
    roles: HashMap<Role, RoleDefinition>,
}

impl Default for RoleTable {
    fn default() -> Self {
        use permission::*;

        Self::empty()
            .with_role(
                RoleDefinition::new(
                    Role::Admin,
                    100,
                    [
                        MANAGE_USERS,
                        MANAGE_ROLES,
                        SYSTEM_CONFIG,
                        VIEW_AUDIT_LOG,
                        MANAGE_GROUPS,
                        APPROVE_MEMBERS,
                        VIEW_REPORTS,
                        MANAGE_PAYMENTS,
                    ],
                )
                .with_description("Full platform administration"),
            )
            .with_role(
                RoleDefinition::new(
                    Role::It,
                    75,
                    [
                        MANAGE_USERS,
                        SYSTEM_CONFIG,
                        VIEW_AUDIT_LOG,
                        VIEW_REPORTS,
                        MANAGE_INTEGRATIONS,
                    ],
                )
                .with_description("Technical operations staff"),
            )
            .with_role(
                RoleDefinition::new(
                    Role::Mit,
                    50,
                    [
                        CREATE_GROUPS,
                        MANAGE_OWN_GROUPS,
                        APPROVE_MEMBERS,
                        VIEW_REPORTS,
                        VIEW_GROUPS,
                        JOIN_GROUPS,
                        MAKE_CONTRIBUTIONS,
                    ],
                )
                .with_description("Group coordinator"),
            )
            .with_role(
                RoleDefinition::new(
                    Role::User,
                    10,
                    [
                        VIEW_GROUPS,
                        JOIN_GROUPS,
                        MAKE_CONTRIBUTIONS,
                        VIEW_OWN_PROFILE,
                        EDIT_OWN_PROFILE,
                    ],
                )
                .with_description("Regular member"),
            )
    }
}

impl RoleTable {
    /// A table with no roles; use [`RoleTable::with_role`] to fill it
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    /// Add or replace a role definition
    pub fn with_role(mut self, definition: RoleDefinition) -> Self {
        self.roles.insert(definition.role, definition);
        self
    }

    /// Check that role levels are distinct
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<u32, Role> = HashMap::new();
        let mut definitions: Vec<&RoleDefinition> = self.roles.values().collect();
        definitions.sort_by_key(|d| d.role);

        for definition in definitions {
            if let Some(first) = seen.insert(definition.level, definition.role) {
                return Err(ConfigError::DuplicateRoleLevel {
                    first: first.to_string(),
                    second: definition.role.to_string(),
                    level: definition.level,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, role: Role) -> Option<&RoleDefinition> {
        self.roles.get(&role)
    }

    pub fn level(&self, role: Role) -> Option<u32> {
        self.get(role).map(|d| d.level)
    }

    /// Permissions listed for a role (empty for an unknown role)
    pub fn permissions_for(&self, role: Role) -> BTreeSet<String> {
        self.get(role)
            .map(|d| d.permissions.clone())
            .unwrap_or_default()
    }

    /// Role defaults plus any per-identity grants
    pub fn effective_permissions<I, P>(&self, role: Role, extra: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut permissions = self.permissions_for(role);
        permissions.extend(extra.into_iter().map(Into::into));
        permissions
    }

    /// Roles whose level is at least that of `role`, highest first
    pub fn roles_at_or_above(&self, role: Role) -> Vec<Role> {
        let Some(minimum) = self.level(role) else {
            return Vec::new();
        };
        let mut roles: Vec<&RoleDefinition> = self
            .roles
            .values()
            .filter(|d| d.level >= minimum)
            .collect();
        roles.sort_by(|a, b| b.level.cmp(&a.level));
        roles.into_iter().map(|d| d.role).collect()
    }

    // ------------------------------------------------------------------------
    // Typed queries
    // ------------------------------------------------------------------------

    pub fn role_has_permission(&self, role: Role, permission: &str) -> bool {
        if role.is_admin() {
            return true;
        }
        self.get(role)
            .map(|d| d.permissions.contains(permission))
            .unwrap_or(false)
    }

    pub fn role_at_least(&self, role: Role, minimum: Role) -> bool {
        match (self.level(role), self.level(minimum)) {
            (Some(level), Some(required)) => level >= required,
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Name based queries
    // ------------------------------------------------------------------------

    /// ADMIN always passes; other roles need the permission in their set
    pub fn has_permission(&self, role: &str, permission: &str) -> bool {
        self.resolve(role)
            .map(|r| self.role_has_permission(r, permission))
            .unwrap_or(false)
    }

    /// `false` for an empty list
    pub fn has_any_permission(&self, role: &str, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has_permission(role, p))
    }

    /// `true` for an empty list
    pub fn has_all_permissions(&self, role: &str, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has_permission(role, p))
    }

    /// Both roles must exist in the table
    pub fn has_role_level(&self, role: &str, minimum_role: &str) -> bool {
        match (self.resolve(role), self.resolve(minimum_role)) {
            (Some(role), Some(minimum)) => self.role_at_least(role, minimum),
            _ => false,
        }
    }

    pub fn is_valid_role(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    fn resolve(&self, name: &str) -> Option<Role> {
        let role = name.parse::<Role>().ok()?;
        self.roles.contains_key(&role).then_some(role)
    }
}

// ============================================================================
// Resource and group authorization
// ============================================================================

/// Minimal view of a savings group for authorization decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub creator_id: String,
}

impl Group {
    pub fn new(id: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            creator_id: creator_id.into(),
        }
    }
}

/// Actions that can be attempted on a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    View,
    Edit,
    Delete,
    ApproveMembers,
    ManageSettings,
}

impl GroupAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "view" => Some(GroupAction::View),
            "edit" => Some(GroupAction::Edit),
            "delete" => Some(GroupAction::Delete),
            "approve_members" => Some(GroupAction::ApproveMembers),
            "manage_settings" => Some(GroupAction::ManageSettings),
            _ => None,
        }
    }

    /// Actions a MIT may perform on a group they created
    fn is_creator_action(&self) -> bool {
        matches!(
            self,
            GroupAction::Edit
                | GroupAction::Delete
                | GroupAction::ApproveMembers
                | GroupAction::ManageSettings
        )
    }
}

/// ADMIN, or the requester owns the resource
pub fn can_access_resource(requester_id: &str, owner_id: &str, requester_role: &str) -> bool {
    if requester_role.parse::<Role>().map(|r| r.is_admin()).unwrap_or(false) {
        return true;
    }
    requester_id == owner_id
}

/// Group action policy
///
/// ADMIN may do anything. A MIT who created the group may edit, delete,
/// approve members and manage settings. Anyone may view, including users
/// with no relation to the group. Unknown actions are denied.
pub fn can_perform_group_action(
    requester_id: &str,
    group: &Group,
    requester_role: &str,
    action: &str,
) -> bool {
    let role = requester_role.parse::<Role>().ok();
    if role == Some(Role::Admin) {
        return true;
    }

    let Some(action) = GroupAction::parse(action) else {
        return false;
    };

    if role == Some(Role::Mit) && group.creator_id == requester_id && action.is_creator_action() {
        return true;
    }

    action == GroupAction::View
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("MIT".parse::<Role>().unwrap(), Role::Mit);
        assert_eq!(Role::It.to_string(), "IT");
        assert_eq!(
            "admin".parse::<Role>(),
            Err(ConfigError::InvalidRole("admin".to_string()))
        );
        assert_eq!(Role::default(), Role::User);
    }

    #[test]
    fn test_role_ordering_follows_privilege() {
        assert!(Role::User < Role::Mit);
        assert!(Role::Mit < Role::It);
        assert!(Role::It < Role::Admin);

        let table = RoleTable::default();
        for a in Role::ALL {
            for b in Role::ALL {
                assert_eq!(a.cmp(&b), table.level(a).cmp(&table.level(b)));
            }
        }
    }

    #[test]
    fn test_default_levels() {
        let table = RoleTable::default();
        assert_eq!(table.level(Role::Admin), Some(100));
        assert_eq!(table.level(Role::It), Some(75));
        assert_eq!(table.level(Role::Mit), Some(50));
        assert_eq!(table.level(Role::User), Some(10));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_admin_has_every_permission() {
        let table = RoleTable::default();
        assert!(table.has_permission("ADMIN", permission::SYSTEM_CONFIG));
        assert!(table.has_permission("ADMIN", "launch_rockets"));
        assert!(table.has_permission("ADMIN", ""));
    }

    #[test]
    fn test_user_permissions() {
        let table = RoleTable::default();
        assert!(table.has_permission("USER", permission::VIEW_GROUPS));
        assert!(!table.has_permission("USER", permission::SYSTEM_CONFIG));
        assert!(!table.has_permission("GUEST", permission::VIEW_GROUPS));
    }

    #[test]
    fn test_any_and_all_permissions() {
        let table = RoleTable::default();
        assert!(table.has_any_permission("MIT", &["system_config", "create_groups"]));
        assert!(!table.has_any_permission("MIT", &["system_config", "manage_users"]));
        assert!(table.has_all_permissions("IT", &["system_config", "manage_users"]));
        assert!(!table.has_all_permissions("IT", &["system_config", "create_groups"]));

        assert!(!table.has_any_permission("USER", &[]));
        assert!(table.has_all_permissions("USER", &[]));
    }

    #[test]
    fn test_role_levels() {
        let table = RoleTable::default();
        assert!(table.has_role_level("MIT", "USER"));
        assert!(table.has_role_level("MIT", "MIT"));
        assert!(!table.has_role_level("USER", "ADMIN"));
        assert!(!table.has_role_level("SUPERUSER", "USER"));
        assert!(!table.has_role_level("USER", "SUPERUSER"));
    }

    #[test]
    fn test_is_valid_role() {
        let table = RoleTable::default();
        for role in Role::ALL {
            assert!(table.is_valid_role(role.as_str()));
        }
        assert!(!table.is_valid_role("user"));
        assert!(!table.is_valid_role(""));
    }

    #[test]
    fn test_roles_at_or_above() {
        let table = RoleTable::default();
        assert_eq!(
            table.roles_at_or_above(Role::Mit),
            vec![Role::Admin, Role::It, Role::Mit]
        );
        assert_eq!(table.roles_at_or_above(Role::Admin), vec![Role::Admin]);
    }

    #[test]
    fn test_effective_permissions() {
        let table = RoleTable::default();
        let permissions = table.effective_permissions(Role::User, ["view_reports"]);
        assert!(permissions.contains("view_reports"));
        assert!(permissions.contains("join_groups"));
        assert!(!permissions.contains("system_config"));
    }

    #[test]
    fn test_custom_table() {
        let table = RoleTable::empty()
            .with_role(RoleDefinition::new(Role::Admin, 10, Vec::<String>::new()))
            .with_role(RoleDefinition::new(Role::User, 1, ["read"]));

        assert!(table.has_role_level("ADMIN", "USER"));
        assert!(!table.is_valid_role("MIT"));
        assert!(!table.has_role_level("MIT", "USER"));
        assert!(table.has_permission("USER", "read"));
    }

    #[test]
    fn test_duplicate_levels_rejected() {
        let table = RoleTable::default().with_role(RoleDefinition::new(Role::Mit, 75, ["x"]));
        assert_eq!(
            table.validate(),
            Err(ConfigError::DuplicateRoleLevel {
                first: "MIT".to_string(),
                second: "IT".to_string(),
                level: 75,
            })
        );
    }

    #[test]
    fn test_can_access_resource() {
        assert!(can_access_resource("u1", "u1", "USER"));
        assert!(!can_access_resource("u1", "u2", "USER"));
        assert!(can_access_resource("anyone", "u2", "ADMIN"));
        assert!(!can_access_resource("u1", "u2", "IT"));
    }

    #[test]
    fn test_group_actions() {
        let group = Group::new("g1", "creator");

        assert!(can_perform_group_action("someone", &group, "ADMIN", "delete"));
        assert!(can_perform_group_action("creator", &group, "MIT", "edit"));
        assert!(can_perform_group_action("creator", &group, "MIT", "manage_settings"));
        assert!(!can_perform_group_action("other", &group, "MIT", "edit"));
        assert!(!can_perform_group_action("creator", &group, "USER", "approve_members"));
        assert!(can_perform_group_action("stranger", &group, "USER", "view"));
        assert!(!can_perform_group_action("creator", &group, "MIT", "archive"));
        assert!(!can_perform_group_action("stranger", &group, "IT", "edit"));
    }
}
