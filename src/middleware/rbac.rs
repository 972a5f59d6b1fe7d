use serde::{Deserialize, Serialize};

/// Roles known to the platform, ordered by privilege.
/// Matches the `role` column in the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Recycler,
    Miner,
    Manufacturer,
    /// Legacy passport issuer, kept for accounts created before the
    /// miner/manufacturer split.
    Issuer,
    Auditor,
    Certifier,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Viewer,
        Role::Recycler,
        Role::Miner,
        Role::Manufacturer,
        Role::Issuer,
        Role::Auditor,
        Role::Certifier,
        Role::Admin,
        Role::SuperAdmin,
    ];

    /// Parse a role string (case-insensitive). Unknown roles yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Some(Role::Viewer),
            "recycler" => Some(Role::Recycler),
            "miner" => Some(Role::Miner),
            "manufacturer" => Some(Role::Manufacturer),
            "issuer" => Some(Role::Issuer),
            "auditor" => Some(Role::Auditor),
            "certifier" => Some(Role::Certifier),
            "admin" => Some(Role::Admin),
            "super_admin" | "super-admin" | "superadmin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Recycler => "recycler",
            Role::Miner => "miner",
            Role::Manufacturer => "manufacturer",
            Role::Issuer => "issuer",
            Role::Auditor => "auditor",
            Role::Certifier => "certifier",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Privilege level used for every authorization comparison.
    pub fn level(&self) -> u8 {
        match self {
            Role::Viewer => 10,
            Role::Recycler => 50,
            Role::Miner | Role::Manufacturer | Role::Issuer => 60,
            Role::Auditor => 70,
            Role::Certifier => 80,
            Role::Admin => 90,
            Role::SuperAdmin => 100,
        }
    }

    /// Supplier-class roles can only be granted through a super-admin
    /// approved onboarding request.
    pub fn requires_super_admin_approval(&self) -> bool {
        matches!(
            self,
            Role::Miner | Role::Manufacturer | Role::Recycler | Role::Certifier
        )
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical names of every role at or below `level`. Empty for level 0, so
/// an unknown role matches nothing.
pub fn roles_at_or_below(level: u8) -> Vec<String> {
    Role::ALL
        .iter()
        .filter(|r| level > 0 && r.level() <= level)
        .map(|r| r.as_str().to_string())
        .collect()
}

/// Level of an arbitrary role string. Unknown roles are level 0.
pub fn role_level(role: &str) -> u8 {
    Role::parse(role).map(|r| r.level()).unwrap_or(0)
}

pub fn is_valid_role(role: &str) -> bool {
    role_level(role) > 0
}

/// `true` iff `role` sits at or above `required` in the hierarchy.
pub fn has_higher_or_equal_role(role: &str, required: &str) -> bool {
    role_level(role) >= role_level(required)
}

pub fn requires_super_admin_approval(role: &str) -> bool {
    Role::parse(role)
        .map(|r| r.requires_super_admin_approval())
        .unwrap_or(false)
}

/// Authenticated caller as resolved by the session layer.
/// The engine trusts this pair without re-checking credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub role: String,
}

impl Actor {
    pub fn new(user_id: i64, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }

    pub fn level(&self) -> u8 {
        role_level(&self.role)
    }

    pub fn has_role_at_least(&self, required: Role) -> bool {
        self.level() >= required.level()
    }

    /// Check the role floor for an operation. Returns the denial message.
    pub fn require(&self, required: Role, operation: &str) -> Result<(), String> {
        if self.has_role_at_least(required) {
            return Ok(());
        }
        tracing::warn!(
            user_id = self.user_id,
            role = %self.role,
            required = %required,
            operation,
            "RBAC access denied"
        );
        Err(format!(
            "{} requires role '{}' or higher, but user has '{}'",
            operation, required, self.role
        ))
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("Admin"), Some(Role::Admin));
        assert_eq!(Role::parse("super_admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("super-admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse(" miner "), Some(Role::Miner));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn test_role_levels_follow_hierarchy() {
        assert_eq!(role_level("viewer"), 10);
        assert_eq!(role_level("recycler"), 50);
        assert_eq!(role_level("miner"), 60);
        assert_eq!(role_level("manufacturer"), 60);
        assert_eq!(role_level("issuer"), 60);
        assert_eq!(role_level("auditor"), 70);
        assert_eq!(role_level("certifier"), 80);
        assert_eq!(role_level("admin"), 90);
        assert_eq!(role_level("super_admin"), 100);
    }

    #[test]
    fn test_unknown_role_is_level_zero() {
        assert_eq!(role_level("wizard"), 0);
        assert!(!is_valid_role("wizard"));
        assert!(has_higher_or_equal_role("viewer", "wizard"));
        assert!(!has_higher_or_equal_role("wizard", "viewer"));
    }

    #[test]
    fn test_higher_or_equal_matches_levels_for_all_pairs() {
        for a in Role::ALL {
            for b in Role::ALL {
                assert_eq!(
                    has_higher_or_equal_role(a.as_str(), b.as_str()),
                    a.level() >= b.level(),
                    "{} vs {}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_same_level_roles_are_equal() {
        assert!(has_higher_or_equal_role("miner", "manufacturer"));
        assert!(has_higher_or_equal_role("manufacturer", "miner"));
        assert!(has_higher_or_equal_role("issuer", "miner"));
    }

    #[test]
    fn test_supplier_class_roles() {
        assert!(requires_super_admin_approval("miner"));
        assert!(requires_super_admin_approval("manufacturer"));
        assert!(requires_super_admin_approval("recycler"));
        assert!(requires_super_admin_approval("certifier"));
        assert!(!requires_super_admin_approval("issuer"));
        assert!(!requires_super_admin_approval("auditor"));
        assert!(!requires_super_admin_approval("admin"));
        assert!(!requires_super_admin_approval("nonsense"));
    }

    #[test]
    fn test_actor_require() {
        let admin = Actor::new(1, "admin");
        assert!(admin.require(Role::Admin, "create").is_ok());
        assert!(admin.require(Role::SuperAdmin, "create").is_err());

        let ghost = Actor::new(2, "ghost");
        let msg = ghost.require(Role::Viewer, "list").unwrap_err();
        assert!(msg.contains("viewer"));
    }

    #[test]
    fn test_roles_at_or_below() {
        let admin = roles_at_or_below(Actor::new(1, "Admin").level());
        assert!(admin.contains(&"admin".to_string()));
        assert!(admin.contains(&"certifier".to_string()));
        assert!(admin.contains(&"viewer".to_string()));
        assert!(!admin.contains(&"super_admin".to_string()));

        let miner = roles_at_or_below(role_level("miner"));
        assert!(miner.contains(&"manufacturer".to_string()));
        assert!(!miner.contains(&"auditor".to_string()));

        assert_eq!(roles_at_or_below(role_level("super-admin")).len(), Role::ALL.len());
        assert!(roles_at_or_below(role_level("ghost")).is_empty());
    }

    #[test]
    fn test_role_display_round_trips_through_parse() {
        for role in Role::ALL {
            assert_eq!(Role::parse(&role.to_string()), Some(role));
        }
    }
}
