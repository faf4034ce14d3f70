use std::fmt;

use crate::config::RoleMap;
use crate::types::Snowflake;

/// Privilege tiers, lowest first. Ordering is what permission checks compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeTier {
    None,
    Colonist,
    Troubleshooter,
    CommunitySupport,
    Moderator,
    SeniorModerator,
    BotManager,
    Admin,
}

impl PrivilegeTier {
    pub fn display_name(&self) -> &'static str {
        match self {
            PrivilegeTier::None => "None",
            PrivilegeTier::Colonist => "Colonist",
            PrivilegeTier::Troubleshooter => "Troubleshooter",
            PrivilegeTier::CommunitySupport => "Community Support",
            PrivilegeTier::Moderator => "Moderator",
            PrivilegeTier::SeniorModerator => "Senior Moderator",
            PrivilegeTier::BotManager => "Bot Manager",
            PrivilegeTier::Admin => "Admin",
        }
    }
}

impl fmt::Display for PrivilegeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Outcome of checking a member against a required tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    /// Muted or without any recognised role: ignored without a reply.
    SilentReject,
    Insufficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPermissions {
    pub highest: PrivilegeTier,
    pub muted: bool,
}

impl UserPermissions {
    pub fn from_roles(roles: &[Snowflake], role_map: &RoleMap) -> Self {
        let tiers: [(&[Snowflake], PrivilegeTier); 7] = [
            (&role_map.colonist, PrivilegeTier::Colonist),
            (&role_map.troubleshooter, PrivilegeTier::Troubleshooter),
            (&role_map.community_support, PrivilegeTier::CommunitySupport),
            (&role_map.moderator, PrivilegeTier::Moderator),
            (&role_map.senior_moderator, PrivilegeTier::SeniorModerator),
            (&role_map.bot_manager, PrivilegeTier::BotManager),
            (&role_map.admin, PrivilegeTier::Admin),
        ];

        let highest = tiers
            .iter()
            .filter(|(ids, _)| roles.iter().any(|r| ids.contains(r)))
            .map(|(_, tier)| *tier)
            .max()
            .unwrap_or(PrivilegeTier::None);
        let muted = roles.iter().any(|r| role_map.muted.contains(r));

        Self { highest, muted }
    }

    pub fn none() -> Self {
        Self {
            highest: PrivilegeTier::None,
            muted: false,
        }
    }

    pub fn is_at_least(&self, tier: PrivilegeTier) -> bool {
        self.highest >= tier
    }

    pub fn check(&self, required: PrivilegeTier) -> PermissionCheck {
        if self.muted || self.highest == PrivilegeTier::None {
            PermissionCheck::SilentReject
        } else if self.is_at_least(required) {
            PermissionCheck::Allowed
        } else {
            PermissionCheck::Insufficient
        }
    }
}
