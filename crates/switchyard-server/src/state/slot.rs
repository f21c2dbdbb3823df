//! Agent roles and the index slot a connection occupies within its session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which assistant a connection serves within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Plain client connection with no agent role.
    #[default]
    None,
    /// Session-wide assistant.
    Guide,
    /// Pillar-scoped assistant.
    Liaison,
}

impl AgentRole {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Guide => "guide",
            Self::Liaison => "liaison",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Self::None),
            "guide" => Ok(Self::Guide),
            "liaison" => Ok(Self::Liaison),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}

/// Position of a connection inside a session's index entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Slot {
    /// Connection without an agent role.
    Generic,
    /// Agent connection without a pillar scope.
    Role {
        /// Agent role.
        role: AgentRole,
    },
    /// Liaison connection scoped to one pillar.
    RoleAndPillar {
        /// Agent role.
        role: AgentRole,
        /// Business pillar.
        pillar: String,
    },
}

impl Slot {
    /// Compute the slot for an association request.
    ///
    /// Guides ignore the pillar. A liaison without a pillar (or with an empty
    /// one) lands in the role-wide bucket.
    pub fn for_association(role: AgentRole, pillar: Option<&str>) -> Self {
        match (role, pillar.filter(|p| !p.is_empty())) {
            (AgentRole::None, _) => Self::Generic,
            (AgentRole::Guide, _) | (AgentRole::Liaison, None) => Self::Role { role },
            (AgentRole::Liaison, Some(pillar)) => Self::RoleAndPillar {
                role,
                pillar: pillar.to_string(),
            },
        }
    }

    /// Role held by connections in this slot.
    pub fn role(&self) -> AgentRole {
        match self {
            Self::Generic => AgentRole::None,
            Self::Role { role } | Self::RoleAndPillar { role, .. } => *role,
        }
    }

    /// Pillar of this slot, if it is pillar-scoped.
    pub fn pillar(&self) -> Option<&str> {
        match self {
            Self::RoleAndPillar { pillar, .. } => Some(pillar),
            Self::Generic | Self::Role { .. } => None,
        }
    }

    /// Whether this slot passes the given role and pillar filters.
    ///
    /// An absent filter matches everything.
    pub fn matches(&self, role: Option<AgentRole>, pillar: Option<&str>) -> bool {
        role.is_none_or(|r| self.role() == r) && pillar.is_none_or(|p| self.pillar() == Some(p))
    }
}
