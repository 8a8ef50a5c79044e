use crate::manifest::ChunkManifest;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role {other:?} (expected admin or user)")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::User => "user",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    AdminOverride,
    Owner,
    AllowedUser,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed(Reason),
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed(_))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allowed(Reason::AdminOverride) => f.write_str("ALLOWED (admin override)"),
            Decision::Allowed(Reason::Owner) => f.write_str("ALLOWED (owner)"),
            Decision::Allowed(Reason::AllowedUser) => f.write_str("ALLOWED (shared)"),
            Decision::Denied => f.write_str("DENIED"),
        }
    }
}

/// First match wins: admin, then owner, then the allowed list.
pub fn evaluate(identity: &str, role: Role, manifest: &ChunkManifest) -> Decision {
    if role == Role::Admin {
        return Decision::Allowed(Reason::AdminOverride);
    }
    if identity == manifest.owner {
        return Decision::Allowed(Reason::Owner);
    }
    if manifest.lists(identity) {
        return Decision::Allowed(Reason::AllowedUser);
    }
    Decision::Denied
}
