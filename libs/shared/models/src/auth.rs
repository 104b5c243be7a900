use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Role the caller acts in. Admins are treated as staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Doctor,
    #[serde(alias = "admin")]
    Staff,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Patient => write!(f, "patient"),
            ActorRole::Doctor => write!(f, "doctor"),
            ActorRole::Staff => write!(f, "staff"),
        }
    }
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(ActorRole::Patient),
            "doctor" => Ok(ActorRole::Doctor),
            "staff" | "admin" => Ok(ActorRole::Staff),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Explicit identity of whoever performs an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub role: ActorRole,
    pub actor_ref: Uuid,
}

impl ActorContext {
    pub fn new(role: ActorRole, actor_ref: Uuid) -> Self {
        Self { role, actor_ref }
    }

    pub fn patient(actor_ref: Uuid) -> Self {
        Self::new(ActorRole::Patient, actor_ref)
    }

    pub fn doctor(actor_ref: Uuid) -> Self {
        Self::new(ActorRole::Doctor, actor_ref)
    }

    pub fn staff(actor_ref: Uuid) -> Self {
        Self::new(ActorRole::Staff, actor_ref)
    }

    pub fn is_staff(&self) -> bool {
        self.role == ActorRole::Staff
    }
}

impl TryFrom<&User> for ActorContext {
    type Error = String;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        let role = user
            .role
            .as_deref()
            .ok_or_else(|| "Token carries no role".to_string())?
            .parse::<ActorRole>()?;
        let actor_ref = Uuid::parse_str(&user.id)
            .map_err(|_| format!("Subject '{}' is not a valid identifier", user.id))?;

        Ok(Self { role, actor_ref })
    }
}
