use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::models::EntityId;

/// Path value that stands for the caller's own id.
pub const SELF_SENTINEL: &str = "self";

/// Caller identity established by the authentication layer in front of this crate.
///
/// The HTTP layer reads it from request extensions; a request without one is anonymous.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActingIdentity {
    pub id: Option<EntityId>,
    #[serde(default)]
    pub is_admin: bool,
}

impl ActingIdentity {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: Some(id.into()),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<EntityId>) -> Self {
        Self {
            id: Some(id.into()),
            is_admin: true,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Id of the caller, required by every mutation.
    pub fn require_id(&self) -> Result<EntityId> {
        match &self.id {
            Some(id) if !id.as_str().is_empty() => Ok(id.clone()),
            _ => Err(LibError::invalid(
                "Current user not identified",
                anyhow!("request carries no acting identity"),
            )),
        }
    }
}

/// Normalizes a path id, substituting the caller's id for `self`.
///
/// Existence is not checked here; the statement that uses the id does that atomically.
pub fn resolve(
    raw_id: Option<&str>,
    actor: &ActingIdentity,
    public: &'static str,
) -> Result<EntityId> {
    let resolved = match raw_id {
        Some(SELF_SENTINEL) => actor.id.clone(),
        Some(raw) => Some(EntityId::from(raw)),
        None => None,
    };

    match resolved {
        Some(id) if !id.as_str().trim().is_empty() => Ok(id),
        _ => Err(LibError::invalid(
            public,
            anyhow!("identifier {:?} could not be resolved", raw_id),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn self_resolves_to_acting_identity() {
        let actor = ActingIdentity::new("u1");
        let via_self = resolve(Some("self"), &actor, "User ID not defined").expect("self resolves");
        let direct = resolve(Some("u1"), &actor, "User ID not defined").expect("id resolves");
        assert_eq!(via_self, direct);
        assert_eq!(via_self, EntityId::from("u1"));
    }

    #[test]
    fn explicit_id_is_kept_verbatim() {
        let actor = ActingIdentity::new("u1");
        let id = resolve(Some("u2"), &actor, "User ID not defined").expect("id resolves");
        assert_eq!(id.as_str(), "u2");
    }

    #[test]
    fn self_without_identity_is_invalid() {
        let err = resolve(Some("self"), &ActingIdentity::anonymous(), "User ID not defined")
            .expect_err("anonymous self must fail");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.public, "User ID not defined");
    }

    #[test]
    fn missing_or_blank_id_is_invalid() {
        let actor = ActingIdentity::new("u1");
        for raw in [None, Some(""), Some("  ")] {
            let err = resolve(raw, &actor, "Group ID not defined").expect_err("blank id must fail");
            assert_eq!(err.kind, ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn require_id_rejects_anonymous_callers() {
        assert_eq!(
            ActingIdentity::admin("root").require_id().expect("admin has id"),
            EntityId::from("root")
        );
        let err = ActingIdentity::anonymous()
            .require_id()
            .expect_err("anonymous has no id");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
