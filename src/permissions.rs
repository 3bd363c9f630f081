use crate::error::Result;
use crate::identity::ActingIdentity;
use crate::models::{EntityId, Properties};

/// Relationship from a group to the users allowed to manage its membership.
pub const ADMINISTRATED_BY: &str = "ADMINISTRATED_BY";

/// Node property marking a user as a global administrator.
pub const GLOBAL_ADMIN_PROPERTY: &str = "isAdmin";

/// Authorization predicate guarding a membership mutation on `group`.
///
/// The guard is never evaluated on its own: it is rendered into the same statement as the
/// mutation, so the check and the write see the same graph. A failed guard makes the
/// statement match nothing, which callers observe exactly like a missing group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminGuard {
    pub actor: EntityId,
    pub actor_is_admin: bool,
    pub group: EntityId,
}

impl AdminGuard {
    pub fn for_group(actor: &ActingIdentity, group: EntityId) -> Result<Self> {
        Ok(Self {
            actor: actor.require_id()?,
            actor_is_admin: actor.is_admin,
            group,
        })
    }

    /// Cypher condition over the bound `group` and `current_user` variables.
    pub fn cypher_condition(&self) -> String {
        format!(
            "( (group)-[:{ADMINISTRATED_BY}]->(current_user) \
             OR current_user.{GLOBAL_ADMIN_PROPERTY} = true \
             OR $actor_is_admin )"
        )
    }

    /// Same predicate over already-loaded state, used by stores that evaluate plans in process.
    pub fn permits(&self, administrated_by_actor: bool, actor_record: &Properties) -> bool {
        administrated_by_actor || self.actor_is_admin || is_global_admin(actor_record)
    }
}

pub fn is_global_admin(record: &Properties) -> bool {
    record
        .get(GLOBAL_ADMIN_PROPERTY)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn props(value: serde_json::Value) -> Properties {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn guard_requires_an_acting_identity() {
        let err = AdminGuard::for_group(&ActingIdentity::anonymous(), EntityId::from("g1"))
            .expect_err("anonymous caller cannot mutate");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn group_admin_or_global_admin_is_permitted() {
        let guard = AdminGuard::for_group(&ActingIdentity::new("u1"), EntityId::from("g1"))
            .expect("guard builds");
        let plain = props(json!({"_id": "u1"}));

        assert!(guard.permits(true, &plain));
        assert!(!guard.permits(false, &plain));
        assert!(guard.permits(false, &props(json!({"_id": "u1", "isAdmin": true}))));
        assert!(!guard.permits(false, &props(json!({"_id": "u1", "isAdmin": "yes"}))));

        let flagged = AdminGuard::for_group(&ActingIdentity::admin("u1"), EntityId::from("g1"))
            .expect("guard builds");
        assert!(flagged.permits(false, &plain));
    }

    #[test]
    fn cypher_condition_checks_both_admin_paths() {
        let guard = AdminGuard::for_group(&ActingIdentity::new("u1"), EntityId::from("g1"))
            .expect("guard builds");
        let condition = guard.cypher_condition();
        assert!(condition.contains("(group)-[:ADMINISTRATED_BY]->(current_user)"));
        assert!(condition.contains("current_user.isAdmin = true"));
        assert!(condition.contains("$actor_is_admin"));
    }
}
