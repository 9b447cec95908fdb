use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The kind of principal that can hold intents, accept proposals, or call
/// operations. Actors are compared by `(type, id)` exactly — there is no
/// implicit equivalence across types, so a user and an agent acting for
/// that user are always distinct actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Agent,
    Partner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub id: String,
}

impl Actor {
    pub fn new(actor_type: ActorType, id: impl Into<String>) -> Self {
        Actor {
            actor_type,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Actor::new(ActorType::User, id)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Actor::new(ActorType::Agent, id)
    }

    pub fn partner(id: impl Into<String>) -> Self {
        Actor::new(ActorType::Partner, id)
    }

    /// Idempotency ledger scope prefix, `actor_type:actor_id`.
    pub fn scope_key(&self) -> String {
        let type_str = match self.actor_type {
            ActorType::User => "user",
            ActorType::Agent => "agent",
            ActorType::Partner => "partner",
        };
        format!("{type_str}:{}", self.id)
    }
}
