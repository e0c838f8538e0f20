//! Collaborator data that lives next to the match records: user profiles and
//! friend/block relationships. Both are owned elsewhere; this side only reads
//! identities and maintains the active match pointer.

use crate::ids::{MatchId, UserId};
use crate::store::document_store::{DocumentStore, StoreError, Transaction};
use crate::store::paths;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub active_pvp_session_id: Option<MatchId>,
    /// Fields owned by other parts of the product, carried through untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Display identity captured when a player enters a match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub uid: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(uid: UserId, display_name: Option<String>, email: Option<String>) -> Self {
        Identity {
            uid,
            display_name,
            email,
        }
    }

    pub fn from_profile(uid: UserId, profile: Option<UserProfile>) -> Self {
        let profile = profile.unwrap_or_default();
        Identity {
            uid,
            display_name: profile.display_name,
            email: profile.email,
        }
    }

    /// Keeps what the caller already told us, filling the gaps from `fallback`.
    pub fn with_fallback(self, fallback: Identity) -> Identity {
        Identity {
            uid: self.uid,
            display_name: self.display_name.or(fallback.display_name),
            email: self.email.or(fallback.email),
        }
    }
}

pub fn load_identity(tx: &mut Transaction<'_>, uid: &UserId) -> Result<Identity, StoreError> {
    let profile: Option<UserProfile> = tx.get(&paths::user(uid))?;

    Ok(Identity::from_profile(uid.clone(), profile))
}

/// The identity snapshot stored on a player entry.
pub fn resolve_identity(tx: &mut Transaction<'_>, caller: &Identity) -> Result<Identity, StoreError> {
    let stored = load_identity(tx, &caller.uid)?;

    Ok(caller.clone().with_fallback(stored))
}

pub fn set_active_match(
    tx: &mut Transaction<'_>,
    uid: &UserId,
    match_id: Option<MatchId>,
) -> Result<(), StoreError> {
    let path = paths::user(uid);
    let mut profile: UserProfile = tx.get(&path)?.unwrap_or_default();
    if profile.active_pvp_session_id == match_id {
        return Ok(());
    }

    profile.active_pvp_session_id = match_id;
    tx.set(&path, &profile)
}

/// Clears the pointer only if it still refers to `match_id`.
pub fn clear_active_match(
    tx: &mut Transaction<'_>,
    uid: &UserId,
    match_id: &MatchId,
) -> Result<(), StoreError> {
    let path = paths::user(uid);
    let Some(mut profile) = tx.get::<UserProfile>(&path)? else {
        return Ok(());
    };
    if profile.active_pvp_session_id.as_ref() != Some(match_id) {
        return Ok(());
    }

    profile.active_pvp_session_id = None;
    tx.set(&path, &profile)
}

pub trait Relationships: Send + Sync {
    fn are_friends(&self, first: &UserId, second: &UserId) -> Result<bool, StoreError>;

    /// True if either user blocked the other.
    fn has_block(&self, first: &UserId, second: &UserId) -> Result<bool, StoreError>;
}

pub struct StoreRelationships {
    store: Arc<DocumentStore>,
}

impl StoreRelationships {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        StoreRelationships { store }
    }
}

impl Relationships for StoreRelationships {
    fn are_friends(&self, first: &UserId, second: &UserId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get::<Value>(&paths::friendship(first, second))?
            .is_some())
    }

    fn has_block(&self, first: &UserId, second: &UserId) -> Result<bool, StoreError> {
        let forward = self.store.get::<Value>(&paths::block(first, second))?;
        let backward = self.store.get::<Value>(&paths::block(second, first))?;

        Ok(forward.is_some() || backward.is_some())
    }
}
