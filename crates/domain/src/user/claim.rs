//! Write-once reservations of unique keys.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};

use super::UserError;

const PHONE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2b3e_7a41_4c55_9b2e_0c1a_5d3f_8e01);
const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2b3e_7a41_4c55_9b2e_0c1a_5d3f_8e02);

/// What kind of key a claim reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimKind {
    Phone,
    Session,
}

impl ClaimKind {
    fn namespace(&self) -> &'static Uuid {
        match self {
            ClaimKind::Phone => &PHONE_NAMESPACE,
            ClaimKind::Session => &SESSION_NAMESPACE,
        }
    }

    /// Stream id of the claim on `key`.
    pub fn claim_id(&self, key: &str) -> AggregateId {
        AggregateId::named(self.namespace(), key)
    }
}

impl std::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimKind::Phone => f.write_str("phone number"),
            ClaimKind::Session => f.write_str("session token"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClaimEvent {
    ClaimTaken {
        claim_id: AggregateId,
        kind: ClaimKind,
        owner: UserId,
        taken_at: DateTime<Utc>,
    },
    ClaimReleased {
        released_at: DateTime<Utc>,
    },
}

impl DomainEvent for ClaimEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClaimEvent::ClaimTaken { .. } => "ClaimTaken",
            ClaimEvent::ClaimReleased { .. } => "ClaimReleased",
        }
    }
}

/// Reservation of one key for one user.
///
/// A released claim can be taken again, by anyone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claim {
    id: Option<AggregateId>,
    #[serde(default)]
    version: Version,
    kind: Option<ClaimKind>,
    owner: Option<UserId>,
}

impl Aggregate for Claim {
    type Event = ClaimEvent;
    type Error = UserError;

    fn aggregate_type() -> &'static str {
        "Claim"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ClaimEvent::ClaimTaken {
                claim_id,
                kind,
                owner,
                ..
            } => {
                self.id = Some(claim_id);
                self.kind = Some(kind);
                self.owner = Some(owner);
            }
            ClaimEvent::ClaimReleased { .. } => self.owner = None,
        }
    }
}

impl Claim {
    /// Current holder, if any.
    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    /// Reserves `key` for `owner`. Taking one's own claim again is a no-op.
    pub fn take(
        &self,
        kind: ClaimKind,
        key: &str,
        owner: UserId,
    ) -> Result<Vec<ClaimEvent>, UserError> {
        match self.owner {
            Some(current) if current == owner => Ok(vec![]),
            Some(_) => Err(UserError::KeyTaken { kind }),
            None => Ok(vec![ClaimEvent::ClaimTaken {
                claim_id: kind.claim_id(key),
                kind,
                owner,
                taken_at: Utc::now(),
            }]),
        }
    }

    /// Frees the key. Only the holder may release; otherwise nothing happens.
    pub fn release(&self, owner: UserId) -> Vec<ClaimEvent> {
        if self.owner == Some(owner) {
            vec![ClaimEvent::ClaimReleased {
                released_at: Utc::now(),
            }]
        } else {
            vec![]
        }
    }
}
