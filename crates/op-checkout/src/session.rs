//! Flow Sessions
//!
//! Suspended spend grants waiting for their resume request, keyed either by
//! flow token (redirect callbacks) or by incoming payment id (quote-then-pay).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use op_protocol::{AccessToken, Amount, Continuation, WalletAddress};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// Unguessable correlation id carried in the callback URI
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowToken(String);

impl FlowToken {
    /// Fresh token from 122 random bits
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlowToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the spend grant will be turned into an access token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendAuthorization {
    /// Consent outstanding; finalize through the continuation
    Pending(Continuation),

    /// Token issued together with the grant
    Issued(AccessToken),
}

/// Material needed to check the callback hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionProof {
    pub client_nonce: String,
    pub server_nonce: String,
    pub grant_endpoint: String,
}

/// Suspended state of one in-flight flow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowSession {
    pub authorization: SpendAuthorization,

    /// Quote the payment will be created from
    pub quote_id: String,

    /// Receivable the quote pays into
    pub incoming_payment_id: String,

    pub debit_amount: Amount,

    /// Sender wallet, whose resource server receives the payment
    pub sender: WalletAddress,

    /// Present when the grant asked for a callback with a finish nonce
    pub proof: Option<InteractionProof>,

    pub created_at: DateTime<Utc>,
}

impl FlowSession {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        self.age() > ttl
    }

    /// Whether a spend token is already in hand
    pub const fn is_authorized(&self) -> bool {
        matches!(self.authorization, SpendAuthorization::Issued(_))
    }
}

/// Key-value store of suspended sessions
///
/// `put` overwrites (last write wins). `delete` hands back the removed entry
/// so that, of several concurrent callers, exactly one observes it.
pub trait SessionStore<K>: Send + Sync {
    fn put(&self, key: K, session: FlowSession) -> Result<()>;

    /// Absent, expired and already deleted entries all read as `None`
    fn get(&self, key: &K) -> Result<Option<FlowSession>>;

    fn delete(&self, key: &K) -> Result<Option<FlowSession>>;
}

/// In-memory session store with optional expiry
pub struct MemorySessionStore<K> {
    sessions: RwLock<HashMap<K, FlowSession>>,
    ttl: Option<chrono::Duration>,
}

impl<K> Default for MemorySessionStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemorySessionStore<K> {
    /// Store without expiry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Store whose entries expire `ttl` after creation
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Some(chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)),
        }
    }

    /// Store expiring entries after `ttl`, or never when `None`
    pub fn for_ttl(ttl: Option<Duration>) -> Self {
        ttl.map_or_else(Self::new, Self::with_ttl)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<K, FlowSession>>> {
        self.sessions
            .read()
            .map_err(|_| FlowError::Storage("session store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<K, FlowSession>>> {
        self.sessions
            .write()
            .map_err(|_| FlowError::Storage("session store lock poisoned".into()))
    }

    fn expired(&self, session: &FlowSession) -> bool {
        self.ttl.is_some_and(|ttl| session.is_expired(ttl))
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        if self.ttl.is_none() {
            return Ok(0);
        }
        let mut sessions = self.write()?;
        let before = sessions.len();
        sessions.retain(|_, session| !self.expired(session));
        Ok(before - sessions.len())
    }
}

impl<K> SessionStore<K> for MemorySessionStore<K>
where
    K: Eq + Hash + Send + Sync,
{
    fn put(&self, key: K, session: FlowSession) -> Result<()> {
        self.write()?.insert(key, session);
        Ok(())
    }

    fn get(&self, key: &K) -> Result<Option<FlowSession>> {
        {
            let sessions = self.read()?;
            match sessions.get(key) {
                None => return Ok(None),
                Some(session) if !self.expired(session) => return Ok(Some(session.clone())),
                Some(_) => {}
            }
        }

        // Expired: evict under the write lock, re-checking in case it was replaced
        let mut sessions = self.write()?;
        if sessions.get(key).is_some_and(|session| self.expired(session)) {
            sessions.remove(key);
            tracing::debug!("Evicted expired flow session");
        }
        Ok(sessions.get(key).cloned())
    }

    fn delete(&self, key: &K) -> Result<Option<FlowSession>> {
        let removed = self.write()?.remove(key);
        Ok(removed.filter(|session| !self.expired(session)))
    }
}
