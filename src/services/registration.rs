// src/services/registration.rs

//! Unverified signups waiting for their OTP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use super::{clock::Clock, tokens::issue_otp};

/// What the user submitted at signup, buffered until they prove the address.
#[derive(Debug, Clone)]
pub struct RegistrationPayload {
    pub name: String,
    /// Hashed only when the account is finally created.
    pub password: SecretString,
    pub country: String,
    pub contact: String,
}

#[derive(Debug, Clone)]
pub struct PendingRegistration {
    pub payload: RegistrationPayload,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum CacheLookup {
    Active(PendingRegistration),
    /// Was present but past its expiry; it has now been evicted.
    Expired,
    Absent,
}

/// Keyed by lowercase email. One entry per email, last write wins.
pub trait RegistrationCache: Send + Sync {
    /// Stores `payload` under a freshly issued OTP, replacing any earlier
    /// entry. Returns the OTP.
    fn put(&self, email: &str, payload: RegistrationPayload) -> String;

    /// Expired entries are evicted here rather than by a sweeper.
    fn lookup(&self, email: &str) -> CacheLookup;

    fn get(&self, email: &str) -> Option<PendingRegistration> {
        match self.lookup(email) {
            CacheLookup::Active(pending) => Some(pending),
            CacheLookup::Expired | CacheLookup::Absent => None,
        }
    }

    fn consume(&self, email: &str) -> Option<PendingRegistration>;

    /// Issues a new OTP and restarts the TTL, keeping the buffered payload.
    /// `None` when nothing is pending for `email`.
    fn resend(&self, email: &str) -> Option<String>;
}

pub struct InMemoryRegistrationCache {
    entries: Mutex<HashMap<String, PendingRegistration>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl InMemoryRegistrationCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(10)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingRegistration>> {
        // A panic elsewhere cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RegistrationCache for InMemoryRegistrationCache {
    fn put(&self, email: &str, payload: RegistrationPayload) -> String {
        let otp = issue_otp();
        let pending = PendingRegistration {
            payload,
            otp: otp.clone(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.entries().insert(email.to_lowercase(), pending);
        otp
    }

    fn lookup(&self, email: &str) -> CacheLookup {
        let key = email.to_lowercase();
        let mut entries = self.entries();
        match entries.get(&key) {
            None => CacheLookup::Absent,
            Some(pending) if self.clock.now() > pending.expires_at => {
                entries.remove(&key);
                CacheLookup::Expired
            }
            Some(pending) => CacheLookup::Active(pending.clone()),
        }
    }

    fn consume(&self, email: &str) -> Option<PendingRegistration> {
        self.entries().remove(&email.to_lowercase())
    }

    fn resend(&self, email: &str) -> Option<String> {
        let mut entries = self.entries();
        let pending = entries.get_mut(&email.to_lowercase())?;
        let otp = issue_otp();
        pending.otp = otp.clone();
        pending.expires_at = self.clock.now() + self.ttl;
        Some(otp)
    }
}
