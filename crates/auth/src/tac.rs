//! TAC (time-based authentication code) login.
//!
//! A six-digit code is issued per email, expires after `ttl`, cannot be
//! re-requested within `resend_cooldown`, and locks after `max_attempts`
//! wrong guesses. Codes are single-use.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TacError {
    #[error("no code was requested for this email")]
    NotRequested,

    #[error("code expired")]
    Expired,

    #[error("incorrect code ({remaining} attempts left)")]
    Mismatch { remaining: u32 },

    #[error("too many incorrect attempts; request a new code")]
    Locked,

    #[error("a code was sent recently; retry in {retry_after_secs}s")]
    TooSoon { retry_after_secs: i64 },

    #[error("code delivery failed: {0}")]
    Delivery(String),

    #[error("code store unavailable")]
    Poisoned,
}

#[derive(Debug, Clone, Copy)]
pub struct TacPolicy {
    pub ttl: Duration,
    pub resend_cooldown: Duration,
    pub max_attempts: u32,
}

impl Default for TacPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(300),
            resend_cooldown: Duration::seconds(60),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingCode {
    /// `None` once the code is locked or expired. The entry stays until the
    /// resend cooldown has passed.
    code: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    failed_attempts: u32,
}

#[derive(Debug, Default)]
pub struct TacIssuer {
    policy: TacPolicy,
    pending: Mutex<HashMap<String, PendingCode>>,
}

impl TacIssuer {
    pub fn new(policy: TacPolicy) -> Self {
        Self {
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> TacPolicy {
        self.policy
    }

    /// Generates and remembers a fresh code for `email`, replacing any
    /// earlier one once the cooldown has passed.
    pub fn issue(&self, email: &str, now: DateTime<Utc>) -> Result<String, TacError> {
        let key = normalize(email);
        let mut pending = self.pending.lock().map_err(|_| TacError::Poisoned)?;

        if let Some(existing) = pending.get(&key) {
            let ready_at = existing.issued_at + self.policy.resend_cooldown;
            if now < ready_at {
                return Err(TacError::TooSoon {
                    retry_after_secs: (ready_at - now).num_seconds().max(1),
                });
            }
        }

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        pending.insert(
            key,
            PendingCode {
                code: Some(code.clone()),
                issued_at: now,
                expires_at: now + self.policy.ttl,
                failed_attempts: 0,
            },
        );
        Ok(code)
    }

    /// Consumes the code on success.
    pub fn verify(&self, email: &str, code: &str, now: DateTime<Utc>) -> Result<(), TacError> {
        let key = normalize(email);
        let mut pending = self.pending.lock().map_err(|_| TacError::Poisoned)?;

        let Some(entry) = pending.get_mut(&key) else {
            return Err(TacError::NotRequested);
        };
        let Some(expected) = entry.code.as_deref() else {
            return Err(TacError::NotRequested);
        };

        if now >= entry.expires_at {
            entry.code = None;
            return Err(TacError::Expired);
        }

        if constant_time_eq(expected.as_bytes(), code.trim().as_bytes()) {
            pending.remove(&key);
            return Ok(());
        }

        entry.failed_attempts += 1;
        if entry.failed_attempts >= self.policy.max_attempts {
            entry.code = None;
            return Err(TacError::Locked);
        }
        Err(TacError::Mismatch {
            remaining: self.policy.max_attempts - entry.failed_attempts,
        })
    }

    /// Drops entries past both their expiry and the resend cooldown.
    /// Called opportunistically by the API.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        let cooldown = self.policy.resend_cooldown;
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|_, p| p.expires_at.max(p.issued_at + cooldown) > now);
        }
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Delivers an issued code to the user (email, SMS, WhatsApp, ...).
pub trait TacSender: Send + Sync {
    fn send(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> Result<(), TacError>;
}

/// Development sender: writes the code to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTacSender;

impl TacSender for LogTacSender {
    fn send(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> Result<(), TacError> {
        tracing::info!(%email, %code, %expires_at, "TAC issued");
        Ok(())
    }
}
