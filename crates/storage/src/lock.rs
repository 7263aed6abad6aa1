//! Non-blocking named locks for whole-table administrative work.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

use alertstore_core::{Result, RuleStoreError};

use crate::backend::postgres_err;

/// Advisory-lock key: the first 8 bytes of SHA-256(name), big endian.
pub fn lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// A held lock. Release it explicitly; dropping it also frees the lock.
#[async_trait]
pub trait HeldLock: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Take the lock or fail immediately with `LockBusy`.
    async fn try_acquire(&self, name: &str) -> Result<Box<dyn HeldLock>>;
}

// ── No-op ─────────────────────────────────────────────────────

/// For back-ends without advisory locks.
pub struct NoopLock;

struct NoopHeld;

#[async_trait]
impl HeldLock for NoopHeld {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl NamedLock for NoopLock {
    async fn try_acquire(&self, _name: &str) -> Result<Box<dyn HeldLock>> {
        Ok(Box::new(NoopHeld))
    }
}

// ── In-process ────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct MemoryLock {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryHeld {
    key: i64,
    held: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for MemoryHeld {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}

#[async_trait]
impl HeldLock for MemoryHeld {
    async fn release(self: Box<Self>) -> Result<()> {
        // Drop does the work
        Ok(())
    }
}

#[async_trait]
impl NamedLock for MemoryLock {
    async fn try_acquire(&self, name: &str) -> Result<Box<dyn HeldLock>> {
        let key = lock_key(name);
        if !self.held.lock().expect("lock poisoned").insert(key) {
            return Err(RuleStoreError::LockBusy(name.to_string()));
        }
        debug!(lock = %name, key, "acquired named lock");
        Ok(Box::new(MemoryHeld {
            key,
            held: self.held.clone(),
        }))
    }
}

// ── PostgreSQL advisory lock ──────────────────────────────────

/// Session-level `pg_try_advisory_lock` on a dedicated pooled connection.
pub struct PostgresLock {
    pool: PgPool,
}

impl PostgresLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PostgresHeld {
    name: String,
    key: i64,
    conn: Option<PoolConnection<Postgres>>,
}

impl Drop for PostgresHeld {
    fn drop(&mut self) {
        // Closing the session frees the lock; never hand it back to the pool locked.
        if let Some(conn) = self.conn.take() {
            warn!(lock = %self.name, "named lock dropped without release, closing its connection");
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl HeldLock for PostgresHeld {
    async fn release(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let Some(mut conn) = this.conn.take() else {
            return Ok(());
        };
        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(this.key)
            .fetch_one(&mut *conn)
            .await
            .map_err(postgres_err)?;
        debug!(lock = %this.name, "released named lock");
        Ok(())
    }
}

#[async_trait]
impl NamedLock for PostgresLock {
    async fn try_acquire(&self, name: &str) -> Result<Box<dyn HeldLock>> {
        let key = lock_key(name);
        let mut conn = self.pool.acquire().await.map_err(postgres_err)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(postgres_err)?;
        if !acquired {
            return Err(RuleStoreError::LockBusy(name.to_string()));
        }
        debug!(lock = %name, key, "acquired advisory lock");
        Ok(Box::new(PostgresHeld {
            name: name.to_string(),
            key,
            conn: Some(conn),
        }))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
