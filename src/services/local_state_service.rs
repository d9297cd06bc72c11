use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::repositories::local_state_repository::LocalStateRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::attribution::AttributionRecord;
use crate::utils::crypto::CryptoVault;

const KEY_SESSION_ID: &str = "session_id";
const KEY_ATTRIBUTION: &str = "attribution";
const KEY_COUNTRY_CACHE: &str = "country_cache";
const KEY_ADMIN_TOKEN: &str = "admin_token";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CountryInfo {
    pub name: String,
    pub code: String,
}

/// Typed access to the persisted key/value state owned by one browsing
/// profile. The session id is cached in memory after the first read.
pub struct LocalStateService {
    db: DbPool,
    vault: CryptoVault,
    session_id: RwLock<Option<String>>,
}

impl LocalStateService {
    pub fn new(db: DbPool, vault: CryptoVault) -> Self {
        Self {
            db,
            vault,
            session_id: RwLock::new(None),
        }
    }

    /// Runs `job` on the blocking pool so SQLite never runs on an async worker.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, job: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStateService) -> AppResult<T> + Send + 'static,
    {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || job(&state))
            .await
            .map_err(|err| AppError::other(format!("local state task failed: {err}")))?
    }

    /// Returns the visitor session id, creating and persisting one on first use.
    pub fn session_id(&self) -> AppResult<String> {
        if let Ok(guard) = self.session_id.read() {
            if let Some(id) = guard.as_ref() {
                return Ok(id.clone());
            }
        }

        let id = self.db.with_transaction(|tx| {
            let candidate = Uuid::new_v4().to_string();
            if LocalStateRepository::insert_if_absent(tx, KEY_SESSION_ID, &candidate)? {
                debug!(target: "app::state", "created visitor session id");
            }
            let row = LocalStateRepository::get(tx, KEY_SESSION_ID)?.ok_or_else(AppError::not_found)?;
            Ok(row.value)
        })?;

        if let Ok(mut guard) = self.session_id.write() {
            *guard = Some(id.clone());
        }
        Ok(id)
    }

    /// A stored record that no longer parses is dropped and reported as absent.
    pub fn attribution(&self) -> AppResult<Option<AttributionRecord>> {
        self.read_json(KEY_ATTRIBUTION)
    }

    pub fn save_attribution(&self, record: &AttributionRecord) -> AppResult<()> {
        self.write_json(KEY_ATTRIBUTION, record)
    }

    pub fn cached_country(&self) -> AppResult<Option<CountryInfo>> {
        self.read_json(KEY_COUNTRY_CACHE)
    }

    pub fn save_country(&self, country: &CountryInfo) -> AppResult<()> {
        self.write_json(KEY_COUNTRY_CACHE, country)
    }

    pub fn admin_token(&self) -> AppResult<Option<String>> {
        let sealed = self
            .db
            .with_connection(|conn| LocalStateRepository::get(conn, KEY_ADMIN_TOKEN))?;

        let Some(row) = sealed else {
            return Ok(None);
        };

        match self.vault.decrypt(&row.value) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(token) => Ok(Some(token)),
                Err(_) => {
                    warn!(target: "app::state", "admin token is not valid utf-8, clearing");
                    self.clear_admin_token()?;
                    Ok(None)
                }
            },
            Err(err) => {
                warn!(target: "app::state", error = %err, "admin token cannot be decrypted, clearing");
                self.clear_admin_token()?;
                Ok(None)
            }
        }
    }

    pub fn save_admin_token(&self, token: &str) -> AppResult<()> {
        let sealed = self.vault.encrypt(token.as_bytes())?;
        self.db
            .with_connection(|conn| LocalStateRepository::upsert(conn, KEY_ADMIN_TOKEN, &sealed))
    }

    pub fn clear_admin_token(&self) -> AppResult<()> {
        self.db
            .with_connection(|conn| LocalStateRepository::delete(conn, KEY_ADMIN_TOKEN))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> AppResult<Option<T>> {
        let row = self
            .db
            .with_connection(|conn| LocalStateRepository::get(conn, key))?;

        let Some(row) = row else {
            return Ok(None);
        };

        match serde_json::from_str(&row.value) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(target: "app::state", key, error = %err, "discarding unreadable local state entry");
                self.db
                    .with_connection(|conn| LocalStateRepository::delete(conn, key))?;
                Ok(None)
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.db
            .with_connection(|conn| LocalStateRepository::upsert(conn, key, &raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::KEY_LEN;
    use tempfile::tempdir;

    fn service() -> (tempfile::TempDir, LocalStateService) {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("state.sqlite")).expect("db pool");
        let vault = CryptoVault::with_master_secret(&[3u8; KEY_LEN]).expect("vault");
        (dir, LocalStateService::new(pool, vault))
    }

    #[test]
    fn session_id_is_stable_across_instances() {
        let (dir, state) = service();
        let first = state.session_id().unwrap();
        assert_eq!(state.session_id().unwrap(), first);

        let pool = DbPool::new(dir.path().join("state.sqlite")).unwrap();
        let reopened = LocalStateService::new(pool, CryptoVault::with_master_secret(&[3u8; KEY_LEN]).unwrap());
        assert_eq!(reopened.session_id().unwrap(), first);
    }

    #[test]
    fn corrupt_attribution_is_discarded() {
        let (_dir, state) = service();
        state
            .db
            .with_connection(|conn| LocalStateRepository::upsert(conn, KEY_ATTRIBUTION, "{not json"))
            .unwrap();

        assert_eq!(state.attribution().unwrap(), None);
        let row = state
            .db
            .with_connection(|conn| LocalStateRepository::get(conn, KEY_ATTRIBUTION))
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn admin_token_is_stored_encrypted() {
        let (_dir, state) = service();
        state.save_admin_token("tok-123").unwrap();

        let raw = state
            .db
            .with_connection(|conn| LocalStateRepository::get(conn, KEY_ADMIN_TOKEN))
            .unwrap()
            .unwrap();
        assert!(!raw.value.contains("tok-123"));
        assert_eq!(state.admin_token().unwrap().as_deref(), Some("tok-123"));

        state.clear_admin_token().unwrap();
        assert_eq!(state.admin_token().unwrap(), None);
    }
}
