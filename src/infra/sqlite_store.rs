use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::app::ports::{KaiAuth, OrphanRecord, ScoreStore, TokenStore};
use crate::common::error::{Result, StoreError};
use crate::domain::{Game, PbRecord, Playtype, ScoreRecord, UserId};

/// SQLite-backed score store. Records are stored as JSON documents next to the
/// columns they are queried by.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS scores (
        score_id    TEXT PRIMARY KEY,
        user_id     INTEGER NOT NULL,
        chart_id    TEXT NOT NULL,
        time_added  INTEGER NOT NULL,
        doc         TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS scores_user_chart ON scores (user_id, chart_id);
    CREATE TABLE IF NOT EXISTS pbs (
        user_id   INTEGER NOT NULL,
        chart_id  TEXT NOT NULL,
        game      TEXT NOT NULL,
        playtype  TEXT NOT NULL,
        doc       TEXT NOT NULL,
        PRIMARY KEY (user_id, chart_id)
    );
    CREATE TABLE IF NOT EXISTS orphans (
        orphan_id  TEXT PRIMARY KEY,
        user_id    INTEGER NOT NULL,
        doc        TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS score_blacklist (
        user_id   INTEGER NOT NULL,
        score_id  TEXT NOT NULL,
        PRIMARY KEY (user_id, score_id)
    );
    CREATE TABLE IF NOT EXISTS kai_auth (
        user_id        INTEGER NOT NULL,
        service        TEXT NOT NULL,
        access_token   TEXT NOT NULL,
        refresh_token  TEXT NOT NULL,
        updated_at     INTEGER NOT NULL,
        PRIMARY KEY (user_id, service)
    );
"#;

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::result::Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".into()))
    }

    pub fn score_count(&self) -> std::result::Result<usize, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM scores", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn insert_score_row(
    conn: &Connection,
    record: &ScoreRecord,
) -> std::result::Result<(), StoreError> {
    let doc = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO scores (score_id, user_id, chart_id, time_added, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![record.score_id, record.user_id, record.chart_id, record.time_added, doc],
    )?;
    Ok(())
}

fn decode_docs<T: serde::de::DeserializeOwned>(
    docs: Vec<String>,
) -> std::result::Result<Vec<T>, StoreError> {
    docs.iter()
        .map(|d| serde_json::from_str(d).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl ScoreStore for SqliteStore {
    async fn score_exists(&self, score_id: &str) -> std::result::Result<bool, StoreError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM scores WHERE score_id = ?1",
                params![score_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert_scores(&self, records: &[ScoreRecord]) -> std::result::Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in records {
            insert_score_row(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn insert_score(&self, record: &ScoreRecord) -> std::result::Result<(), StoreError> {
        let conn = self.conn()?;
        insert_score_row(&conn, record)
    }

    async fn scores_on_chart(
        &self,
        user_id: UserId,
        chart_id: &str,
    ) -> std::result::Result<Vec<ScoreRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT doc FROM scores WHERE user_id = ?1 AND chart_id = ?2 ORDER BY score_id",
        )?;
        let docs = stmt
            .query_map(params![user_id, chart_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        decode_docs(docs)
    }

    async fn upsert_pb(&self, pb: &PbRecord) -> std::result::Result<(), StoreError> {
        let doc = serde_json::to_string(pb)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pbs (user_id, chart_id, game, playtype, doc) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, chart_id) DO UPDATE SET doc=excluded.doc",
            params![pb.user_id, pb.chart_id, pb.game.as_str(), pb.playtype.as_str(), doc],
        )?;
        Ok(())
    }

    async fn delete_pb(
        &self,
        user_id: UserId,
        chart_id: &str,
    ) -> std::result::Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM pbs WHERE user_id = ?1 AND chart_id = ?2",
            params![user_id, chart_id],
        )?;
        Ok(())
    }

    async fn get_pb(
        &self,
        user_id: UserId,
        chart_id: &str,
    ) -> std::result::Result<Option<PbRecord>, StoreError> {
        let conn = self.conn()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM pbs WHERE user_id = ?1 AND chart_id = ?2",
                params![user_id, chart_id],
                |row| row.get(0),
            )
            .optional()?;
        match doc {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    async fn pbs_for_user(
        &self,
        user_id: UserId,
        game: Game,
        playtype: Playtype,
    ) -> std::result::Result<Vec<PbRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT doc FROM pbs WHERE user_id = ?1 AND game = ?2 AND playtype = ?3",
        )?;
        let docs = stmt
            .query_map(params![user_id, game.as_str(), playtype.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        decode_docs(docs)
    }

    async fn blacklisted_score_ids(
        &self,
        user_id: UserId,
    ) -> std::result::Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT score_id FROM score_blacklist WHERE user_id = ?1")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    async fn blacklist_score(
        &self,
        user_id: UserId,
        score_id: &str,
    ) -> std::result::Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO score_blacklist (user_id, score_id) VALUES (?1, ?2)",
            params![user_id, score_id],
        )?;
        Ok(())
    }

    async fn insert_orphan(&self, orphan: &OrphanRecord) -> std::result::Result<bool, StoreError> {
        let doc = serde_json::to_string(orphan)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO orphans (orphan_id, user_id, doc) VALUES (?1, ?2, ?3)",
            params![orphan.orphan_id, orphan.user_id, doc],
        )?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn load_kai_auth(
        &self,
        user_id: UserId,
        service: &str,
    ) -> std::result::Result<Option<KaiAuth>, StoreError> {
        let conn = self.conn()?;
        let auth = conn
            .query_row(
                "SELECT access_token, refresh_token FROM kai_auth WHERE user_id = ?1 AND service = ?2",
                params![user_id, service],
                |row| {
                    Ok(KaiAuth {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(auth)
    }

    async fn save_kai_auth(
        &self,
        user_id: UserId,
        service: &str,
        auth: &KaiAuth,
    ) -> std::result::Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kai_auth (user_id, service, access_token, refresh_token, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, service) DO UPDATE SET
                access_token=excluded.access_token,
                refresh_token=excluded.refresh_token,
                updated_at=excluded.updated_at",
            params![
                user_id,
                service,
                auth.access_token,
                auth.refresh_token,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::score_record;

    #[tokio::test]
    async fn bulk_insert_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_score(&score_record("R1", "c", 1)).await.unwrap();

        let batch = vec![score_record("R2", "c", 1), score_record("R1", "c", 1)];
        let err = store.insert_scores(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(!store.score_exists("R2").await.unwrap());
        assert_eq!(store.score_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn round_trips_scores_pbs_and_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested").join("scores.db")).unwrap();

        let record = score_record("R1", "chart", 7);
        store.insert_scores(&[record.clone()]).await.unwrap();
        assert_eq!(store.scores_on_chart(7, "chart").await.unwrap(), vec![record]);
        assert!(store.scores_on_chart(8, "chart").await.unwrap().is_empty());

        let auth = KaiAuth {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        store.save_kai_auth(7, "flo", &auth).await.unwrap();
        let rotated = KaiAuth {
            access_token: "a2".into(),
            refresh_token: "r2".into(),
        };
        store.save_kai_auth(7, "flo", &rotated).await.unwrap();
        assert_eq!(store.load_kai_auth(7, "flo").await.unwrap(), Some(rotated));
        assert_eq!(store.load_kai_auth(7, "eag").await.unwrap(), None);

        store.blacklist_score(7, "R1").await.unwrap();
        store.blacklist_score(7, "R1").await.unwrap();
        assert_eq!(store.blacklisted_score_ids(7).await.unwrap().len(), 1);
    }
}
