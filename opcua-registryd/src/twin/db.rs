use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::protocol::DEFAULT_PAGE_SIZE;
use super::model::{PropertyBag, Twin};
use super::query::TwinPredicate;
use super::store::{StoreError, TwinPage};

/// SQLite table holding all twins. Owned by a single thread, which makes
/// every etag check-and-write atomic.
pub struct TwinDb {
    conn: Connection,
}

impl TwinDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS twins (
                device_id   TEXT NOT NULL,
                module_id   TEXT NOT NULL DEFAULT '',
                version     INTEGER NOT NULL,
                device_type TEXT,
                tags        TEXT NOT NULL,
                desired     TEXT NOT NULL,
                reported    TEXT NOT NULL,
                PRIMARY KEY (device_id, module_id)
            );

            CREATE INDEX IF NOT EXISTS idx_device_type ON twins(device_type);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    pub fn get(&self, id: &str, module_id: Option<&str>) -> Result<Twin, StoreError> {
        self.find(id, module_id)?
            .ok_or_else(|| StoreError::NotFound(display_id(id, module_id)))
    }

    pub fn query(
        &self,
        predicate: &TwinPredicate,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<TwinPage, StoreError> {
        let offset = match continuation {
            Some(token) => token
                .parse::<usize>()
                .with_context(|| format!("Invalid continuation token: {token}"))?,
            None => 0,
        };
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

        let rows = match predicate.device_type_hint() {
            Some(device_type) => self.select(
                "SELECT device_id, module_id, version, tags, desired, reported
                 FROM twins WHERE device_type = ?1 ORDER BY device_id, module_id",
                params![device_type],
            )?,
            None => self.select(
                "SELECT device_id, module_id, version, tags, desired, reported
                 FROM twins ORDER BY device_id, module_id",
                params![],
            )?,
        };

        let mut matching = rows.into_iter().filter(|t| predicate.matches(t)).skip(offset);
        let twins: Vec<Twin> = matching.by_ref().take(page_size).collect();
        let continuation = matching
            .next()
            .map(|_| (offset + twins.len()).to_string());

        Ok(TwinPage { twins, continuation })
    }

    pub fn create_or_update(&self, twin: Twin, allow_duplicate: bool) -> Result<Twin, StoreError> {
        let module_id = twin.module_id.as_deref();
        let version = match self.version_of(&twin.id, module_id)? {
            Some(_) if !allow_duplicate => {
                return Err(StoreError::Conflicting(display_id(&twin.id, module_id)));
            }
            Some(version) => version + 1,
            None => 1,
        };
        let twin = Twin {
            tags: twin.tags.compact(),
            desired: twin.desired.compact(),
            reported: twin.reported.compact(),
            ..twin
        };
        self.write(&twin, version)
    }

    pub fn patch(&self, patch: Twin, etag: Option<String>, upsert: bool) -> Result<Twin, StoreError> {
        let module_id = patch.module_id.as_deref();
        let (mut current, version) = match self.find(&patch.id, module_id)? {
            Some(current) => {
                if etag.is_some() && etag != current.etag {
                    return Err(StoreError::OutOfDate(display_id(&patch.id, module_id)));
                }
                let version = parse_etag(current.etag.as_deref())?;
                (current, version + 1)
            }
            None if upsert => (Twin::new(patch.id.clone(), patch.module_id.clone()), 1),
            None => return Err(StoreError::NotFound(display_id(&patch.id, module_id))),
        };
        current.apply(&patch);
        self.write(&current, version)
    }

    pub fn delete(&self, id: &str, module_id: Option<&str>, etag: Option<String>) -> Result<(), StoreError> {
        let current = self.get(id, module_id)?;
        if etag.is_some() && etag != current.etag {
            return Err(StoreError::OutOfDate(display_id(id, module_id)));
        }
        self.conn
            .execute(
                "DELETE FROM twins WHERE device_id = ?1 AND module_id = ?2",
                params![id, module_id.unwrap_or_default()],
            )
            .context("Failed to delete twin")?;
        Ok(())
    }

    fn find(&self, id: &str, module_id: Option<&str>) -> Result<Option<Twin>, StoreError> {
        let twin = self
            .conn
            .query_row(
                "SELECT device_id, module_id, version, tags, desired, reported
                 FROM twins WHERE device_id = ?1 AND module_id = ?2",
                params![id, module_id.unwrap_or_default()],
                Self::row_to_twin,
            )
            .optional()
            .context("Failed to query twin")?;
        Ok(twin)
    }

    fn version_of(&self, id: &str, module_id: Option<&str>) -> Result<Option<i64>, StoreError> {
        let version = self
            .conn
            .query_row(
                "SELECT version FROM twins WHERE device_id = ?1 AND module_id = ?2",
                params![id, module_id.unwrap_or_default()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("Failed to query twin version")?;
        Ok(version)
    }

    fn select(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Twin>, StoreError> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare query")?;
        let twins = stmt
            .query_map(args, Self::row_to_twin)
            .context("Failed to query twins")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect twins")?;
        Ok(twins)
    }

    fn write(&self, twin: &Twin, version: i64) -> Result<Twin, StoreError> {
        let tags = serde_json::to_string(&twin.tags).context("Failed to serialize tags")?;
        let desired = serde_json::to_string(&twin.desired).context("Failed to serialize desired properties")?;
        let reported = serde_json::to_string(&twin.reported).context("Failed to serialize reported properties")?;

        self.conn
            .execute(
                r#"
                INSERT INTO twins (device_id, module_id, version, device_type, tags, desired, reported)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(device_id, module_id) DO UPDATE SET
                    version = excluded.version,
                    device_type = excluded.device_type,
                    tags = excluded.tags,
                    desired = excluded.desired,
                    reported = excluded.reported
                "#,
                params![
                    &twin.id,
                    twin.module_id.as_deref().unwrap_or_default(),
                    version,
                    twin.device_type(),
                    &tags,
                    &desired,
                    &reported,
                ],
            )
            .context("Failed to write twin")?;

        Ok(Twin {
            etag: Some(version.to_string()),
            ..twin.clone()
        })
    }

    fn row_to_twin(row: &rusqlite::Row) -> Result<Twin, rusqlite::Error> {
        let module_id: String = row.get(1)?;
        let version: i64 = row.get(2)?;
        let tags = Self::bag_column(row, 3)?;
        let desired = Self::bag_column(row, 4)?;
        let reported = Self::bag_column(row, 5)?;

        Ok(Twin {
            id: row.get(0)?,
            module_id: (!module_id.is_empty()).then_some(module_id),
            etag: Some(version.to_string()),
            tags,
            desired,
            reported,
        })
    }

    fn bag_column(row: &rusqlite::Row, idx: usize) -> Result<PropertyBag, rusqlite::Error> {
        let json: String = row.get(idx)?;
        serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    }
}

fn parse_etag(etag: Option<&str>) -> Result<i64, StoreError> {
    let etag = etag.unwrap_or("0");
    let version = etag
        .parse::<i64>()
        .with_context(|| format!("Corrupt twin version: {etag}"))?;
    Ok(version)
}

fn display_id(id: &str, module_id: Option<&str>) -> String {
    match module_id {
        Some(module) => format!("{id}/{module}"),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::model::TwinKey;

    fn test_twin(id: &str) -> Twin {
        let mut twin = Twin::new(id, None);
        twin.tags.set(TwinKey::DeviceType, "Application");
        twin.tags.set(TwinKey::SiteId, "s1");
        twin
    }

    #[test]
    fn test_create_and_get() {
        let db = TwinDb::open(":memory:").unwrap();
        let created = db.create_or_update(test_twin("uat1"), false).unwrap();
        assert_eq!(created.etag.as_deref(), Some("1"));

        let fetched = db.get("uat1", None).unwrap();
        assert_eq!(fetched.tags.get_str(&TwinKey::SiteId), Some("s1"));
        assert_eq!(fetched.etag, created.etag);

        assert!(matches!(db.get("missing", None), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_create_duplicate_conflicts() {
        let db = TwinDb::open(":memory:").unwrap();
        db.create_or_update(test_twin("uat1"), false).unwrap();

        let err = db.create_or_update(test_twin("uat1"), false).unwrap_err();
        assert!(matches!(err, StoreError::Conflicting(_)));

        let replaced = db.create_or_update(test_twin("uat1"), true).unwrap();
        assert_eq!(replaced.etag.as_deref(), Some("2"));
    }

    #[test]
    fn test_patch_checks_etag() {
        let db = TwinDb::open(":memory:").unwrap();
        let created = db.create_or_update(test_twin("uat1"), false).unwrap();

        let mut patch = Twin::new("uat1", None);
        patch.tags.set(TwinKey::DiscovererId, "d1");
        patch.tags.clear(TwinKey::SiteId);
        let patched = db.patch(patch.clone(), created.etag.clone(), false).unwrap();
        assert_eq!(patched.tags.get_str(&TwinKey::DiscovererId), Some("d1"));
        assert!(patched.tags.get(&TwinKey::SiteId).is_none());

        // Stale etag from before the first patch
        let err = db.patch(patch, created.etag, false).unwrap_err();
        assert!(matches!(err, StoreError::OutOfDate(_)));
    }

    #[test]
    fn test_patch_missing_twin() {
        let db = TwinDb::open(":memory:").unwrap();
        let patch = test_twin("uat1");
        assert!(matches!(db.patch(patch.clone(), None, false), Err(StoreError::NotFound(_))));
        let upserted = db.patch(patch, None, true).unwrap();
        assert_eq!(upserted.etag.as_deref(), Some("1"));
    }

    #[test]
    fn test_delete_with_etag() {
        let db = TwinDb::open(":memory:").unwrap();
        db.create_or_update(test_twin("uat1"), false).unwrap();

        let err = db.delete("uat1", None, Some("7".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::OutOfDate(_)));

        db.delete("uat1", None, Some("1".to_string())).unwrap();
        assert!(matches!(db.get("uat1", None), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_module_twins_are_separate() {
        let db = TwinDb::open(":memory:").unwrap();
        db.create_or_update(Twin::new("gw1", None), false).unwrap();
        db.create_or_update(Twin::new("gw1", Some("supervisor".to_string())), false).unwrap();

        let module = db.get("gw1", Some("supervisor")).unwrap();
        assert_eq!(module.module_id.as_deref(), Some("supervisor"));
        db.delete("gw1", None, None).unwrap();
        assert!(db.get("gw1", Some("supervisor")).is_ok());
    }

    #[test]
    fn test_query_pages() {
        let db = TwinDb::open(":memory:").unwrap();
        for i in 0..5 {
            db.create_or_update(test_twin(&format!("uat{i}")), false).unwrap();
        }
        let mut other = Twin::new("uep1", None);
        other.tags.set(TwinKey::DeviceType, "Endpoint");
        db.create_or_update(other, false).unwrap();

        let predicate = TwinPredicate::device_type("Application");
        let first = db.query(&predicate, None, Some(3)).unwrap();
        assert_eq!(first.twins.len(), 3);
        let second = db.query(&predicate, first.continuation.clone(), Some(3)).unwrap();
        assert_eq!(second.twins.len(), 2);
        assert!(second.continuation.is_none());

        let ids: Vec<_> = first.twins.iter().chain(&second.twins).map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["uat0", "uat1", "uat2", "uat3", "uat4"]);
    }
}
