//! SQLite-backed [`Persistence`].

use crate::error::{PersistError, PersistResult};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::item::{ContentKind, HistoryItem, ItemId, ItemRef, Representations};
use crate::persist::Persistence;
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, params};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

const ZSTD_LEVEL: i32 = 3;

pub struct SqlitePersistence {
    db: Connection,
    compress_threshold: usize,
}

impl SqlitePersistence {
    pub fn open(path: &Path, compress_threshold: usize) -> PersistResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::init_db(&db)?;
        info!("history database at {}", path.display());

        Ok(Self {
            db,
            compress_threshold,
        })
    }

    pub fn open_in_memory(compress_threshold: usize) -> PersistResult<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_db(&db)?;
        Ok(Self {
            db,
            compress_threshold,
        })
    }

    fn init_db(db: &Connection) -> PersistResult<()> {
        db.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                primary_text TEXT NOT NULL,
                first_copied_at INTEGER NOT NULL,
                last_copied_at INTEGER NOT NULL,
                pin_order INTEGER,
                source_app TEXT
            );

            CREATE TABLE IF NOT EXISTS representations (
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                data BLOB NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (item_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_last_copied ON items(last_copied_at DESC);",
        )?;

        // databases written before copy counts were tracked
        let has_copy_count: bool = db.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('items') WHERE name='copy_count'",
            [],
            |row| row.get::<_, i64>(0).map(|count| count > 0),
        )?;

        if !has_copy_count {
            db.execute(
                "ALTER TABLE items ADD COLUMN copy_count INTEGER NOT NULL DEFAULT 1",
                [],
            )?;
        }

        Ok(())
    }

    fn load_representations(&self) -> PersistResult<HashMap<i64, Representations>> {
        let mut stmt = self
            .db
            .prepare("SELECT item_id, kind, data, compressed FROM representations")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)? != 0,
            ))
        })?;

        let mut by_item: HashMap<i64, Representations> = HashMap::new();
        let mut corrupt = HashSet::new();
        for row in rows {
            let (item_id, kind, data, compressed) = row?;
            let data = if compressed {
                match decompress(&data) {
                    Ok(out) => out,
                    Err(e) => {
                        let e = PersistError::Corrupt {
                            id: item_id,
                            reason: format!("{} payload: {}", kind, e),
                        };
                        warn!("skipping unreadable history item: {}", e);
                        corrupt.insert(item_id);
                        continue;
                    }
                }
            } else {
                data
            };
            by_item
                .entry(item_id)
                .or_default()
                .insert(ContentKind::from_tag(&kind), data);
        }
        // a partially readable item would lose payloads on its next save
        by_item.retain(|id, _| !corrupt.contains(id));
        Ok(by_item)
    }
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = zstd::stream::read::Decoder::new(data)?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn encode(bytes: &[u8], compress_threshold: usize) -> PersistResult<(Vec<u8>, bool)> {
    if bytes.len() <= compress_threshold {
        return Ok((bytes.to_vec(), false));
    }
    let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    encoder.write_all(bytes)?;
    Ok((encoder.finish()?, true))
}

fn write_item(tx: &Transaction<'_>, item: &HistoryItem, compress_threshold: usize) -> PersistResult<()> {
    tx.execute(
        "INSERT INTO items
            (id, fingerprint, primary_text, first_copied_at, last_copied_at, copy_count, pin_order, source_app)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            primary_text = excluded.primary_text,
            first_copied_at = excluded.first_copied_at,
            last_copied_at = excluded.last_copied_at,
            copy_count = excluded.copy_count,
            pin_order = excluded.pin_order,
            source_app = excluded.source_app",
        params![
            item.id.0 as i64,
            item.fingerprint.to_hex(),
            item.primary_text,
            item.first_copied_at,
            item.last_copied_at,
            item.copy_count as i64,
            item.pin_order.map(|order| order as i64),
            item.source_application,
        ],
    )?;

    tx.execute(
        "DELETE FROM representations WHERE item_id = ?1",
        params![item.id.0 as i64],
    )?;
    let mut stmt = tx.prepare_cached(
        "INSERT INTO representations (item_id, kind, data, compressed) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (kind, bytes) in item.representations.iter() {
        let (data, compressed) = encode(bytes, compress_threshold)?;
        stmt.execute(params![item.id.0 as i64, kind.tag(), data, compressed as i64])?;
    }
    Ok(())
}

impl Persistence for SqlitePersistence {
    fn load(&mut self) -> PersistResult<Vec<HistoryItem>> {
        let mut representations = self.load_representations()?;

        let mut stmt = self.db.prepare(
            "SELECT id, fingerprint, primary_text, first_copied_at, last_copied_at, copy_count, pin_order, source_app
             FROM items
             ORDER BY pin_order IS NULL, pin_order ASC, last_copied_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, stored_fingerprint, primary_text, first, last, copy_count, pin_order, source_app) = row?;

            let Some(reps) = representations.remove(&id).filter(|r| !r.is_empty()) else {
                debug!("skipping item {} without representations", id);
                continue;
            };
            let fingerprint = Fingerprint::from_hex(&stored_fingerprint).unwrap_or_else(|| {
                let e = PersistError::Corrupt {
                    id,
                    reason: format!("bad fingerprint {:?}", stored_fingerprint),
                };
                warn!("{}, recomputing", e);
                fingerprint(&reps)
            });

            items.push(HistoryItem {
                id: ItemId(id as u64),
                representations: reps,
                primary_text,
                fingerprint,
                first_copied_at: first,
                last_copied_at: last,
                copy_count: copy_count.max(1) as u32,
                pin_order: pin_order.map(|order| order as u32),
                source_application: source_app,
            });
        }

        info!("loaded {} history items", items.len());
        Ok(items)
    }

    fn save(&mut self, item: &HistoryItem) -> PersistResult<()> {
        let threshold = self.compress_threshold;
        let tx = self.db.transaction()?;
        write_item(&tx, item, threshold)?;
        tx.commit()?;
        Ok(())
    }

    fn save_all(&mut self, items: &[ItemRef]) -> PersistResult<()> {
        let threshold = self.compress_threshold;
        let tx = self.db.transaction()?;
        for item in items {
            write_item(&tx, item, threshold)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, id: ItemId) -> PersistResult<()> {
        self.db
            .execute("DELETE FROM items WHERE id = ?1", params![id.0 as i64])?;
        Ok(())
    }
    fn max_id(&mut self) -> PersistResult<Option<ItemId>> {
        let max: Option<i64> = self
            .db
            .query_row("SELECT MAX(id) FROM items", [], |row| row.get(0))?;
        Ok(max.map(|id| ItemId(id as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn item(id: u64, reps: Representations, last: i64, pin_order: Option<u32>) -> HistoryItem {
        HistoryItem {
            id: ItemId(id),
            primary_text: reps.primary_text(),
            fingerprint: fingerprint(&reps),
            representations: reps,
            first_copied_at: last - 10,
            last_copied_at: last,
            copy_count: 2,
            pin_order,
            source_application: Some("Terminal".to_string()),
        }
    }

    #[test]
    fn load_orders_pinned_then_recent() {
        let mut db = SqlitePersistence::open_in_memory(4096).unwrap();
        db.save(&item(1, Representations::text("old"), 100, None)).unwrap();
        db.save(&item(2, Representations::text("new"), 300, None)).unwrap();
        db.save(&item(3, Representations::text("pin b"), 50, Some(1))).unwrap();
        db.save(&item(4, Representations::text("pin a"), 10, Some(0))).unwrap();

        let texts: Vec<String> = db.load().unwrap().into_iter().map(|i| i.primary_text).collect();
        assert_eq!(texts, vec!["pin a", "pin b", "new", "old"]);
    }

    #[test]
    fn large_payloads_are_compressed_transparently() {
        let mut db = SqlitePersistence::open_in_memory(16).unwrap();
        let mut reps = Representations::text("x".repeat(10_000));
        reps.insert(ContentKind::Png, vec![7u8; 32]);
        let original = item(1, reps, 100, None);
        db.save(&original).unwrap();

        let stored: i64 = db
            .db
            .query_row(
                "SELECT SUM(compressed) FROM representations WHERE item_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(db.load().unwrap(), vec![original]);
    }

    #[test]
    fn save_replaces_and_delete_cascades() {
        let mut db = SqlitePersistence::open_in_memory(4096).unwrap();
        let mut reps = Representations::text("a");
        reps.insert(ContentKind::Html, b"<b>a</b>".to_vec());
        db.save(&item(1, reps, 100, None)).unwrap();
        db.save(&item(1, Representations::text("a"), 200, Some(0))).unwrap();

        let loaded = db.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].representations.len(), 1);
        assert_eq!(loaded[0].pin_order, Some(0));

        db.delete(ItemId(1)).unwrap();
        assert!(db.load().unwrap().is_empty());
        let orphans: i64 = db
            .db
            .query_row("SELECT COUNT(*) FROM representations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn unreadable_rows_are_skipped_not_fatal() {
        let mut db = SqlitePersistence::open_in_memory(16).unwrap();
        db.save(&item(1, Representations::text("fine"), 100, None)).unwrap();
        db.save(&item(2, Representations::text("z".repeat(100)), 200, None)).unwrap();
        db.save(&item(3, Representations::text("relabelled"), 300, Some(0))).unwrap();

        db.db
            .execute("UPDATE representations SET data = x'00' WHERE item_id = 2", [])
            .unwrap();
        db.db
            .execute("UPDATE items SET fingerprint = 'not hex' WHERE id = 3", [])
            .unwrap();

        let loaded = db.load().unwrap();
        let ids: Vec<ItemId> = loaded.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![ItemId(3), ItemId(1)]);
        assert_eq!(loaded[0].fingerprint, fingerprint(&Representations::text("relabelled")));

        // the skipped row keeps its id reserved and its data untouched
        assert_eq!(db.max_id().unwrap(), Some(ItemId(3)));
        let kept: i64 = db
            .db
            .query_row("SELECT COUNT(*) FROM items WHERE id = 2", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let mut db = SqlitePersistence::open(&path, 4096).unwrap();
            db.save(&item(9, Representations::text("kept"), 1, None)).unwrap();
        }
        let mut db = SqlitePersistence::open(&path, 4096).unwrap();
        let loaded = db.load().unwrap();
        assert_eq!(loaded[0].id, ItemId(9));
        assert_eq!(loaded[0].copy_count, 2);
        assert_eq!(loaded[0].source_application.as_deref(), Some("Terminal"));
    }
}
