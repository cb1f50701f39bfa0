//! On-disk cache for consented state slices plus the consent record itself.
//!
//! Storage failures never fail a dispatch; they are logged and the entry is
//! simply not durable. The in-memory state remains authoritative.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::consent::{Category, ConsentRecord, CookiesPreferences};
use crate::interceptors::EntryKey;

const CONSENT_PREFS_KEY: &str = "cookies";
const CONSENT_DATE_KEY: &str = "cookieConsentDate";

pub fn open_cache_db(data_dir: &str) -> Result<Connection, rusqlite::Error> {
    let path = std::path::Path::new(data_dir).join("amity_cache.sqlite3");
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            data TEXT NOT NULL
        );",
    )
}

fn category_name(category: Category) -> &'static str {
    match category {
        Category::Auth => "auth",
        Category::Cache => "cache",
        Category::Settings => "settings",
    }
}

fn put(conn: &Connection, key: &str, category: Category, data: &str, now: i64) {
    let updated_at = Utc
        .timestamp_opt(now, 0)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
        .unwrap_or_default();
    if let Err(e) = conn.execute(
        "INSERT INTO cache_entries (key, category, updated_at, data)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
            category = excluded.category,
            updated_at = excluded.updated_at,
            data = excluded.data",
        rusqlite::params![key, category_name(category), updated_at, data],
    ) {
        tracing::warn!(%e, key, "failed to write cache entry");
    }
}

fn get(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT data FROM cache_entries WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .ok()
}

pub fn save_entry(conn: &Connection, key: EntryKey, json: &str, now: i64) {
    put(conn, key.name(), key.category(), json, now);
}

pub fn load_entry(conn: &Connection, key: EntryKey) -> Option<String> {
    get(conn, key.name())
}

pub fn evict_entries(conn: &Connection, keys: &[EntryKey]) {
    for key in keys {
        if let Err(e) = conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key.name()]) {
            tracing::warn!(%e, key = key.name(), "failed to evict cache entry");
        }
    }
}

pub fn save_consent(conn: &Connection, record: &ConsentRecord) {
    let prefs = match serde_json::to_string(&record.preferences) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(%e, "failed to serialize consent preferences");
            return;
        }
    };
    put(conn, CONSENT_PREFS_KEY, Category::Auth, &prefs, record.consent_date);
    let date = Utc
        .timestamp_opt(record.consent_date, 0)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
        .unwrap_or_default();
    put(conn, CONSENT_DATE_KEY, Category::Auth, &date, record.consent_date);
}

pub fn load_consent(conn: &Connection) -> Option<ConsentRecord> {
    let prefs_json = get(conn, CONSENT_PREFS_KEY)?;
    let preferences: CookiesPreferences = serde_json::from_str(&prefs_json).ok()?;
    let date_str = get(conn, CONSENT_DATE_KEY)?;
    let consent_date = DateTime::parse_from_rfc3339(&date_str).ok()?.timestamp();
    Some(ConsentRecord {
        preferences,
        consent_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn entry_save_load_roundtrip() {
        let conn = test_db();
        assert!(load_entry(&conn, EntryKey::Locale).is_none());

        save_entry(&conn, EntryKey::Locale, "\"fr\"", 1_000);
        assert_eq!(load_entry(&conn, EntryKey::Locale).as_deref(), Some("\"fr\""));

        // Overwrite wins.
        save_entry(&conn, EntryKey::Locale, "\"de\"", 2_000);
        assert_eq!(load_entry(&conn, EntryKey::Locale).as_deref(), Some("\"de\""));
    }

    #[test]
    fn eviction_is_selective() {
        let conn = test_db();
        save_entry(&conn, EntryKey::Offers, "[]", 1_000);
        save_entry(&conn, EntryKey::Locale, "\"fr\"", 1_000);

        evict_entries(&conn, &[EntryKey::Offers, EntryKey::Interests]);

        assert!(load_entry(&conn, EntryKey::Offers).is_none());
        assert_eq!(load_entry(&conn, EntryKey::Locale).as_deref(), Some("\"fr\""));
    }

    #[test]
    fn consent_roundtrip() {
        let conn = test_db();
        assert!(load_consent(&conn).is_none());

        let record = ConsentRecord {
            preferences: CookiesPreferences {
                auth: true,
                cache: true,
                settings: false,
            },
            consent_date: 1_700_000_000,
        };
        save_consent(&conn, &record);
        assert_eq!(load_consent(&conn), Some(record));
    }
}
