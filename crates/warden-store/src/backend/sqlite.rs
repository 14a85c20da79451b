// backend/sqlite.rs - Durable storage backend on SQLite.
//
// Tables:
//   entities         (kind, id) -> attributes document, data blob, version
//   attribute_index  (kind, name, entity_id) -> value, indexed by value
//   audit_records    append-only, AUTOINCREMENT sequence
//   staff_profiles   user_id -> roles / permissions / denied documents
//
// Every commit runs in one transaction. Timestamps are stored as RFC 3339
// text with fixed microsecond precision, so lexical order is time order.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::json;
use warden_audit::{AuditRecord, AuditTrail, EntityKind, EntityRef, NewAuditRecord};
use warden_policy::StaffProfile;

use super::{conflict, AttributeChange, ProfileCommit, StorageBackend};
use crate::error::StoreError;
use crate::value::{AttributeValue, Entity};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    kind        TEXT    NOT NULL,
    id          INTEGER NOT NULL,
    attributes  TEXT    NOT NULL DEFAULT '{}',
    data        TEXT    NOT NULL DEFAULT '{}',
    version     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL,
    PRIMARY KEY (kind, id)
);
CREATE TABLE IF NOT EXISTS attribute_index (
    kind       TEXT    NOT NULL,
    name       TEXT    NOT NULL,
    entity_id  INTEGER NOT NULL,
    value      TEXT    NOT NULL,
    PRIMARY KEY (kind, name, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_attribute_index_value
    ON attribute_index (kind, name, value);
CREATE TABLE IF NOT EXISTS audit_records (
    sequence_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_kind     TEXT    NOT NULL,
    entity_id       INTEGER NOT NULL,
    attribute_name  TEXT    NOT NULL,
    old_value       TEXT,
    new_value       TEXT,
    actor_id        INTEGER,
    reason          TEXT    NOT NULL,
    recorded_at     TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_entity
    ON audit_records (entity_kind, entity_id, sequence_id);
CREATE INDEX IF NOT EXISTS idx_audit_time
    ON audit_records (recorded_at);
CREATE TABLE IF NOT EXISTS staff_profiles (
    user_id           INTEGER PRIMARY KEY,
    roles             TEXT    NOT NULL DEFAULT '[]',
    role_permissions  TEXT    NOT NULL DEFAULT '{}',
    denied_commands   TEXT    NOT NULL DEFAULT '[]',
    version           INTEGER NOT NULL,
    created_at        TEXT,
    updated_at        TEXT,
    created_by        INTEGER,
    updated_by        INTEGER
);
";

const AUDIT_COLUMNS: &str = "sequence_id, entity_kind, entity_id, attribute_name, old_value, \
                             new_value, actor_id, reason, recorded_at";

const PROFILE_COLUMNS: &str = "user_id, roles, role_permissions, denied_commands, version, \
                               created_at, updated_at, created_by, updated_by";

/// SQLite storage behind one connection. Every call takes the connection
/// mutex, so commits for different identities run one after another.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("sqlite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditTrail for SqliteBackend {
    type Error = StoreError;

    fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let record = insert_audit(&tx, record)?;
        tx.commit()?;
        Ok(record)
    }

    fn query_by_entity(
        &self,
        entity: EntityRef,
        limit: Option<usize>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.conn();
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_records
             WHERE entity_kind = ?1 AND entity_id = ?2
             ORDER BY sequence_id DESC LIMIT ?3",
            AUDIT_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![entity.kind.as_str(), to_sql_id(entity.id), limit],
            AuditRow::read,
        )?;
        collect_audit(rows)
    }

    fn query_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_records
             WHERE recorded_at >= ?1 AND recorded_at <= ?2
             ORDER BY sequence_id ASC",
            AUDIT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![timestamp(from), timestamp(to)], AuditRow::read)?;
        collect_audit(rows)
    }
}

impl StorageBackend for SqliteBackend {
    fn ping(&self) -> Result<(), StoreError> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn load_or_create_entity(&self, key: EntityRef, now: DateTime<Utc>) -> Result<Entity, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let entity = ensure_entity(&tx, key, now)?;
        tx.commit()?;
        Ok(entity)
    }

    fn commit_attribute(
        &self,
        key: EntityRef,
        expected_version: u64,
        change: &AttributeChange,
        now: DateTime<Utc>,
    ) -> Result<AuditRecord, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut entity = ensure_entity(&tx, key, now)?;
        if entity.version != expected_version {
            return Err(conflict(key));
        }
        let old = entity.apply(&change.name, change.value.clone());
        entity.version += 1;
        entity.updated_at = now;
        write_attributes(&tx, &entity)?;
        write_index(&tx, key, &change.name, change.value.as_ref())?;

        let record = insert_audit(
            &tx,
            NewAuditRecord {
                entity: key,
                attribute_name: change.name.clone(),
                old_value: old.as_ref().map(AttributeValue::to_json),
                new_value: change.value.as_ref().map(AttributeValue::to_json),
                actor_id: change.actor_id,
                reason: change.reason.clone(),
                recorded_at: now,
            },
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn write_entity_data(
        &self,
        key: EntityRef,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_entity(&tx, key, now)?;
        tx.execute(
            "UPDATE entities SET data = ?1, version = version + 1, updated_at = ?2
             WHERE kind = ?3 AND id = ?4",
            params![
                serde_json::to_string(data)?,
                timestamp(now),
                key.kind.as_str(),
                to_sql_id(key.id)
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn entities_with(
        &self,
        kind: EntityKind,
        name: &str,
        value: Option<&AttributeValue>,
    ) -> Result<BTreeSet<u64>, StoreError> {
        let conn = self.conn();
        let ids: Vec<i64> = match value {
            None => {
                let mut stmt = conn.prepare(
                    "SELECT entity_id FROM attribute_index WHERE kind = ?1 AND name = ?2",
                )?;
                let rows = stmt.query_map(params![kind.as_str(), name], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
            Some(value) => {
                let mut stmt = conn.prepare(
                    "SELECT entity_id FROM attribute_index
                     WHERE kind = ?1 AND name = ?2 AND value = ?3",
                )?;
                let rows = stmt.query_map(
                    params![kind.as_str(), name, serde_json::to_string(value)?],
                    |row| row.get(0),
                )?;
                rows.collect::<Result<_, _>>()?
            }
        };
        Ok(ids.into_iter().map(from_sql_id).collect())
    }

    fn load_profile(&self, user_id: u64) -> Result<Option<StaffProfile>, StoreError> {
        let conn = self.conn();
        select_profile(&conn, user_id)
    }

    fn list_profiles(&self) -> Result<Vec<StaffProfile>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM staff_profiles ORDER BY user_id ASC",
            PROFILE_COLUMNS
        ))?;
        let rows = stmt.query_map([], ProfileRow::read)?;
        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?.into_profile()?);
        }
        // Ids past i64::MAX are stored negative; restore unsigned order.
        profiles.sort_by_key(|profile| profile.user_id);
        Ok(profiles)
    }

    fn commit_profile(&self, commit: &ProfileCommit) -> Result<Vec<AuditRecord>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let profile = &commit.profile;
        let user_id = to_sql_id(profile.user_id);

        let stored_version: Option<i64> = tx
            .query_row(
                "SELECT version FROM staff_profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        let stored_version = stored_version.map(from_sql_version).transpose()?.unwrap_or(0);
        if stored_version != commit.expected_version {
            return Err(conflict(format!("staff profile {}", profile.user_id)));
        }

        let roles: Vec<&str> = profile.roles().map(|role| role.as_str()).collect();
        tx.execute(
            "INSERT INTO staff_profiles
                 (user_id, roles, role_permissions, denied_commands, version,
                  created_at, updated_at, created_by, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id) DO UPDATE SET
                 roles = excluded.roles,
                 role_permissions = excluded.role_permissions,
                 denied_commands = excluded.denied_commands,
                 version = excluded.version,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at,
                 created_by = excluded.created_by,
                 updated_by = excluded.updated_by",
            params![
                user_id,
                serde_json::to_string(&roles)?,
                serde_json::to_string(profile.role_permissions())?,
                serde_json::to_string(profile.denied_commands())?,
                to_sql_version(commit.expected_version + 1)?,
                profile.created_at.map(timestamp),
                profile.updated_at.map(timestamp),
                profile.created_by.map(to_sql_id),
                profile.updated_by.map(to_sql_id),
            ],
        )?;

        let mut records = Vec::with_capacity(commit.audit.len() + commit.projections.len());
        for record in &commit.audit {
            records.push(insert_audit(&tx, record.clone())?);
        }

        let key = EntityRef::user(profile.user_id);
        for projection in &commit.projections {
            let mut entity = ensure_entity(&tx, key, commit.committed_at)?;
            let old = entity.get(&projection.name).cloned();
            if old == projection.value {
                continue;
            }
            entity.apply(&projection.name, projection.value.clone());
            entity.version += 1;
            entity.updated_at = commit.committed_at;
            write_attributes(&tx, &entity)?;
            write_index(&tx, key, &projection.name, projection.value.as_ref())?;
            let record = commit.projection_record(key, projection, old.as_ref());
            records.push(insert_audit(&tx, record)?);
        }

        tx.commit()?;
        Ok(records)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, target: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            target: target.to_string(),
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

// SQLite integers are signed; ids are stored bit-for-bit so the whole u64
// range round-trips. Ids at or above 2^63 therefore read back negative in SQL.
fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}

fn to_sql_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Database(format!("version {} overflow", version)))
}

fn from_sql_version(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::Corrupt {
        target: "version".to_string(),
        reason: format!("negative version {}", version),
    })
}

fn collect_audit(
    rows: impl Iterator<Item = rusqlite::Result<AuditRow>>,
) -> Result<Vec<AuditRecord>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_record()?);
    }
    Ok(out)
}

/// Read an entity row, inserting an empty one if it does not exist.
fn ensure_entity(tx: &Transaction<'_>, key: EntityRef, now: DateTime<Utc>) -> Result<Entity, StoreError> {
    let id = to_sql_id(key.id);
    tx.execute(
        "INSERT OR IGNORE INTO entities (kind, id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![key.kind.as_str(), id, timestamp(now)],
    )?;
    let (attributes, data, version, created_at, updated_at): (String, String, i64, String, String) =
        tx.query_row(
            "SELECT attributes, data, version, created_at, updated_at
             FROM entities WHERE kind = ?1 AND id = ?2",
            params![key.kind.as_str(), id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

    let target = key.to_string();
    let attributes = serde_json::from_str(&attributes).map_err(|e| StoreError::Corrupt {
        target: target.clone(),
        reason: format!("attributes document: {}", e),
    })?;
    Ok(Entity {
        key,
        attributes,
        data: serde_json::from_str(&data)?,
        version: from_sql_version(version)?,
        created_at: parse_timestamp(&created_at, &target)?,
        updated_at: parse_timestamp(&updated_at, &target)?,
    })
}

fn write_attributes(tx: &Transaction<'_>, entity: &Entity) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE entities SET attributes = ?1, version = ?2, updated_at = ?3
         WHERE kind = ?4 AND id = ?5",
        params![
            serde_json::to_string(&entity.attributes)?,
            to_sql_version(entity.version)?,
            timestamp(entity.updated_at),
            entity.key.kind.as_str(),
            to_sql_id(entity.key.id)
        ],
    )?;
    Ok(())
}

fn write_index(
    tx: &Transaction<'_>,
    key: EntityRef,
    name: &str,
    value: Option<&AttributeValue>,
) -> Result<(), StoreError> {
    let id = to_sql_id(key.id);
    match value {
        Some(value) => tx.execute(
            "INSERT INTO attribute_index (kind, name, entity_id, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, name, entity_id) DO UPDATE SET value = excluded.value",
            params![key.kind.as_str(), name, id, serde_json::to_string(value)?],
        )?,
        None => tx.execute(
            "DELETE FROM attribute_index WHERE kind = ?1 AND name = ?2 AND entity_id = ?3",
            params![key.kind.as_str(), name, id],
        )?,
    };
    Ok(())
}

fn insert_audit(tx: &Transaction<'_>, record: NewAuditRecord) -> Result<AuditRecord, StoreError> {
    let old_value = record.old_value.as_ref().map(serde_json::to_string).transpose()?;
    let new_value = record.new_value.as_ref().map(serde_json::to_string).transpose()?;
    tx.execute(
        "INSERT INTO audit_records
             (entity_kind, entity_id, attribute_name, old_value, new_value,
              actor_id, reason, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.entity.kind.as_str(),
            to_sql_id(record.entity.id),
            record.attribute_name,
            old_value,
            new_value,
            record.actor_id.map(to_sql_id),
            record.reason,
            timestamp(record.recorded_at),
        ],
    )?;
    let sequence_id = from_sql_id(tx.last_insert_rowid());
    Ok(record.into_record(sequence_id))
}

/// Raw columns of an audit_records row.
struct AuditRow {
    sequence_id: i64,
    kind: String,
    entity_id: i64,
    attribute_name: String,
    old_value: Option<String>,
    new_value: Option<String>,
    actor_id: Option<i64>,
    reason: String,
    recorded_at: String,
}

impl AuditRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence_id: row.get(0)?,
            kind: row.get(1)?,
            entity_id: row.get(2)?,
            attribute_name: row.get(3)?,
            old_value: row.get(4)?,
            new_value: row.get(5)?,
            actor_id: row.get(6)?,
            reason: row.get(7)?,
            recorded_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<AuditRecord, StoreError> {
        let target = format!("audit record {}", self.sequence_id);
        let kind: EntityKind = self.kind.parse().map_err(|reason| StoreError::Corrupt {
            target: target.clone(),
            reason,
        })?;
        let old_value: Option<serde_json::Value> =
            self.old_value.as_deref().map(serde_json::from_str).transpose()?;
        let new_value: Option<serde_json::Value> =
            self.new_value.as_deref().map(serde_json::from_str).transpose()?;
        Ok(AuditRecord {
            sequence_id: from_sql_id(self.sequence_id),
            entity: EntityRef::new(kind, from_sql_id(self.entity_id)),
            attribute_name: self.attribute_name,
            old_value,
            new_value,
            actor_id: self.actor_id.map(from_sql_id),
            reason: self.reason,
            recorded_at: parse_timestamp(&self.recorded_at, &target)?,
        })
    }
}

/// Raw columns of a staff_profiles row.
struct ProfileRow {
    user_id: i64,
    roles: String,
    role_permissions: String,
    denied_commands: String,
    version: i64,
    created_at: Option<String>,
    updated_at: Option<String>,
    created_by: Option<i64>,
    updated_by: Option<i64>,
}

impl ProfileRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            roles: row.get(1)?,
            role_permissions: row.get(2)?,
            denied_commands: row.get(3)?,
            version: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            created_by: row.get(7)?,
            updated_by: row.get(8)?,
        })
    }

    /// Assemble the profile through serde so the role invariants applied
    /// on deserialization hold for stored rows too.
    fn into_profile(self) -> Result<StaffProfile, StoreError> {
        let target = format!("staff profile {}", from_sql_id(self.user_id));
        let corrupt = |reason: String| StoreError::Corrupt {
            target: target.clone(),
            reason,
        };
        let document = json!({
            "user_id": from_sql_id(self.user_id),
            "roles": serde_json::from_str::<serde_json::Value>(&self.roles)?,
            "role_permissions": serde_json::from_str::<serde_json::Value>(&self.role_permissions)?,
            "denied_commands": serde_json::from_str::<serde_json::Value>(&self.denied_commands)?,
            "version": from_sql_version(self.version)?,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "created_by": self.created_by.map(from_sql_id),
            "updated_by": self.updated_by.map(from_sql_id),
        });
        serde_json::from_value(document).map_err(|e| corrupt(e.to_string()))
    }
}

fn select_profile(conn: &Connection, user_id: u64) -> Result<Option<StaffProfile>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM staff_profiles WHERE user_id = ?1", PROFILE_COLUMNS),
            params![to_sql_id(user_id)],
            ProfileRow::read,
        )
        .optional()?;
    row.map(ProfileRow::into_profile).transpose()
}
