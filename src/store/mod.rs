//! SQLite-backed cache of guilds, members, and unguilded players.
//!
//! Writes are serialized by the single-worker scan queue; reads come from
//! concurrent request handlers. A `Mutex<Connection>` gives both sides a
//! consistent view, and the reconciliation sequence runs inside one
//! transaction so a reader never observes a player between guilds.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::client::GuildInfo;
use crate::error::StoreError;

/// Schema version stamp; migrations are additive, never destructive.
const SCHEMA_VERSION: i32 = 2;

type Result<T> = std::result::Result<T, StoreError>;

/// Durable key-addressed storage for the three entity kinds.
pub struct GuildStore {
    conn: Mutex<Connection>,
}

/// Which table, if any, holds a player's record.
///
/// Membership state is a tagged variant backed by a single lookup rather
/// than something inferred piecemeal from row absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// No row in members or unguilded
    Unknown,
    /// Row in members
    Guilded { guild_id: String, last_scan: i64 },
    /// Row in unguilded
    Unguilded { last_scan: i64 },
}

/// Guild row
#[derive(Debug, Clone, Serialize)]
pub struct GuildRecord {
    pub id: String,
    pub name: String,
    pub tag: Option<String>,
    pub last_scan: i64,
    pub avg_level: Option<f64>,
}

/// One member of a guild roster
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub uuid: String,
    pub rank: Option<String>,
}

/// Guild summary for the listing endpoint
#[derive(Debug, Clone, Serialize)]
pub struct GuildOverview {
    pub id: String,
    pub name: String,
    pub tag: Option<String>,
    pub avg_level: Option<f64>,
    pub member_count: i64,
    pub last_scan: i64,
}

/// Player confirmed by a prior scan to belong to no guild
#[derive(Debug, Clone, Serialize)]
pub struct UnguildedRecord {
    pub uuid: String,
    pub name: Option<String>,
    pub last_scan: i64,
}

/// Member selected for a secondary-metric refresh
#[derive(Debug, Clone)]
pub struct SweepCandidate {
    pub uuid: String,
    pub guild_id: String,
    pub level_checked_at: Option<i64>,
}

/// What a guild-scan reconciliation changed
#[derive(Debug, Clone, Copy)]
pub struct GuildScanOutcome {
    /// True when the guild row was created by this scan
    pub guild_added: bool,
    /// Member rows inserted or refreshed
    pub members_upserted: usize,
}

impl GuildStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("Failed to create data dir: {}", e)))?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store for testing
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS guilds (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                tag TEXT,
                last_scan INTEGER NOT NULL DEFAULT 0,
                avg_level REAL
            );

            CREATE TABLE IF NOT EXISTS members (
                uuid TEXT PRIMARY KEY NOT NULL,
                guild_id TEXT NOT NULL,
                rank TEXT,
                last_scan INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS unguilded (
                uuid TEXT PRIMARY KEY NOT NULL,
                name TEXT,
                last_scan INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_members_guild ON members(guild_id);
            "#,
        )?;

        // Level columns arrived after the first release; pre-existing rows
        // must survive, so the columns are added in place when missing.
        add_column_if_missing(&conn, "members", "level", "REAL")?;
        add_column_if_missing(&conn, "members", "level_checked_at", "INTEGER")?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Single lookup backing the per-player state machine.
    pub fn membership(&self, uuid: &str) -> Result<Membership> {
        let conn = self.lock();

        let member: Option<(String, i64)> = conn
            .query_row(
                "SELECT guild_id, last_scan FROM members WHERE uuid = ?1",
                [uuid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((guild_id, last_scan)) = member {
            return Ok(Membership::Guilded { guild_id, last_scan });
        }

        let unguilded: Option<i64> = conn
            .query_row(
                "SELECT last_scan FROM unguilded WHERE uuid = ?1",
                [uuid],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match unguilded {
            Some(last_scan) => Membership::Unguilded { last_scan },
            None => Membership::Unknown,
        })
    }

    /// Seed a never-scanned player; last_scan = 0 means "never scanned".
    pub fn insert_placeholder(&self, uuid: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO unguilded (uuid, name, last_scan) VALUES (?1, NULL, 0)
             ON CONFLICT(uuid) DO NOTHING",
            [uuid],
        )?;
        Ok(())
    }

    /// Record that a scan confirmed `uuid` belongs to no guild.
    ///
    /// Removes any stale Member row in the same transaction: a player with
    /// no current guild cannot remain listed as a member of a prior one.
    pub fn apply_unguilded_scan(&self, uuid: &str, name: Option<&str>, now: i64) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM members WHERE uuid = ?1", [uuid])?;
        tx.execute(
            "INSERT INTO unguilded (uuid, name, last_scan) VALUES (?1, ?2, ?3)
             ON CONFLICT(uuid) DO UPDATE SET
                 name = COALESCE(excluded.name, name),
                 last_scan = excluded.last_scan",
            params![uuid, name, now],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Reconcile a successful guild fetch for `uuid`.
    ///
    /// One transaction covers: unguilded cleanup for the scanned player and
    /// everyone on the fetched roster, the stale-membership delete when the
    /// player's guild changed, the guild upsert, and the member upserts, all
    /// stamped with the same scan timestamp. Members of the guild absent
    /// from this fetch are left untouched; a single player's scan never
    /// removes other players from the roster.
    pub fn apply_guild_scan(
        &self,
        uuid: &str,
        guild: &GuildInfo,
        now: i64,
    ) -> Result<GuildScanOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existed: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM guilds WHERE id = ?1)",
            [&guild.id],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM unguilded WHERE uuid = ?1", [uuid])?;

        // A player recorded under a different guild moves on their own scan.
        let prior: Option<String> = tx
            .query_row(
                "SELECT guild_id FROM members WHERE uuid = ?1",
                [uuid],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(prior_guild) = prior {
            if prior_guild != guild.id {
                tx.execute("DELETE FROM members WHERE uuid = ?1", [uuid])?;
            }
        }

        tx.execute(
            "INSERT INTO guilds (id, name, tag, last_scan) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 tag = excluded.tag,
                 last_scan = excluded.last_scan",
            params![guild.id, guild.name, guild.tag, now],
        )?;

        let mut upserted = 0;
        for entry in &guild.members {
            // Anyone on the fetched roster is confirmed guilded.
            tx.execute("DELETE FROM unguilded WHERE uuid = ?1", [&entry.uuid])?;
            tx.execute(
                "INSERT INTO members (uuid, guild_id, rank, last_scan) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uuid) DO UPDATE SET
                     guild_id = excluded.guild_id,
                     rank = excluded.rank,
                     last_scan = excluded.last_scan",
                params![entry.uuid, guild.id, entry.rank, now],
            )?;
            upserted += 1;
        }

        tx.commit()?;

        Ok(GuildScanOutcome {
            guild_added: !existed,
            members_upserted: upserted,
        })
    }

    /// Look up a guild and its cached roster by identifier.
    pub fn guild_by_id(&self, id: &str) -> Result<Option<(GuildRecord, Vec<MemberRecord>)>> {
        let conn = self.lock();
        let guild = conn
            .query_row(
                "SELECT id, name, tag, last_scan, avg_level FROM guilds WHERE id = ?1",
                [id],
                row_to_guild,
            )
            .optional()?;
        attach_members(&conn, guild)
    }

    /// Look up a guild and its cached roster by display name.
    pub fn guild_by_name(&self, name: &str) -> Result<Option<(GuildRecord, Vec<MemberRecord>)>> {
        let conn = self.lock();
        let guild = conn
            .query_row(
                "SELECT id, name, tag, last_scan, avg_level FROM guilds
                 WHERE name = ?1 COLLATE NOCASE",
                [name],
                row_to_guild,
            )
            .optional()?;
        attach_members(&conn, guild)
    }

    /// All guilds with member counts, best average level first.
    pub fn guilds_overview(&self) -> Result<Vec<GuildOverview>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT g.id, g.name, g.tag, g.avg_level, COUNT(m.uuid), g.last_scan
             FROM guilds g LEFT JOIN members m ON m.guild_id = g.id
             GROUP BY g.id
             ORDER BY g.avg_level DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GuildOverview {
                id: row.get(0)?,
                name: row.get(1)?,
                tag: row.get(2)?,
                avg_level: row.get(3)?,
                member_count: row.get(4)?,
                last_scan: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// All players confirmed to belong to no guild.
    pub fn unguilded_all(&self) -> Result<Vec<UnguildedRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, last_scan FROM unguilded ORDER BY last_scan DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UnguildedRecord {
                uuid: row.get(0)?,
                name: row.get(1)?,
                last_scan: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    pub fn guild_count(&self) -> Result<i64> {
        let count = self
            .lock()
            .query_row("SELECT COUNT(*) FROM guilds", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Distinct players tracked. The exclusivity invariant makes a plain
    /// sum across both tables a distinct count.
    pub fn player_count(&self) -> Result<i64> {
        let count = self.lock().query_row(
            "SELECT (SELECT COUNT(*) FROM members) + (SELECT COUNT(*) FROM unguilded)",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Members least recently level-checked; never-checked rows sort first.
    pub fn members_due_level_refresh(&self, limit: usize) -> Result<Vec<SweepCandidate>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, guild_id, level_checked_at FROM members
             ORDER BY level_checked_at ASC, uuid ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(SweepCandidate {
                uuid: row.get(0)?,
                guild_id: row.get(1)?,
                level_checked_at: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// Guild the player currently belongs to, if any.
    pub fn member_guild(&self, uuid: &str) -> Result<Option<String>> {
        let guild_id = self
            .lock()
            .query_row(
                "SELECT guild_id FROM members WHERE uuid = ?1",
                [uuid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(guild_id)
    }

    /// Persist a level reading (possibly absent) with a fresh timestamp.
    /// Returns false when the member row no longer exists.
    pub fn set_member_level(&self, uuid: &str, level: Option<f64>, now: i64) -> Result<bool> {
        let updated = self.lock().execute(
            "UPDATE members SET level = ?1, level_checked_at = ?2 WHERE uuid = ?3",
            params![level, now, uuid],
        )?;
        Ok(updated > 0)
    }

    /// Recompute and persist the guild's average level across its current
    /// members with a known level.
    pub fn recompute_guild_avg(&self, guild_id: &str) -> Result<Option<f64>> {
        let conn = self.lock();
        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(level) FROM members WHERE guild_id = ?1 AND level IS NOT NULL",
            [guild_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "UPDATE guilds SET avg_level = ?1 WHERE id = ?2",
            params![avg, guild_id],
        )?;
        Ok(avg)
    }
}

fn row_to_guild(row: &rusqlite::Row<'_>) -> rusqlite::Result<GuildRecord> {
    Ok(GuildRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        tag: row.get(2)?,
        last_scan: row.get(3)?,
        avg_level: row.get(4)?,
    })
}

fn attach_members(
    conn: &Connection,
    guild: Option<GuildRecord>,
) -> Result<Option<(GuildRecord, Vec<MemberRecord>)>> {
    let Some(guild) = guild else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT uuid, rank FROM members WHERE guild_id = ?1 ORDER BY uuid ASC",
    )?;
    let members = stmt
        .query_map([&guild.id], |row| {
            Ok(MemberRecord {
                uuid: row.get(0)?,
                rank: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some((guild, members)))
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if !existing.iter().any(|c| c == column) {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
            [],
        )?;
    }
    Ok(())
}
