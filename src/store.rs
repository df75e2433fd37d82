//! SQLite persistence for playlists, channels, users and packages

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ImportError, StoreError};
use crate::fetcher;
use crate::importer::{ChannelStore, ChannelTx, ImportCoordinator, ImportReport};
use crate::models::{timestamp_now, Channel, Owner, Package, ParsedItem, Playlist, SourceKind, User};

/// Upper bound for channel listings
pub const MAX_CHANNEL_LIST: usize = 2000;

const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_init.sql", include_str!("../migrations/0001_init.sql")),
    ("0002_packages.sql", include_str!("../migrations/0002_packages.sql")),
];

const CHANNEL_COLUMNS: &str =
    "c.id, c.name, c.stream_url, c.tvg_id, c.tvg_name, c.tvg_logo, c.group_title, c.created_at";

const USER_COLUMNS: &str = "id, username, display_name, app_key, playlist_id, created_at";

/// Shared handle on the database. A single connection is used so there is
/// at most one writer at a time.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and apply pending migrations
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Opened database {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::invalid("database lock poisoned"))
    }

    // ---- imports -------------------------------------------------------

    pub fn import_playlist(
        &self,
        playlist_id: i64,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, ImportError> {
        let mut conn = self.lock()?;
        ImportCoordinator::new(&mut *conn).import_playlist(playlist_id, raw, cancel)
    }

    pub fn replace_selection(
        &self,
        owner: Owner,
        channel_ids: &[i64],
        cancel: &CancellationToken,
    ) -> Result<usize, ImportError> {
        let mut conn = self.lock()?;
        ImportCoordinator::new(&mut *conn).replace_selection(owner, channel_ids, cancel)
    }

    // ---- playlists -----------------------------------------------------

    pub fn create_playlist_from_url(&self, name: &str, url: &str) -> Result<Playlist, StoreError> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(StoreError::invalid("name is required"));
        }
        if url.is_empty() {
            return Err(StoreError::invalid("url is required"));
        }
        if !fetcher::is_http_url(url) {
            return Err(StoreError::invalid("url must be http or https"));
        }
        self.insert_playlist(name, SourceKind::Url, url, "")
    }

    pub fn create_inline_playlist(&self, name: &str, content: &str) -> Result<Playlist, StoreError> {
        let name = name.trim();
        let content = content.trim();
        if name.is_empty() {
            return Err(StoreError::invalid("name is required"));
        }
        if content.is_empty() {
            return Err(StoreError::invalid("content is required"));
        }
        self.insert_playlist(name, SourceKind::Inline, "", content)
    }

    fn insert_playlist(
        &self,
        name: &str,
        kind: SourceKind,
        source_url: &str,
        content: &str,
    ) -> Result<Playlist, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO playlists (name, source_type, source_url, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, kind.as_str(), source_url, content, timestamp_now()],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_playlist(id).map(|(p, _)| p)
    }

    /// Playlist metadata plus its stored inline content (empty for url playlists)
    pub fn get_playlist(&self, id: i64) -> Result<(Playlist, String), StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, source_type, source_url, created_at, content FROM playlists WHERE id = ?1",
            params![id],
            |row| Ok((playlist_from_row(row)?, row.get::<_, String>(5)?)),
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn list_playlists(&self) -> Result<Vec<Playlist>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, source_type, source_url, created_at FROM playlists ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], playlist_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a playlist. Its associations go with it; channels stay.
    pub fn delete_playlist(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ---- users ---------------------------------------------------------

    pub fn create_user(&self, username: &str, display_name: &str) -> Result<User, StoreError> {
        let username = username.trim();
        let display_name = display_name.trim();
        if username.is_empty() {
            return Err(StoreError::invalid("username is required"));
        }

        let app_key = uuid::Uuid::new_v4().simple().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (username, display_name, app_key, playlist_id, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![username, display_name, app_key, timestamp_now()],
        )
        .map_err(|e| constraint_as_invalid(e, "username already exists"))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_user(id)
    }

    pub fn get_user(&self, id: i64) -> Result<User, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            user_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id DESC", USER_COLUMNS))?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rename a user or change their display name. `None` keeps the field.
    pub fn update_user(
        &self,
        id: i64,
        username: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User, StoreError> {
        let username = username.map(str::trim);
        if username == Some("") {
            return Err(StoreError::invalid("username cannot be empty"));
        }
        let display_name = display_name.map(str::trim);

        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE users
                 SET username = COALESCE(?1, username), display_name = COALESCE(?2, display_name)
                 WHERE id = ?3",
                params![username, display_name, id],
            )
            .map_err(|e| constraint_as_invalid(e, "username already exists"))?;
        drop(conn);
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }

    /// Delete a user with their channel and package selections
    pub fn delete_user(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_user_by_app_key(&self, app_key: &str) -> Result<User, StoreError> {
        let app_key = app_key.trim();
        if app_key.is_empty() {
            return Err(StoreError::NotFound);
        }
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE app_key = ?1", USER_COLUMNS),
            params![app_key],
            user_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// App key of the most recently created user, if any
    pub fn newest_app_key(&self) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT app_key FROM users WHERE app_key != '' ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_user_playlist(&self, user_id: i64, playlist_id: Option<i64>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE users SET playlist_id = ?1 WHERE id = ?2",
                params![playlist_id, user_id],
            )
            .map_err(|e| constraint_as_invalid(e, "unknown playlist"))?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Replace the packages assigned to a user. Non-positive ids are skipped.
    pub fn set_user_packages(&self, user_id: i64, package_ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_packages WHERE user_id = ?1", params![user_id])?;
        for &package_id in package_ids.iter().filter(|&&id| id > 0) {
            tx.execute(
                "INSERT OR IGNORE INTO user_packages (user_id, package_id) VALUES (?1, ?2)",
                params![user_id, package_id],
            )
            .map_err(|e| constraint_as_invalid(e, &format!("unknown package {}", package_id)))?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_user_packages(&self, user_id: i64) -> Result<Vec<Package>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.price, p.created_at
             FROM user_packages up
             JOIN packages p ON p.id = up.package_id
             WHERE up.user_id = ?1
             ORDER BY p.id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], package_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- packages ------------------------------------------------------

    pub fn create_package(&self, name: &str, price: i64) -> Result<Package, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::invalid("name is required"));
        }
        if price < 0 {
            return Err(StoreError::invalid("price must be >= 0"));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO packages (name, price, created_at) VALUES (?1, ?2, ?3)",
            params![name, price, timestamp_now()],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_package(id)
    }

    pub fn get_package(&self, id: i64) -> Result<Package, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, price, created_at FROM packages WHERE id = ?1",
            params![id],
            package_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn list_packages(&self) -> Result<Vec<Package>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, price, created_at FROM packages ORDER BY id DESC")?;
        let rows = stmt.query_map([], package_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a package. Its channel list and user assignments go with it.
    pub fn delete_package(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM packages WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ---- channels ------------------------------------------------------

    /// Channels associated with `owner`, in position order
    pub fn list_owner_channels(&self, owner: Owner) -> Result<Vec<Channel>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} a JOIN channels c ON c.id = a.channel_id
             WHERE a.{} = ?1 ORDER BY a.pos ASC, c.id ASC",
            CHANNEL_COLUMNS,
            owner.table(),
            owner.column()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner.id()], channel_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn owner_has_channels(&self, owner: Owner) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = ?1)",
            owner.table(),
            owner.column()
        );
        Ok(conn.query_row(&sql, params![owner.id()], |row| row.get(0))?)
    }

    /// Channels of every package assigned to the user. Packages are taken in id
    /// order and a channel shared by several packages appears once, at its
    /// first occurrence.
    pub fn list_user_package_channels(&self, user_id: i64) -> Result<Vec<Channel>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM user_packages up
             JOIN package_channels pc ON pc.package_id = up.package_id
             JOIN channels c ON c.id = pc.channel_id
             WHERE up.user_id = ?1
             ORDER BY up.package_id ASC, pc.pos ASC, c.id ASC",
            CHANNEL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], channel_from_row)?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let ch = row?;
            if seen.insert(ch.id) {
                out.push(ch);
            }
        }
        Ok(out)
    }

    /// Channel listing for the admin UI. Without a playlist filter results are
    /// ordered by group then name; with one, by playlist position.
    pub fn search_channels(
        &self,
        playlist_id: Option<i64>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Channel>, StoreError> {
        let limit = if limit == 0 || limit > MAX_CHANNEL_LIST {
            MAX_CHANNEL_LIST
        } else {
            limit
        };

        let mut sql = format!("SELECT {} FROM channels c", CHANNEL_COLUMNS);
        let mut clauses = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(id) = playlist_id {
            sql.push_str(" JOIN playlist_channels pc ON pc.channel_id = c.id");
            clauses.push("pc.playlist_id = ?");
            args.push(Value::Integer(id));
        }

        let query = query.trim();
        if !query.is_empty() {
            clauses.push("(LOWER(c.name) LIKE ? OR LOWER(c.group_title) LIKE ?)");
            let pattern = format!("%{}%", query.to_lowercase());
            args.push(Value::Text(pattern.clone()));
            args.push(Value::Text(pattern));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if playlist_id.is_some() {
            sql.push_str(" ORDER BY pc.pos ASC");
        } else {
            sql.push_str(" ORDER BY c.group_title ASC, c.name ASC");
        }
        sql.push_str(" LIMIT ?");
        args.push(Value::Integer(limit as i64));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), channel_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ---- storage interface for the import coordinator ----------------------

impl ChannelStore for Connection {
    type Tx<'a>
        = Transaction<'a>
    where
        Self: 'a;

    fn begin(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.transaction()?)
    }
}

impl ChannelTx for Transaction<'_> {
    fn upsert_channel(&mut self, item: &ParsedItem, created_at: &str) -> Result<i64, StoreError> {
        let id = self.query_row(
            "INSERT INTO channels (name, stream_url, tvg_id, tvg_name, tvg_logo, group_title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(stream_url) DO UPDATE SET
               name = excluded.name,
               tvg_id = excluded.tvg_id,
               tvg_name = excluded.tvg_name,
               tvg_logo = excluded.tvg_logo,
               group_title = excluded.group_title
             RETURNING id",
            params![
                item.name,
                item.stream_url,
                item.tvg_id,
                item.tvg_name,
                item.tvg_logo,
                item.group_title,
                created_at
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn clear_associations(&mut self, owner: Owner) -> Result<(), StoreError> {
        let removed = self.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", owner.table(), owner.column()),
            params![owner.id()],
        )?;
        debug!("{}: cleared {} channel associations", owner, removed);
        Ok(())
    }

    fn associate(&mut self, owner: Owner, channel_id: i64, position: i64) -> Result<(), StoreError> {
        self.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}, channel_id, pos) VALUES (?1, ?2, ?3)",
                owner.table(),
                owner.column()
            ),
            params![owner.id(), channel_id, position],
        )
        .map_err(|e| constraint_as_invalid(e, &format!("unknown {} or channel {}", owner, channel_id)))?;
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        Transaction::commit(self)?;
        Ok(())
    }
}

// ---- helpers -----------------------------------------------------------

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (name TEXT PRIMARY KEY, applied_at TEXT NOT NULL);",
    )?;

    for &(name, sql) in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if applied {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| StoreError::invalid(format!("migration {} failed: {}", name, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
            params![name, timestamp_now()],
        )?;
        tx.commit()?;
        info!("Applied migration {}", name);
    }
    Ok(())
}

fn constraint_as_invalid(err: rusqlite::Error, msg: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StoreError::invalid(msg)
        }
        other => StoreError::Sqlite(other),
    }
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        stream_url: row.get(2)?,
        tvg_id: row.get(3)?,
        tvg_name: row.get(4)?,
        tvg_logo: row.get(5)?,
        group_title: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn playlist_from_row(row: &Row<'_>) -> rusqlite::Result<Playlist> {
    let kind: String = row.get(2)?;
    let source_kind = SourceKind::from_db(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown source type {:?}", kind).into(),
        )
    })?;
    Ok(Playlist {
        id: row.get(0)?,
        name: row.get(1)?,
        source_kind,
        source_url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        app_key: row.get(3)?,
        playlist_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
