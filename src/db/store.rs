//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::repository::Repository;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Fixed-width so that text order equals time order.
const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const ENDPOINT_COLUMNS: &str = "id, user_id, name, url, method, headers, body, check_interval, is_active, \
     status, last_checked, last_response_time, last_status_code, \
     notify_enabled, notify_email, notify_sms, notify_slack";

const CHECK_COLUMNS: &str =
    "id, endpoint_id, status, status_code, response_time, response_size, error_message, checked_at";

const USER_COLUMNS: &str = "id, name, email, phone, slack_webhook_url, notify_email, notify_sms, notify_slack";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// A private, process-local database.
    pub fn in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Users ---

    /// Add a new user and return its ID.
    pub fn add_user(&self, user: &mut User) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (name, email, phone, slack_webhook_url, notify_email, notify_sms, notify_slack) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.name,
                user.email,
                user.phone,
                user.slack_webhook_url,
                user.preferences.email,
                user.preferences.sms,
                user.preferences.slack,
            ],
        )?;
        user.id = conn.last_insert_rowid();
        Ok(user.id)
    }

    /// Update a user's contact details and channel preferences.
    pub fn update_user(&self, user: &User) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET name=?1, email=?2, phone=?3, slack_webhook_url=?4, \
             notify_email=?5, notify_sms=?6, notify_slack=?7 WHERE id=?8",
            params![
                user.name,
                user.email,
                user.phone,
                user.slack_webhook_url,
                user.preferences.email,
                user.preferences.sms,
                user.preferences.slack,
                user.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Endpoint CRUD ---

    /// Add a new endpoint and return its ID.
    pub fn add_endpoint(&self, endpoint: &mut Endpoint) -> Result<i64, DbError> {
        let headers = serde_json::to_string(&endpoint.headers)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO endpoints (user_id, name, url, method, headers, body, check_interval, is_active, \
             status, last_checked, last_response_time, last_status_code, \
             notify_enabled, notify_email, notify_sms, notify_slack) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                endpoint.user_id,
                endpoint.name,
                endpoint.url,
                endpoint.method,
                headers,
                endpoint.body,
                endpoint.check_interval,
                endpoint.is_active,
                endpoint.status,
                endpoint.last_checked.map(format_db_time),
                endpoint.last_response_time,
                endpoint.last_status_code,
                endpoint.notifications.enabled,
                endpoint.notifications.channels.email,
                endpoint.notifications.channels.sms,
                endpoint.notifications.channels.slack,
            ],
        )?;
        endpoint.id = conn.last_insert_rowid();
        Ok(endpoint.id)
    }

    /// Update the owner-editable configuration of an endpoint.
    ///
    /// Status fields are left alone; they belong to the state updater.
    pub fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), DbError> {
        let headers = serde_json::to_string(&endpoint.headers)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE endpoints SET name=?1, url=?2, method=?3, headers=?4, body=?5, check_interval=?6, \
             is_active=?7, notify_enabled=?8, notify_email=?9, notify_sms=?10, notify_slack=?11 \
             WHERE id=?12",
            params![
                endpoint.name,
                endpoint.url,
                endpoint.method,
                headers,
                endpoint.body,
                endpoint.check_interval,
                endpoint.is_active,
                endpoint.notifications.enabled,
                endpoint.notifications.channels.email,
                endpoint.notifications.channels.sms,
                endpoint.notifications.channels.slack,
                endpoint.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Flip an endpoint in or out of the schedule.
    pub fn set_endpoint_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE endpoints SET is_active=?1 WHERE id=?2",
            params![active, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete an endpoint and its check history.
    pub fn delete_endpoint(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM check_results WHERE endpoint_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
        tx.commit()?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn select_endpoints(&self, filter: &str, values: Vec<Value>) -> Result<Vec<Endpoint>, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM endpoints {} ORDER BY id ASC", ENDPOINT_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let endpoints = stmt
            .query_map(params_from_iter(values.iter()), endpoint_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(endpoints)
    }

    fn select_checks(&self, filter: &str, values: Vec<Value>) -> Result<Vec<CheckResult>, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM check_results {}", CHECK_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let checks = stmt
            .query_map(params_from_iter(values.iter()), check_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(checks)
    }
}

impl Repository for Store {
    fn list_active_endpoints(&self) -> Result<Vec<Endpoint>, DbError> {
        self.select_endpoints("WHERE is_active = 1", vec![])
    }

    fn list_user_endpoints(&self, user_id: i64, active_only: bool) -> Result<Vec<Endpoint>, DbError> {
        if active_only {
            self.select_endpoints(
                "WHERE user_id = ?1 AND is_active = 1",
                vec![Value::Integer(user_id)],
            )
        } else {
            self.select_endpoints("WHERE user_id = ?1", vec![Value::Integer(user_id)])
        }
    }

    fn get_endpoint(&self, id: i64) -> Result<Endpoint, DbError> {
        self.select_endpoints("WHERE id = ?1", vec![Value::Integer(id)])?
            .into_iter()
            .next()
            .ok_or(DbError::NotFound)
    }

    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE endpoints SET status=?1, last_checked=?2, last_response_time=?3, last_status_code=?4 \
             WHERE id=?5",
            params![
                endpoint.status,
                endpoint.last_checked.map(format_db_time),
                endpoint.last_response_time,
                endpoint.last_status_code,
                endpoint.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn append_check_result(&self, result: &CheckResult) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO check_results (endpoint_id, status, status_code, response_time, response_size, \
             error_message, checked_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.endpoint_id,
                result.status,
                result.status_code,
                result.response_time,
                result.response_size,
                result.error_message,
                format_db_time(result.checked_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_check_results(
        &self,
        endpoint_id: i64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, DbError> {
        let limit = Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX));
        match since {
            Some(since) => self.select_checks(
                "WHERE endpoint_id = ?1 AND checked_at >= ?2 ORDER BY checked_at DESC, id DESC LIMIT ?3",
                vec![Value::Integer(endpoint_id), Value::Text(format_db_time(since)), limit],
            ),
            None => self.select_checks(
                "WHERE endpoint_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT ?2",
                vec![Value::Integer(endpoint_id), limit],
            ),
        }
    }

    fn query_check_results(&self, endpoint_id: i64, since: DateTime<Utc>) -> Result<Vec<CheckResult>, DbError> {
        self.select_checks(
            "WHERE endpoint_id = ?1 AND checked_at >= ?2 ORDER BY checked_at ASC, id ASC",
            vec![Value::Integer(endpoint_id), Value::Text(format_db_time(since))],
        )
    }

    fn query_check_results_for(
        &self,
        endpoint_ids: &[i64],
        since: DateTime<Utc>,
        filter: StatusFilter,
    ) -> Result<Vec<CheckResult>, DbError> {
        if endpoint_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; endpoint_ids.len()].join(", ");
        let status_clause = match filter {
            StatusFilter::Any => "",
            StatusFilter::NonSuccess => " AND status != 'success'",
        };
        let clause = format!(
            "WHERE endpoint_id IN ({}) AND checked_at >= ?{} ORDER BY checked_at ASC, id ASC",
            placeholders, status_clause
        );

        let mut values: Vec<Value> = endpoint_ids.iter().map(|id| Value::Integer(*id)).collect();
        values.push(Value::Text(format_db_time(since)));
        self.select_checks(&clause, values)
    }

    fn get_user(&self, id: i64) -> Result<User, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            user_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    fn delete_check_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM check_results WHERE checked_at < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(removed)
    }
}

fn endpoint_from_row(row: &Row<'_>) -> rusqlite::Result<Endpoint> {
    let headers_json: String = row.get(5)?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    let last_checked: Option<String> = row.get(10)?;

    Ok(Endpoint {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        method: row.get(4)?,
        headers,
        body: row.get(6)?,
        check_interval: row.get(7)?,
        is_active: row.get(8)?,
        status: row.get(9)?,
        last_checked: last_checked.map(|s| time_column(10, &s)).transpose()?,
        last_response_time: row.get(11)?,
        last_status_code: row.get(12)?,
        notifications: NotificationSettings {
            enabled: row.get(13)?,
            channels: ChannelFlags {
                email: row.get(14)?,
                sms: row.get(15)?,
                slack: row.get(16)?,
            },
        },
    })
}

fn check_from_row(row: &Row<'_>) -> rusqlite::Result<CheckResult> {
    let checked_at: String = row.get(7)?;
    Ok(CheckResult {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        status: row.get(2)?,
        status_code: row.get(3)?,
        response_time: row.get(4)?,
        response_size: row.get(5)?,
        error_message: row.get(6)?,
        checked_at: time_column(7, &checked_at)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        slack_webhook_url: row.get(4)?,
        preferences: ChannelFlags {
            email: row.get(5)?,
            sms: row.get(6)?,
            slack: row.get(7)?,
        },
    })
}

fn time_column(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_db_time(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognised timestamp {:?}", s).into(),
        )
    })
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [DB_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
