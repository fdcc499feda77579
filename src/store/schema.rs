//! Schema creation and WAL setup (§4.7). Run once per [`super::Store::open`]
//! call; `CREATE TABLE IF NOT EXISTS` makes it idempotent across restarts.

use rusqlite::Connection;

use super::Result;

pub(super) fn migrate(conn: &Connection) -> Result<()> {
	conn.pragma_update(None, "journal_mode", "WAL")?;
	conn.pragma_update(None, "foreign_keys", "ON")?;

	conn.execute_batch(
		r#"
		CREATE TABLE IF NOT EXISTS requests (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			timestamp INTEGER NOT NULL,
			method TEXT NOT NULL,
			url TEXT NOT NULL,
			host TEXT NOT NULL,
			path TEXT NOT NULL,
			status INTEGER NOT NULL DEFAULT 0,
			request_headers TEXT NOT NULL DEFAULT '{}',
			request_body TEXT,
			response_headers TEXT NOT NULL DEFAULT '{}',
			response_body TEXT,
			content_type TEXT,
			duration INTEGER NOT NULL DEFAULT 0,
			size INTEGER NOT NULL DEFAULT 0
		);
		CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests (timestamp DESC);
		CREATE INDEX IF NOT EXISTS idx_requests_host ON requests (host);
		CREATE INDEX IF NOT EXISTS idx_requests_method ON requests (method);
		CREATE INDEX IF NOT EXISTS idx_requests_status ON requests (status);
		CREATE INDEX IF NOT EXISTS idx_requests_content_type ON requests (content_type);

		CREATE TABLE IF NOT EXISTS settings (
			key TEXT PRIMARY KEY,
			value TEXT NOT NULL
		);

		CREATE TABLE IF NOT EXISTS mock_rules (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			name TEXT NOT NULL,
			enabled INTEGER NOT NULL DEFAULT 1,
			method TEXT,
			url_pattern TEXT NOT NULL,
			response_status INTEGER NOT NULL,
			response_headers TEXT NOT NULL DEFAULT '{}',
			response_body TEXT NOT NULL DEFAULT '',
			delay INTEGER NOT NULL DEFAULT 0,
			created_at INTEGER NOT NULL
		);
		CREATE INDEX IF NOT EXISTS idx_mock_rules_enabled ON mock_rules (enabled);
		"#,
	)?;
	Ok(())
}
