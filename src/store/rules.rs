//! Mock-rule persistence (§4.4 "CRUD operations ... delegated to C1").

use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{Headers, MockRule, NewMockRule};

use super::Result;

pub(super) fn insert(conn: &Connection, rule: &NewMockRule, created_at: i64) -> Result<i64> {
	conn.execute(
		"INSERT INTO mock_rules (name, enabled, method, url_pattern, response_status, response_headers, response_body, delay, created_at)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
		params![
			rule.name,
			rule.enabled,
			rule.method,
			rule.url_pattern,
			rule.response_status,
			headers_to_json(&rule.response_headers),
			rule.response_body,
			rule.delay_ms as i64,
			created_at,
		],
	)?;
	Ok(conn.last_insert_rowid())
}

pub(super) fn update(conn: &Connection, rule: &MockRule) -> Result<()> {
	conn.execute(
		"UPDATE mock_rules SET name = ?2, enabled = ?3, method = ?4, url_pattern = ?5,
		 response_status = ?6, response_headers = ?7, response_body = ?8, delay = ?9
		 WHERE id = ?1",
		params![
			rule.id,
			rule.name,
			rule.enabled,
			rule.method,
			rule.url_pattern,
			rule.response_status,
			headers_to_json(&rule.response_headers),
			rule.response_body,
			rule.delay_ms as i64,
		],
	)?;
	Ok(())
}

pub(super) fn toggle(conn: &Connection, id: i64, enabled: bool) -> Result<()> {
	conn.execute(
		"UPDATE mock_rules SET enabled = ?2 WHERE id = ?1",
		params![id, enabled],
	)?;
	Ok(())
}

pub(super) fn delete(conn: &Connection, id: i64) -> Result<()> {
	conn.execute("DELETE FROM mock_rules WHERE id = ?1", params![id])?;
	Ok(())
}

pub(super) fn get(conn: &Connection, id: i64) -> Result<Option<MockRule>> {
	conn.query_row(
		"SELECT id, name, enabled, method, url_pattern, response_status, response_headers, response_body, delay
		 FROM mock_rules WHERE id = ?1",
		params![id],
		row_to_rule,
	)
	.optional()
	.map_err(Into::into)
}

/// Descending creation order, matching the startup rebuild order the mock
/// engine expects (§4.4).
pub(super) fn list(conn: &Connection) -> Result<Vec<MockRule>> {
	let mut stmt = conn.prepare(
		"SELECT id, name, enabled, method, url_pattern, response_status, response_headers, response_body, delay
		 FROM mock_rules ORDER BY created_at DESC, id DESC",
	)?;
	let rows = stmt.query_map([], row_to_rule)?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<MockRule> {
	let headers_json: String = row.get(6)?;
	let delay: i64 = row.get(8)?;
	Ok(MockRule {
		id: row.get(0)?,
		name: row.get(1)?,
		enabled: row.get(2)?,
		method: row.get(3)?,
		url_pattern: row.get(4)?,
		response_status: row.get(5)?,
		response_headers: json_to_headers(&headers_json),
		response_body: row.get(7)?,
		delay_ms: delay.max(0) as u64,
	})
}

pub(super) fn headers_to_json(headers: &Headers) -> String {
	let map: serde_json::Map<String, serde_json::Value> = headers
		.iter()
		.map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
		.collect();
	serde_json::Value::Object(map).to_string()
}

/// Malformed JSON degrades to `{}`, never throws (§4.7).
pub(super) fn json_to_headers(raw: &str) -> Headers {
	match serde_json::from_str::<serde_json::Value>(raw) {
		Ok(serde_json::Value::Object(map)) => map
			.into_iter()
			.map(|(k, v)| (k, v.as_str().unwrap_or_default().to_string()))
			.collect(),
		_ => Vec::new(),
	}
}
