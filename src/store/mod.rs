//! Durable, indexed log of captured exchanges (C1, §4.7). Backed by a
//! single-file SQLite database with WAL journaling; all access goes through
//! `spawn_blocking` since `rusqlite` is synchronous, matching how this
//! codebase's other bundled-rusqlite consumers (cursor-studio,
//! LLMwatcher) use it.

pub mod filter;
mod rules;
mod schema;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

pub use filter::RequestFilter;

use crate::model::{CapturedExchange, Headers, MockRule, NewMockRule};

#[derive(Debug, Error)]
pub enum Error {
	#[error("sqlite: {0}")]
	Sqlite(#[from] rusqlite::Error),
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	#[error("exchange {0} not found")]
	NotFound(i64),
	#[error("store task panicked: {0}")]
	Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The request-side fields known when a request is first observed; the
/// response side is filled in later by [`Store::finalize`] (§9
/// "mutable-then-finalize row").
#[derive(Clone, Debug)]
pub struct PendingRequest {
	pub timestamp_ms: i64,
	pub method: String,
	pub url: String,
	pub host: String,
	pub path: String,
	pub request_headers: Headers,
	pub request_body: Option<String>,
}

/// The response-side fields applied once, when the exchange reaches its
/// final state (§3 invariant: "once `status > 0` the response fields are
/// final").
#[derive(Clone, Debug)]
pub struct ResponseUpdate {
	pub status: u16,
	pub response_headers: Headers,
	pub response_body: Option<String>,
	pub content_type: Option<String>,
	pub duration_ms: i64,
	pub size: i64,
}

#[derive(Clone)]
pub struct Store {
	conn: Arc<Mutex<Connection>>,
}

impl Store {
	/// Opens (creating if absent) `<dir>/data/traffic.db`, creating the
	/// directory on demand (§6 "Persisted state").
	pub async fn open(path: &Path) -> Result<Self> {
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let path = path.to_path_buf();
		let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
			let conn = Connection::open(path)?;
			schema::migrate(&conn)?;
			Ok(conn)
		})
		.await??;
		Ok(Store {
			conn: Arc::new(Mutex::new(conn)),
		})
	}

	#[cfg(test)]
	pub async fn open_in_memory() -> Result<Self> {
		let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
			let conn = Connection::open_in_memory()?;
			schema::migrate(&conn)?;
			Ok(conn)
		})
		.await??;
		Ok(Store {
			conn: Arc::new(Mutex::new(conn)),
		})
	}

	async fn with_conn<T, F>(&self, f: F) -> Result<T>
	where
		T: Send + 'static,
		F: FnOnce(&Connection) -> Result<T> + Send + 'static,
	{
		let conn = self.conn.clone();
		tokio::task::spawn_blocking(move || f(&conn.lock())).await?
	}

	/// `id` allocation is monotonic per writer (§5): SQLite's `AUTOINCREMENT`
	/// row id, serialized by the single connection.
	pub async fn insert_pending(&self, row: PendingRequest) -> Result<i64> {
		self
			.with_conn(move |conn| {
				conn.execute(
					"INSERT INTO requests (timestamp, method, url, host, path, status, request_headers, request_body)
					 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
					params![
						row.timestamp_ms,
						row.method,
						row.url,
						row.host,
						row.path,
						rules::headers_to_json(&row.request_headers),
						row.request_body,
					],
				)?;
				Ok(conn.last_insert_rowid())
			})
			.await
	}

	/// Applies the response side. Schema-level invariant: a row whose
	/// `status` is already non-zero is never rewritten (§3, §9).
	pub async fn finalize(&self, id: i64, update: ResponseUpdate) -> Result<()> {
		self
			.with_conn(move |conn| {
				let changed = conn.execute(
					"UPDATE requests SET status = ?2, response_headers = ?3, response_body = ?4,
					 content_type = ?5, duration = ?6, size = ?7
					 WHERE id = ?1 AND status = 0",
					params![
						id,
						update.status,
						rules::headers_to_json(&update.response_headers),
						update.response_body,
						update.content_type,
						update.duration_ms,
						update.size,
					],
				)?;
				if changed == 0 {
					return Err(Error::NotFound(id));
				}
				Ok(())
			})
			.await
	}

	pub async fn get_by_id(&self, id: i64) -> Result<Option<CapturedExchange>> {
		self
			.with_conn(move |conn| {
				conn
					.query_row(
						"SELECT id, timestamp, method, url, host, path, status, request_headers,
						 request_body, response_headers, response_body, content_type, duration, size
						 FROM requests WHERE id = ?1",
						params![id],
						row_to_exchange,
					)
					.optional()
					.map_err(Into::into)
			})
			.await
	}

	/// `list(f).len() == count(f)` by construction: both share
	/// [`RequestFilter::build`] (§8).
	pub async fn list(&self, filter: RequestFilter) -> Result<Vec<CapturedExchange>> {
		self
			.with_conn(move |conn| {
				let built = filter.build();
				let mut sql = format!(
					"SELECT id, timestamp, method, url, host, path, status, request_headers,
					 request_body, response_headers, response_body, content_type, duration, size
					 FROM requests WHERE {} ORDER BY timestamp DESC, id DESC",
					built.where_clause
				);
				if let Some(limit) = filter.limit {
					sql.push_str(&format!(" LIMIT {limit}"));
					if let Some(offset) = filter.offset {
						sql.push_str(&format!(" OFFSET {offset}"));
					}
				}
				let mut stmt = conn.prepare(&sql)?;
				let param_refs: Vec<&dyn rusqlite::ToSql> =
					built.params.iter().map(|p| p.as_ref()).collect();
				let rows = stmt.query_map(param_refs.as_slice(), row_to_exchange)?;
				rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
			})
			.await
	}

	pub async fn count(&self, filter: RequestFilter) -> Result<i64> {
		self
			.with_conn(move |conn| {
				let built = filter.build();
				let sql = format!("SELECT COUNT(*) FROM requests WHERE {}", built.where_clause);
				let param_refs: Vec<&dyn rusqlite::ToSql> =
					built.params.iter().map(|p| p.as_ref()).collect();
				conn
					.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
					.map_err(Into::into)
			})
			.await
	}

	pub async fn unique_hosts(&self) -> Result<Vec<String>> {
		self.unique_column("host").await
	}

	pub async fn unique_methods(&self) -> Result<Vec<String>> {
		self.unique_column("method").await
	}

	pub async fn unique_content_types(&self) -> Result<Vec<String>> {
		self.unique_column("content_type").await
	}

	async fn unique_column(&self, column: &'static str) -> Result<Vec<String>> {
		self
			.with_conn(move |conn| {
				let sql =
					format!("SELECT DISTINCT {column} FROM requests WHERE {column} IS NOT NULL ORDER BY {column}");
				let mut stmt = conn.prepare(&sql)?;
				let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
				rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
			})
			.await
	}

	pub async fn delete(&self, id: i64) -> Result<()> {
		self
			.with_conn(move |conn| {
				conn.execute("DELETE FROM requests WHERE id = ?1", params![id])?;
				Ok(())
			})
			.await
	}

	/// Followed by storage reclamation (§4.7).
	pub async fn clear_all(&self) -> Result<()> {
		self
			.with_conn(|conn| {
				conn.execute("DELETE FROM requests", [])?;
				conn.execute_batch("VACUUM;")?;
				Ok(())
			})
			.await
	}

	pub async fn delete_older_than(&self, hours: i64) -> Result<u64> {
		self
			.with_conn(move |conn| {
				let cutoff = chrono::Utc::now().timestamp_millis() - hours * 3_600_000;
				let deleted = conn.execute("DELETE FROM requests WHERE timestamp < ?1", params![cutoff])?;
				Ok(deleted as u64)
			})
			.await
	}

	pub async fn add_rule(&self, rule: NewMockRule) -> Result<MockRule> {
		self
			.with_conn(move |conn| {
				let created_at = chrono::Utc::now().timestamp_millis();
				let id = rules::insert(conn, &rule, created_at)?;
				Ok(MockRule {
					id,
					name: rule.name,
					enabled: rule.enabled,
					url_pattern: rule.url_pattern,
					method: rule.method,
					response_status: rule.response_status,
					response_headers: rule.response_headers,
					response_body: rule.response_body,
					delay_ms: rule.delay_ms,
				})
			})
			.await
	}

	pub async fn update_rule(&self, rule: MockRule) -> Result<()> {
		self.with_conn(move |conn| rules::update(conn, &rule)).await
	}

	pub async fn toggle_rule(&self, id: i64, enabled: bool) -> Result<()> {
		self.with_conn(move |conn| rules::toggle(conn, id, enabled)).await
	}

	pub async fn delete_rule(&self, id: i64) -> Result<()> {
		self.with_conn(move |conn| rules::delete(conn, id)).await
	}

	pub async fn get_rule(&self, id: i64) -> Result<Option<MockRule>> {
		self.with_conn(move |conn| rules::get(conn, id)).await
	}

	/// Descending creation order — the order the mock engine rebuilds its
	/// in-memory map in at startup (§4.4).
	pub async fn list_rules(&self) -> Result<Vec<MockRule>> {
		self.with_conn(rules::list).await
	}
}

fn row_to_exchange(row: &rusqlite::Row<'_>) -> rusqlite::Result<CapturedExchange> {
	let request_headers: String = row.get(7)?;
	let response_headers: String = row.get(9)?;
	Ok(CapturedExchange {
		id: row.get(0)?,
		timestamp_ms: row.get(1)?,
		method: row.get(2)?,
		url: row.get(3)?,
		host: row.get(4)?,
		path: row.get(5)?,
		status: row.get::<_, i64>(6)? as u16,
		request_headers: rules::json_to_headers(&request_headers),
		request_body: row.get(8)?,
		response_headers: rules::json_to_headers(&response_headers),
		response_body: row.get(10)?,
		content_type: row.get(11)?,
		duration_ms: row.get(12)?,
		size: row.get(13)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_request(url: &str, host: &str) -> PendingRequest {
		PendingRequest {
			timestamp_ms: chrono::Utc::now().timestamp_millis(),
			method: "GET".to_string(),
			url: url.to_string(),
			host: host.to_string(),
			path: "/".to_string(),
			request_headers: vec![("host".to_string(), host.to_string())],
			request_body: None,
		}
	}

	#[tokio::test]
	async fn row_ids_are_monotonic() {
		let store = Store::open_in_memory().await.unwrap();
		let a = store.insert_pending(sample_request("http://a.test/", "a.test")).await.unwrap();
		let b = store.insert_pending(sample_request("http://b.test/", "b.test")).await.unwrap();
		assert!(a < b);
	}

	#[tokio::test]
	async fn finalize_is_one_shot() {
		let store = Store::open_in_memory().await.unwrap();
		let id = store.insert_pending(sample_request("http://a.test/", "a.test")).await.unwrap();
		let update = ResponseUpdate {
			status: 200,
			response_headers: vec![],
			response_body: Some("hello".to_string()),
			content_type: Some("text/plain".to_string()),
			duration_ms: 5,
			size: 5,
		};
		store.finalize(id, update.clone()).await.unwrap();
		let second = store.finalize(id, update).await;
		assert!(matches!(second, Err(Error::NotFound(_))));
	}

	#[tokio::test]
	async fn list_and_count_agree() {
		let store = Store::open_in_memory().await.unwrap();
		for i in 0..5 {
			store
				.insert_pending(sample_request(&format!("http://a.test/{i}"), "a.test"))
				.await
				.unwrap();
		}
		let filter = RequestFilter {
			hosts: vec!["a.test".to_string()],
			..Default::default()
		};
		let rows = store.list(filter.clone()).await.unwrap();
		let count = store.count(filter).await.unwrap();
		assert_eq!(rows.len() as i64, count);
		assert_eq!(count, 5);
	}

	#[tokio::test]
	async fn pagination_is_a_contiguous_slice() {
		let store = Store::open_in_memory().await.unwrap();
		for i in 0..10 {
			store
				.insert_pending(sample_request(&format!("http://a.test/{i}"), "a.test"))
				.await
				.unwrap();
		}
		let all = store.list(RequestFilter::default()).await.unwrap();
		let page = store
			.list(RequestFilter {
				limit: Some(3),
				offset: Some(2),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(page.len(), 3);
		assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), all[2..5].iter().map(|r| r.id).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn malformed_headers_json_degrades_to_empty() {
		assert!(rules::json_to_headers("not json").is_empty());
	}
}
