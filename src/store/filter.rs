//! Filter query surface for `list`/`count` (§4.7). Builds a parameterized
//! `WHERE` clause; the same [`RequestFilter`] value drives both operations so
//! `list(f).len() == count(f)` holds by construction (§8).

use rusqlite::ToSql;

use chrono::{DateTime, Utc};

#[derive(Clone, Debug, Default)]
pub struct RequestFilter {
	/// Substring match against `url OR host OR path`, case-insensitive.
	pub search_query: Option<String>,
	pub methods: Vec<String>,
	/// Literal status codes — no `"2xx"` prefix expansion (§9 open question,
	/// decided: caller expands prefixes before calling in).
	pub status_codes: Vec<u16>,
	pub hosts: Vec<String>,
	/// OR'd `LIKE '%t%'` over these.
	pub content_types: Vec<String>,
	pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
	pub limit: Option<i64>,
	pub offset: Option<i64>,
}

pub(super) struct BuiltQuery {
	pub where_clause: String,
	pub params: Vec<Box<dyn ToSql>>,
}

impl RequestFilter {
	/// Builds the shared `WHERE ...` fragment (without `LIMIT`/`OFFSET`, so
	/// `count` can reuse it verbatim).
	pub(super) fn build(&self) -> BuiltQuery {
		let mut clauses: Vec<String> = Vec::new();
		let mut params: Vec<Box<dyn ToSql>> = Vec::new();

		if let Some(q) = &self.search_query {
			let idx = params.len() + 1;
			clauses.push(format!(
				"(url LIKE ?{idx} OR host LIKE ?{idx} OR path LIKE ?{idx})"
			));
			params.push(Box::new(format!("%{q}%")));
		}

		if !self.methods.is_empty() {
			push_in_clause(&mut clauses, &mut params, "method", &self.methods);
		}

		if !self.status_codes.is_empty() {
			let values: Vec<i64> = self.status_codes.iter().map(|s| *s as i64).collect();
			push_in_clause(&mut clauses, &mut params, "status", &values);
		}

		if !self.hosts.is_empty() {
			push_in_clause(&mut clauses, &mut params, "host", &self.hosts);
		}

		if !self.content_types.is_empty() {
			let mut ors = Vec::with_capacity(self.content_types.len());
			for ct in &self.content_types {
				let idx = params.len() + 1;
				ors.push(format!("content_type LIKE ?{idx}"));
				params.push(Box::new(format!("%{ct}%")));
			}
			clauses.push(format!("({})", ors.join(" OR ")));
		}

		if let Some((start, end)) = &self.date_range {
			let start_idx = params.len() + 1;
			params.push(Box::new(start.timestamp_millis()));
			let end_idx = params.len() + 1;
			params.push(Box::new(end.timestamp_millis()));
			clauses.push(format!("(timestamp BETWEEN ?{start_idx} AND ?{end_idx})"));
		}

		let where_clause = if clauses.is_empty() {
			"1=1".to_string()
		} else {
			clauses.join(" AND ")
		};

		BuiltQuery {
			where_clause,
			params,
		}
	}
}

fn push_in_clause<T: ToSql + Clone + 'static>(
	clauses: &mut Vec<String>,
	params: &mut Vec<Box<dyn ToSql>>,
	column: &str,
	values: &[T],
) {
	let mut placeholders = Vec::with_capacity(values.len());
	for v in values {
		let idx = params.len() + 1;
		placeholders.push(format!("?{idx}"));
		params.push(Box::new(v.clone()));
	}
	clauses.push(format!("{column} IN ({})", placeholders.join(", ")));
}
