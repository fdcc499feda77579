//! Mock Engine (C4): regex-matched synthetic responses, §4.4.
//!
//! Rules are matched in a fixed priority order (insertion/creation order,
//! descending — newest rule wins) against the full request URL; the first
//! enabled, method-compatible, pattern-matching rule short-circuits the
//! proxy's upstream fetch.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::RegexBuilder;
use thiserror::Error;

use crate::model::MockRule;

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid url_pattern regex: {0}")]
	InvalidPattern(#[from] regex::Error),
}

struct CompiledRule {
	rule: MockRule,
	pattern: regex::Regex,
}

/// Holds the live, compiled rule set. Rebuilt wholesale from the store at
/// startup and on every mutating CRUD call — rule sets are small and churn
/// is rare enough that recompiling everything on write is simpler than
/// incremental patching.
pub struct Engine {
	rules: RwLock<Vec<CompiledRule>>,
}

impl Engine {
	pub fn new() -> Self {
		Engine {
			rules: RwLock::new(Vec::new()),
		}
	}

	/// Replaces the whole rule set, compiling each `url_pattern`. A rule
	/// whose pattern fails to compile is dropped with a warning rather than
	/// failing the whole reload, since a single bad rule shouldn't take
	/// mocking down for every other rule.
	pub fn reload(&self, rules: Vec<MockRule>) {
		let compiled = rules
			.into_iter()
			.filter_map(|rule| match compile(&rule.url_pattern) {
				Ok(pattern) => Some(CompiledRule { rule, pattern }),
				Err(err) => {
					tracing::warn!(rule_id = rule.id, %err, "skipping mock rule with invalid pattern");
					None
				}
			})
			.collect();
		*self.rules.write() = compiled;
	}

	/// First enabled rule whose method (if set) matches `method` and whose
	/// pattern matches `url`. Rules are tried in the order `reload` received
	/// them — callers are expected to pass store results already ordered
	/// newest-first (§4.4).
	pub fn find(&self, method: &str, url: &str) -> Option<MockRule> {
		let rules = self.rules.read();
		rules
			.iter()
			.find(|c| {
				c.rule.enabled
					&& c
						.rule
						.method
						.as_deref()
						.map(|m| m.eq_ignore_ascii_case(method))
						.unwrap_or(true)
					&& c.pattern.is_match(url)
			})
			.map(|c| c.rule.clone())
	}

	pub fn len(&self) -> usize {
		self.rules.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for Engine {
	fn default() -> Self {
		Self::new()
	}
}

fn compile(pattern: &str) -> Result<regex::Regex, regex::Error> {
	RegexBuilder::new(pattern).case_insensitive(true).build()
}

pub type SharedEngine = Arc<Engine>;

#[cfg(test)]
mod tests {
	use super::*;

	fn rule(id: i64, url_pattern: &str, method: Option<&str>) -> MockRule {
		MockRule {
			id,
			name: format!("rule-{id}"),
			enabled: true,
			url_pattern: url_pattern.to_string(),
			method: method.map(str::to_string),
			response_status: 200,
			response_headers: Vec::new(),
			response_body: String::new(),
			delay_ms: 0,
		}
	}

	#[test]
	fn matches_case_insensitively_against_the_full_url() {
		let engine = Engine::new();
		engine.reload(vec![rule(1, r"^https://API\.example\.com/v1/.*", None)]);
		assert!(engine.find("GET", "https://api.example.com/v1/users").is_some());
		assert!(engine.find("GET", "https://other.example.com/v1/users").is_none());
	}

	#[test]
	fn disabled_rules_never_match() {
		let engine = Engine::new();
		let mut r = rule(1, r".*", None);
		r.enabled = false;
		engine.reload(vec![r]);
		assert!(engine.find("GET", "https://x.test/").is_none());
	}

	#[test]
	fn method_filter_is_case_insensitive_when_set() {
		let engine = Engine::new();
		engine.reload(vec![rule(1, r".*", Some("post"))]);
		assert!(engine.find("POST", "https://x.test/").is_some());
		assert!(engine.find("GET", "https://x.test/").is_none());
	}

	#[test]
	fn newest_rule_wins_when_multiple_match() {
		let engine = Engine::new();
		let mut newest = rule(2, r".*", None);
		newest.name = "newest".into();
		let mut oldest = rule(1, r".*", None);
		oldest.name = "oldest".into();
		// reload() preserves caller order; store::list_rules returns
		// newest-first, so callers pass [newest, oldest].
		engine.reload(vec![newest, oldest]);
		let matched = engine.find("GET", "https://x.test/").unwrap();
		assert_eq!(matched.name, "newest");
	}

	#[test]
	fn an_invalid_pattern_is_skipped_not_fatal() {
		let engine = Engine::new();
		engine.reload(vec![rule(1, "(unterminated", None), rule(2, r".*", None)]);
		assert_eq!(engine.len(), 1);
		assert!(engine.find("GET", "https://x.test/").is_some());
	}
}
