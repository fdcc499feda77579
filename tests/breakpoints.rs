//! Breakpoint rendezvous end-to-end (§8 scenarios 4-5): a controller task
//! subscribed to `breakpoint:hit` answers paused exchanges the way a UI
//! would, over the real rendezvous in `Controller::pause`/`resolve`.

mod common;

use wiremock::matchers::{body_string, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wiretrace::events::Event;
use wiretrace::model::{BreakpointConfig, Direction, InterceptedMessage, Verdict};

/// Spawns a task that answers exactly one breakpoint pause with `verdict`.
fn auto_resolve_once(proxy: &common::Proxy, verdict: Verdict) {
	let engine = proxy.engine.clone();
	let mut events = engine.events.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(Event::BreakpointHit(snapshot)) => {
					engine.breakpoints.resolve(snapshot.id, verdict);
					return;
				}
				Ok(_) => continue,
				Err(_) => return,
			}
		}
	});
}

#[tokio::test]
async fn modifying_a_request_forwards_the_edit_but_stores_the_original_body() {
	let origin = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_string("edited"))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.mount(&origin)
		.await;

	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), None).await;
	proxy.engine.breakpoints.set_config(BreakpointConfig {
		enabled: true,
		break_on_request: true,
		break_on_response: false,
		url_pattern: None,
	});

	auto_resolve_once(
		&proxy,
		Verdict::Continue(Some(InterceptedMessage {
			method: "POST".into(),
			url: format!("{}/submit", origin.uri()),
			headers: vec![("content-type".into(), "text/plain".into())],
			body: Some(bytes::Bytes::from_static(b"edited")),
			status: None,
		})),
	);

	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.build()
		.unwrap();

	let url = format!("{}/submit", origin.uri());
	let response = client.post(&url).body("original").send().await.unwrap();
	assert_eq!(response.status(), 200);

	assert_eq!(origin.received_requests().await.unwrap().len(), 1);

	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	let rows = proxy
		.engine
		.store
		.list(wiretrace::store::RequestFilter::default())
		.await
		.unwrap();
	assert_eq!(rows.len(), 1);
	// the origin got "edited"; the audit trail still shows what the client
	// actually sent (§9 open question: stored request body is never
	// rewritten by a breakpoint edit).
	assert_eq!(rows[0].request_body.as_deref(), Some("original"));

	proxy.shutdown().await;
}

#[tokio::test]
async fn dropping_a_response_never_reaches_the_client_as_200_and_is_stored_as_499() {
	let origin = MockServer::start().await;
	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_body_string("should not be seen"))
		.mount(&origin)
		.await;

	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), None).await;
	proxy.engine.breakpoints.set_config(BreakpointConfig {
		enabled: true,
		break_on_request: false,
		break_on_response: true,
		url_pattern: None,
	});

	auto_resolve_once(&proxy, Verdict::Drop);

	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.build()
		.unwrap();

	let url = format!("{}/anything", origin.uri());
	let response = client.get(&url).send().await.unwrap();
	assert_eq!(response.status(), 499);

	let rows = proxy
		.engine
		.store
		.list(wiretrace::store::RequestFilter::default())
		.await
		.unwrap();
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].status, 499);

	proxy.shutdown().await;
}

#[test]
fn direction_enum_marks_breakpoint_hit_payload_shape() {
	// sanity: the two directions remain distinguishable after a
	// serialize/deserialize round trip through the same Serde derive the
	// event payload uses, since a UI consumes this over a wire boundary.
	let request = serde_json::to_string(&Direction::Request).unwrap();
	let response = serde_json::to_string(&Direction::Response).unwrap();
	assert_ne!(request, response);
}
