//! End-to-end plain-HTTP exercises (§8 scenarios 1-2): a client drives
//! requests through the proxy's absolute-form listener, never touching the
//! origin directly, and we assert both the client-visible response and the
//! row the store ends up with.

mod common;

use std::io::Write;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wiretrace::store::RequestFilter;

#[tokio::test]
async fn plain_get_is_forwarded_and_captured() {
	let origin = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/hello"))
		.respond_with(ResponseTemplate::new(200).set_body_string("hi there").insert_header("content-type", "text/plain"))
		.mount(&origin)
		.await;

	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), None).await;

	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.build()
		.unwrap();

	let url = format!("{}/hello", origin.uri());
	let response = client.get(&url).send().await.unwrap();
	assert_eq!(response.status(), 200);
	assert_eq!(response.text().await.unwrap(), "hi there");

	let rows = proxy.engine.store.list(RequestFilter::default()).await.unwrap();
	assert_eq!(rows.len(), 1);
	let row = &rows[0];
	assert_eq!(row.status, 200);
	assert_eq!(row.method, "GET");
	assert_eq!(row.response_body.as_deref(), Some("hi there"));
	assert_eq!(row.content_type.as_deref(), Some("text/plain"));

	proxy.shutdown().await;
}

#[tokio::test]
async fn gzip_response_is_decompressed_for_storage_but_forwarded_untouched() {
	let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
	encoder.write_all(br#"{"ok":true}"#).unwrap();
	let compressed = encoder.finish().unwrap();

	let origin = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/json"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_raw(compressed, "application/json")
				.insert_header("content-encoding", "gzip"),
		)
		.mount(&origin)
		.await;

	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), None).await;

	// reqwest's own gzip feature is off in this dev-dependency build, so the
	// client never auto-decompresses: what it sees is exactly what the
	// origin put on the wire.
	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.build()
		.unwrap();

	let url = format!("{}/json", origin.uri());
	let response = client.get(&url).send().await.unwrap();
	assert_eq!(response.status(), 200);
	// the client-facing bytes are exactly what the origin sent: still gzip.
	let on_wire = response.bytes().await.unwrap();
	assert_eq!(on_wire.as_ref(), compressed.as_slice());

	// give the spawned finalize task a moment to land.
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;

	let rows = proxy.engine.store.list(RequestFilter::default()).await.unwrap();
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].response_body.as_deref(), Some(r#"{"ok":true}"#));
	assert_eq!(rows[0].size, compressed.len() as i64);

	proxy.shutdown().await;
}

#[tokio::test]
async fn upstream_connect_failure_is_stored_as_502() {
	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), None).await;

	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.build()
		.unwrap();

	// port 1 on loopback: nothing listens there, so the connect fails fast.
	let response = client.get("http://127.0.0.1:1/").send().await.unwrap();
	assert_eq!(response.status(), 502);

	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	let rows = proxy.engine.store.list(RequestFilter::default()).await.unwrap();
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].status, 502);

	proxy.shutdown().await;
}
