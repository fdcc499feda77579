//! TLS MITM round trip (§8 scenario 6) and the "leaf-cert reuse" property:
//! a real `CONNECT` tunnel, terminated with a leaf minted by this crate's
//! own `cert::Cache`, reparsed as HTTP/1.1, forwarded to a loopback TLS
//! origin the test spins up itself.

mod common;

use std::sync::atomic::Ordering;

use wiretrace::cert::RcgenFactory;

#[tokio::test]
async fn connect_tunnel_is_intercepted_and_captured() {
	let (ca_cert_pem, ca_key_pem) = common::generate_test_ca();
	let factory = RcgenFactory::from_pem(&ca_cert_pem, &ca_key_pem).unwrap();

	let origin_addr = common::start_tls_origin(200, "mitm'd", "text/plain").await;

	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), Some(Box::new(factory))).await;

	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.add_root_certificate(reqwest::Certificate::from_pem(ca_cert_pem.as_bytes()).unwrap())
		.build()
		.unwrap();

	let url = format!("https://{origin_addr}/secret");
	let response = client.get(&url).send().await.unwrap();
	assert_eq!(response.status(), 200);
	assert_eq!(response.text().await.unwrap(), "mitm'd");

	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	let rows = proxy
		.engine
		.store
		.list(wiretrace::store::RequestFilter::default())
		.await
		.unwrap();
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].status, 200);
	assert_eq!(rows[0].response_body.as_deref(), Some("mitm'd"));

	proxy.shutdown().await;
}

#[tokio::test]
async fn the_same_host_mints_exactly_one_leaf_across_connections() {
	let (ca_cert_pem, ca_key_pem) = common::generate_test_ca();
	let inner = RcgenFactory::from_pem(&ca_cert_pem, &ca_key_pem).unwrap();
	let counting = common::CountingFactory::wrap(inner);
	let calls = counting.calls.clone();

	let origin_addr = common::start_tls_origin(200, "one", "text/plain").await;

	let data_dir = tempfile::tempdir().unwrap();
	let proxy = common::start_proxy(data_dir.path(), Some(Box::new(counting))).await;

	let client = reqwest::Client::builder()
		.proxy(reqwest::Proxy::all(format!("http://{}", proxy.addr)).unwrap())
		.add_root_certificate(reqwest::Certificate::from_pem(ca_cert_pem.as_bytes()).unwrap())
		// a fresh connection per request, so two hits means two CONNECT
		// tunnels, not one kept-alive tunnel reused underneath.
		.pool_max_idle_per_host(0)
		.build()
		.unwrap();

	let url = format!("https://{origin_addr}/a");
	for _ in 0..2 {
		let response = client.get(&url).send().await.unwrap();
		assert_eq!(response.status(), 200);
	}

	assert_eq!(calls.load(Ordering::SeqCst), 1);

	proxy.shutdown().await;
}
