// Copyright 2025 Oxide Computer Company

//! Common facilities for automated testing.

use rpcshot::test_util::config_client_for_test;
use rpcshot::test_util::config_endpoint_for_test;
use rpcshot::test_util::LogContext;
use rpcshot::ConfigLogging;
use rpcshot::ConfigLoggingIfExists;
use rpcshot::ConfigLoggingLevel;
use rpcshot::ConfigRestClient;
use rpcshot::ConfigRestService;
use rpcshot::RestService;
use std::io::Write;
use tempfile::NamedTempFile;

pub fn create_log_context(test_name: &str) -> LogContext {
    let log_config = ConfigLogging::File {
        level: ConfigLoggingLevel::Debug,
        path: "UNUSED".into(),
        if_exists: ConfigLoggingIfExists::Fail,
    };
    LogContext::new(test_name, &log_config)
}

/// Configuration for a service with its own endpoint.  The IP address to
/// which we bind can be any local IP, but we use 127.0.0.1 because we know
/// it's present and it shouldn't expose this server on any external network.
/// Port 0 requests any available port, since tests run concurrently.
pub fn config_service_for_test(base_route: &str) -> ConfigRestService {
    ConfigRestService {
        base_route: base_route.to_string(),
        endpoint: config_endpoint_for_test(),
        ..Default::default()
    }
}

/// Address of an open service's endpoint.
pub fn service_uri(service: &RestService) -> String {
    service
        .endpoint()
        .and_then(|endpoint| endpoint.uri())
        .expect("service is not open")
}

/// Configuration for a client of the open `service`.
pub fn config_client_for_service(service: &RestService) -> ConfigRestClient {
    config_client_for_test(&service_uri(service), &service.config().base_route)
}

/// Self-signed certificate for "localhost", with the certificate and its key
/// written to PEM files for an endpoint's credential block.
pub struct TestCertificate {
    pub cert_pem: String,
    pub cert_file: NamedTempFile,
    pub key_file: NamedTempFile,
}

fn make_temp_file() -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix("rpcshot-test-").rand_bytes(5).tempfile()
}

pub fn generate_tls_certificate() -> TestCertificate {
    let key_pair =
        rcgen::KeyPair::generate().expect("keypair generation failed");
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .expect("invalid certificate params");
    let cert = params.self_signed(&key_pair).expect("failed to sign cert");
    let cert_pem = cert.pem();

    let mut cert_file = make_temp_file().expect("failed to create cert_file");
    let mut key_file = make_temp_file().expect("failed to create key_file");
    cert_file.write_all(cert_pem.as_bytes()).expect("failed to write cert");
    key_file
        .write_all(key_pair.serialize_pem().as_bytes())
        .expect("failed to write key");

    TestCertificate { cert_pem, cert_file, key_file }
}
