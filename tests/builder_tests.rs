//! Builder and address resolution tests through the public API

use citm::config::{CERTS_MOUNT, MOCKS_MOUNT, MOCK_PATHS_ENV};
use citm::docker::resolve_host;
use citm::{CitmBuilder, CitmContainer, CitmError, StaticEndpoint};
use std::path::PathBuf;
use url::Url;

fn started(host: &str) -> CitmContainer<StaticEndpoint> {
    let endpoint = StaticEndpoint::new(host)
        .with_port(80, 49153)
        .with_port(443, 49154)
        .with_port(8380, 49155)
        .with_port(8381, 49156)
        .with_port(3858, 49157);

    CitmBuilder::new()
        .with_certs_directory("/tmp/certs")
        .build()
        .unwrap()
        .attach(endpoint)
}

#[test]
fn test_certs_and_mocks_scenario() {
    let request = CitmBuilder::new()
        .with_certs_directory("/tmp/certs")
        .with_mocks_directory("/tmp/mocks")
        .build()
        .unwrap();
    let config = request.configuration();

    assert_eq!(
        config.bind_mount_for(CERTS_MOUNT).map(|m| m.source.clone()),
        Some(PathBuf::from("/tmp/certs"))
    );
    assert_eq!(
        config.bind_mount_for(MOCKS_MOUNT).map(|m| m.source.clone()),
        Some(PathBuf::from("/tmp/mocks"))
    );
    assert_eq!(config.env(MOCK_PATHS_ENV), Some("/citm-mocks/**/*.mako"));
}

#[test]
fn test_missing_certs_directory_fails_build() {
    let err = CitmBuilder::new()
        .with_mocks_directory("/tmp/mocks")
        .build()
        .unwrap_err();

    assert!(matches!(err, CitmError::Configuration(_)));
    assert!(err.to_string().contains("certs directory"));
}

#[test]
fn test_explicit_mock_paths_build() {
    let request = CitmBuilder::new()
        .with_certs_directory("/tmp/certs")
        .with_mock_paths(["/citm-mocks/x/*.mako"])
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(
        request.configuration().env(MOCK_PATHS_ENV),
        Some("/citm-mocks/x/*.mako")
    );
}

#[test]
fn test_mock_path_outside_mount_is_rejected() {
    let base = CitmBuilder::new().with_certs_directory("/tmp/certs");
    let err = base.with_mock_paths(["/elsewhere/*.mako"]).unwrap_err();

    assert!(matches!(err, CitmError::MockPath { .. }));
    assert!(base.configuration().env(MOCK_PATHS_ENV).is_none());
}

#[test]
fn test_shared_base_builder() {
    let base = CitmBuilder::new().with_certs_directory("/tmp/certs");

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let base = base.clone();
            std::thread::spawn(move || {
                base.with_dns_names([format!("svc{}.test", i)])
                    .build()
                    .unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let request = handle.join().unwrap();
        assert_eq!(
            request.configuration().label("citm_dns_names"),
            Some(format!("svc{}.test", i).as_str())
        );
    }
    assert!(base.configuration().label("citm_dns_names").is_none());
}

#[test]
fn test_routed_urls_are_absolute() {
    let container = started("127.0.0.1");

    for (url, scheme) in [
        (container.http_base_url(&["s1", "s2"]).unwrap(), "http"),
        (container.https_base_url(&["s1", "s2"]).unwrap(), "https"),
        (container.admin_base_url(&["s1", "s2"]).unwrap(), "https"),
    ] {
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), scheme);
        assert_eq!(parsed.host_str(), Some("s1.s2.localhost"));
        assert!(parsed.port().is_some());
        assert!(url.contains("s1.s2"));
    }
}

#[test]
fn test_proxy_addresses() {
    let container = started("10.20.30.40");

    let http = container.http_proxy_address().unwrap();
    assert!(http.starts_with("http://"));
    assert!(http.contains(&container.hostname()));
    assert!(http.ends_with(":49155"));

    let socks = container.socks_proxy_address().unwrap();
    assert!(socks.starts_with("socks5://"));
    assert!(socks.contains(&container.hostname()));
    assert!(socks.ends_with(":49156"));
}

#[test]
fn test_addresses_are_stable_across_calls() {
    let container = started("::1");

    assert_eq!(
        container.https_base_url(&["a"]).unwrap(),
        container.https_base_url(&["a"]).unwrap()
    );
    assert_eq!(container.hostname_with_subdomains(&[]), "localhost");
    assert_eq!(container.hostname(), "::1");
}

#[test]
fn test_ipv6_docker_host_urls_are_absolute() {
    let host = resolve_host(None, Some("tcp://[fd00::2]:2375"));
    let container = started(&host);

    for url in [
        container.http_base_url(&["s1", "s2"]).unwrap(),
        container.https_base_url(&["s1"]).unwrap(),
        container.admin_base_url(&["utils", "citm"]).unwrap(),
    ] {
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("[fd00::2]"));
        assert!(parsed.port().is_some());
    }
    assert_eq!(container.http_proxy_address().unwrap(), "http://[fd00::2]:49155");
}

#[test]
fn test_blank_subdomain_is_ignored() {
    let container = started("127.0.0.1");

    let url = container.http_base_url(&[""]).unwrap();
    assert_eq!(url, "http://localhost:49153");
    assert_eq!(Url::parse(&url).unwrap().host_str(), Some("localhost"));
}
