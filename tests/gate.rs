use std::collections::HashMap;
use std::time::Duration;
use thumbproxy::config::{CacheBackend, ConfigError, ThumbConfig};
use thumbproxy::gate::{decode_url, encode_url, resolve, OriginAllowList, Rejection};
use thumbproxy::key::CacheKey;

fn allow() -> OriginAllowList {
    OriginAllowList::new(&["https://allowed.example", "https://cdn.allowed.example:8443"]).unwrap()
}

#[test]
fn decodes_standard_and_url_safe_alphabets() {
    // "?>>" encodes to "Pz4+" (standard) and "Pz4-" (url-safe)
    assert_eq!(decode_url("Pz4+").unwrap(), "?>>");
    assert_eq!(decode_url("Pz4-").unwrap(), "?>>");
    // Padding is optional
    assert_eq!(decode_url("YQ").unwrap(), "a");
    assert_eq!(decode_url("YQ==").unwrap(), "a");
}

#[test]
fn rejects_undecodable_input() {
    for bad in ["", "   ", "!!!!", "YQ=x"] {
        assert!(matches!(decode_url(bad), Err(Rejection::MalformedInput(_))), "{bad:?}");
    }
    // Valid base64 of invalid UTF-8
    assert!(matches!(decode_url("//79"), Err(Rejection::MalformedInput(_))));
}

#[test]
fn resolves_allowed_url() {
    let url = "https://allowed.example/img/a.png?size=large";
    let source = resolve(&encode_url(url), &allow()).unwrap();
    assert_eq!(source.as_str(), url);
}

#[test]
fn origin_comparison_is_normalized() {
    let allow = allow();
    assert!(allow.approve("HTTPS://Allowed.Example/a.png").is_ok());
    assert!(allow.approve("https://allowed.example:443/a.png").is_ok());
    assert!(allow.approve("https://cdn.allowed.example:8443/a.png").is_ok());
}

#[test]
fn rejects_other_origins() {
    let allow = allow();
    for url in [
        "https://evil.example/x.png",
        "http://allowed.example/x.png",
        "https://allowed.example:8443/x.png",
        "https://cdn.allowed.example/x.png",
        "https://allowed.example.evil.example/x.png",
    ] {
        assert!(matches!(allow.approve(url), Err(Rejection::OriginNotAllowed(_))), "{url}");
    }
}

#[test]
fn rejects_non_http_and_relative_urls() {
    let allow = allow();
    for url in [
        "/img/a.png",
        "file:///etc/passwd",
        "ftp://allowed.example/a.png",
        "https://user:pw@allowed.example/a.png",
    ] {
        assert!(matches!(allow.approve(url), Err(Rejection::MalformedInput(_))), "{url}");
    }
}

#[test]
fn allow_list_entries_must_be_bare_origins() {
    assert!(matches!(OriginAllowList::new::<&str>(&[]), Err(ConfigError::EmptyAllowList)));
    for entry in ["allowed.example", "https://allowed.example/img", "ftp://allowed.example", "https://allowed.example/?q=1"] {
        assert!(matches!(OriginAllowList::new(&[entry]), Err(ConfigError::InvalidOrigin(_))), "{entry}");
    }
    assert!(OriginAllowList::new(&["https://allowed.example/"]).is_ok());
}

#[test]
fn cache_key_is_stable_hex_sha256() {
    let allow = allow();
    let source = allow.approve("https://allowed.example/img/a.png").unwrap();
    let key = CacheKey::for_source(&source);
    assert_eq!(key.as_str().len(), 64);
    assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(key, CacheKey::for_source(&allow.approve("https://allowed.example/img/a.png").unwrap()));
    assert_eq!(key.etag(), format!("\"{}\"", key));
}

#[test]
fn cache_key_ignores_query_order_and_fragment() {
    let allow = allow();
    let a = CacheKey::for_source(&allow.approve("https://allowed.example/a.png?w=1&h=2").unwrap());
    let b = CacheKey::for_source(&allow.approve("https://allowed.example/a.png?h=2&w=1").unwrap());
    let c = CacheKey::for_source(&allow.approve("https://allowed.example/a.png?h=2&w=1#top").unwrap());
    assert_eq!(a, b);
    assert_eq!(b, c);
}

#[test]
fn cache_key_distinguishes_urls() {
    let allow = allow();
    let a = CacheKey::for_source(&allow.approve("https://allowed.example/a.png").unwrap());
    let b = CacheKey::for_source(&allow.approve("https://allowed.example/b.png").unwrap());
    let c = CacheKey::for_source(&allow.approve("https://allowed.example/a.png?v=2").unwrap());
    assert_ne!(a, b);
    assert_ne!(a, c);
}

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| map.get(name).cloned()
}

#[test]
fn config_defaults_match_reference_deployment() {
    let cfg = ThumbConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!((cfg.target.width, cfg.target.height), (500, 281));
    assert_eq!(cfg.fetch_timeout, Duration::from_secs(5));
    assert_eq!(cfg.allowed_origins, vec!["https://admin.insights.ubuntu.com".to_string()]);
    assert_eq!(cfg.cache_backend, CacheBackend::Sled);
    assert!(cfg.rate_limit.is_some());
    cfg.validate().unwrap();
}

#[test]
fn config_reads_overrides() {
    let cfg = ThumbConfig::from_lookup(lookup(&[
        ("THUMB_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ("THUMB_TARGET_WIDTH", "320"),
        ("THUMB_TARGET_HEIGHT", "180"),
        ("THUMB_FETCH_TIMEOUT_SECS", "2"),
        ("THUMB_CACHE_BACKEND", "disk"),
        ("DISABLE_RATE_LIMIT", "1"),
        ("PORT", "9000"),
    ]))
    .unwrap();
    assert_eq!(cfg.allowed_origins, vec!["https://a.example".to_string(), "https://b.example".to_string()]);
    assert_eq!((cfg.target.width, cfg.target.height), (320, 180));
    assert_eq!(cfg.fetch_timeout, Duration::from_secs(2));
    assert_eq!(cfg.cache_backend, CacheBackend::Disk);
    assert!(cfg.rate_limit.is_none());
    assert_eq!(cfg.port, 9000);
    cfg.validate().unwrap();
}

#[test]
fn config_rejects_bad_values() {
    assert!(matches!(
        ThumbConfig::from_lookup(lookup(&[("THUMB_TARGET_WIDTH", "wide")])),
        Err(ConfigError::InvalidValue { name: "THUMB_TARGET_WIDTH", .. })
    ));
    assert!(matches!(
        ThumbConfig::from_lookup(lookup(&[("THUMB_CACHE_BACKEND", "redis")])),
        Err(ConfigError::UnknownCacheBackend(_))
    ));

    let zero = ThumbConfig::from_lookup(lookup(&[("THUMB_TARGET_HEIGHT", "0")])).unwrap();
    assert!(matches!(zero.validate(), Err(ConfigError::InvalidTarget)));

    let empty = ThumbConfig::from_lookup(lookup(&[("THUMB_ALLOWED_ORIGINS", " , ")])).unwrap();
    assert!(matches!(empty.validate(), Err(ConfigError::EmptyAllowList)));
}
