use upsync_core::version::{read_marker, write_marker, Version};

#[test]
fn parses_plain_and_tagged_forms() {
    let v: Version = "1.4.0".parse().unwrap();
    assert_eq!(v, Version { major: 1, minor: 4, patch: 0 });
    // Release tags carry a `v` prefix and sometimes a pre-release tail.
    assert_eq!("v1.4.0".parse::<Version>().unwrap(), v);
    assert_eq!("v1.4.0-alpha".parse::<Version>().unwrap(), v);
    assert_eq!(v.to_string(), "1.4.0");
}

#[test]
fn ordering_is_numeric_not_lexical() {
    let a: Version = "1.2.10".parse().unwrap();
    let b: Version = "1.2.9".parse().unwrap();
    assert!(a > b);
    let c: Version = "2.0.0".parse().unwrap();
    assert!(c > a);
}

#[test]
fn rejects_malformed_versions() {
    assert!("1.2".parse::<Version>().is_err());
    assert!("1.2.3.4".parse::<Version>().is_err());
    assert!("a.b.c".parse::<Version>().is_err());
}

#[test]
fn marker_roundtrip() {
    let td = tempfile::tempdir().unwrap();
    assert_eq!(read_marker(td.path()).unwrap(), None);
    write_marker(td.path(), "1.4.0").unwrap();
    assert_eq!(read_marker(td.path()).unwrap(), Some("1.4.0".to_string()));
    write_marker(td.path(), "1.5.0").unwrap();
    assert_eq!(read_marker(td.path()).unwrap(), Some("1.5.0".to_string()));
}
