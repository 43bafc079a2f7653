use proptest::prelude::*;
use vecna_license::{RequestSigner, SIGNATURE_LEN, sign};

#[test]
fn signature_matches_known_vector() {
    let sig = sign("ABCD-1234", "AA:BB:CC:DD:EE:FF", 1_700_000_000_000, "vecna-sign-key");
    assert_eq!(sig, "173132b1384a1e3fb7ab79954b490c3d");
}

#[test]
fn signature_is_32_lowercase_hex() {
    let sig = sign("KEY", "00:11:22:33:44:55", 1, "secret");
    assert_eq!(sig.len(), SIGNATURE_LEN);
    assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn signer_uses_its_secret() {
    let signer = RequestSigner::new("vecna-sign-key");
    assert_eq!(
        signer.sign("ABCD-1234", "AA:BB:CC:DD:EE:FF", 1_700_000_000_000),
        sign("ABCD-1234", "AA:BB:CC:DD:EE:FF", 1_700_000_000_000, "vecna-sign-key")
    );
    let other = RequestSigner::new("another-secret");
    assert_ne!(
        signer.sign("K", "D", 5),
        other.sign("K", "D", 5)
    );
}

#[test]
fn signer_debug_hides_secret() {
    let signer = RequestSigner::new("top-secret");
    assert!(!format!("{signer:?}").contains("top-secret"));
}

#[test]
fn seal_is_full_sha256_hex() {
    let signer = RequestSigner::new("s");
    let sealed = signer.seal("AA:BB:CC:DD:EE:FF");
    assert_eq!(sealed.len(), 64);
    assert_eq!(sealed, signer.seal("AA:BB:CC:DD:EE:FF"));
}

proptest! {
    #[test]
    fn sign_is_deterministic(key in "[A-Z0-9-]{1,24}", device in "[A-F0-9:]{1,17}", t in 0i64..i64::MAX) {
        prop_assert_eq!(sign(&key, &device, t, "x"), sign(&key, &device, t, "x"));
    }

    #[test]
    fn changing_key_changes_signature(key in "[A-Z0-9]{1,24}", device in "[A-F0-9:]{1,17}", t in 0i64..i64::MAX) {
        let other = format!("{key}X");
        prop_assert_ne!(sign(&key, &device, t, "x"), sign(&other, &device, t, "x"));
    }

    #[test]
    fn changing_device_changes_signature(key in "[A-Z0-9]{1,24}", device in "[A-F0-9]{1,17}", t in 0i64..i64::MAX) {
        let other = format!("{device}0");
        prop_assert_ne!(sign(&key, &device, t, "x"), sign(&key, &other, t, "x"));
    }

    #[test]
    fn changing_timestamp_changes_signature(key in "[A-Z0-9]{1,24}", device in "[A-F0-9:]{1,17}", t in 0i64..i64::MAX - 1) {
        prop_assert_ne!(sign(&key, &device, t, "x"), sign(&key, &device, t + 1, "x"));
    }
}
