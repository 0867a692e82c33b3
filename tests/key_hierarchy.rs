//! Master-key derivation, key wrapping and strategy selection.

use chronovault::keys::SALT_LEN;
use chronovault::{
    generate_message_key, select_key_strategy, unwrap_key, wrap_key, KeyStrategy, MasterKey, Salt,
    VaultError, Visibility,
};

const ITERATIONS: u32 = 1_000;

fn salt(byte: u8) -> Salt {
    Salt::from_bytes([byte; SALT_LEN])
}

#[test]
fn same_inputs_derive_same_master_key() {
    let a = MasterKey::derive("correct horse battery", &salt(1), ITERATIONS).unwrap();
    let b = MasterKey::derive("correct horse battery", &salt(1), ITERATIONS).unwrap();

    let key = generate_message_key().unwrap();
    let wrapped = wrap_key(&key, &a).unwrap();
    let back = unwrap_key(&wrapped.wrapped, &wrapped.nonce, &b).unwrap();
    assert_eq!(back.export(), key.export());
}

#[test]
fn different_salt_or_password_cannot_unwrap() {
    let master = MasterKey::derive("correct horse battery", &salt(1), ITERATIONS).unwrap();
    let key = generate_message_key().unwrap();
    let wrapped = wrap_key(&key, &master).unwrap();

    let other_salt = MasterKey::derive("correct horse battery", &salt(2), ITERATIONS).unwrap();
    let other_password = MasterKey::derive("correct horse battery!", &salt(1), ITERATIONS).unwrap();
    let other_iterations = MasterKey::derive("correct horse battery", &salt(1), ITERATIONS + 1).unwrap();

    for wrong in [&other_salt, &other_password, &other_iterations] {
        let err = unwrap_key(&wrapped.wrapped, &wrapped.nonce, wrong).unwrap_err();
        assert!(matches!(err, VaultError::Authentication));
    }
}

#[test]
fn zero_iterations_is_rejected() {
    let err = MasterKey::derive("pw", &salt(0), 0).unwrap_err();
    assert!(matches!(err, VaultError::Config(_)));
}

#[test]
fn wrapping_twice_uses_distinct_nonces() {
    let master = MasterKey::derive("pw-pw-pw-pw", &salt(9), ITERATIONS).unwrap();
    let key = generate_message_key().unwrap();
    let first = wrap_key(&key, &master).unwrap();
    let second = wrap_key(&key, &master).unwrap();
    assert_ne!(first.nonce, second.nonce);
    assert_ne!(first.wrapped, second.wrapped);
}

#[test]
fn malformed_wrap_data_is_format_error() {
    let master = MasterKey::derive("pw-pw-pw-pw", &salt(9), ITERATIONS).unwrap();
    let err = unwrap_key("%%%", "AAAAAAAAAAAAAAAA", &master).unwrap_err();
    assert!(matches!(err, VaultError::Format(_)));
}

#[test]
fn salt_survives_base64() {
    let s = Salt::generate().unwrap();
    assert_eq!(Salt::from_base64(&s.to_base64()).unwrap(), s);
    assert!(Salt::from_base64("c2hvcnQ=").is_err());
}

#[test]
fn strategy_per_visibility() {
    assert_eq!(select_key_strategy(Visibility::Public), KeyStrategy::ExportPlaintext);
    assert_eq!(select_key_strategy(Visibility::PrivateSelf), KeyStrategy::WrapWithMaster);
    assert_eq!(
        select_key_strategy(Visibility::PrivateRecipient),
        KeyStrategy::ExportPlaintextWithAcl
    );

    assert!(KeyStrategy::WrapWithMaster.requires_master_key());
    assert!(!KeyStrategy::WrapWithMaster.stores_exported_key());
    assert!(KeyStrategy::ExportPlaintextWithAcl.requires_recipient());
    assert!(!KeyStrategy::ExportPlaintext.requires_recipient());
}
