//! Integration tests for privacy module
//!
//! Exercises the content hasher and pattern scanner together the way the
//! anonymizer and tokenizer use them: scan, then pseudonymize each span.

#![cfg(feature = "foundation")]

use aegis_common::privacy::patterns::luhn_check;
use aegis_common::{ContentHasher, HashAlgorithm, PatternClass, PatternScanner};

// ============================================================================
// Scan + pseudonymize
// ============================================================================

#[test]
fn pseudonymize_every_detected_span() {
    let scanner = PatternScanner::new();
    let hasher =
        ContentHasher::new(HashAlgorithm::Blake3Keyed, b"tenant-salt".to_vec()).expect("hasher");

    let text = "Reach jane.doe@example.org or 555-867-5309";
    let mut output = String::new();
    let mut cursor = 0;
    for span in scanner.scan(text) {
        output.push_str(&text[cursor..span.start]);
        output.push_str(&hasher.pseudonym(span.class.label(), &span.value, 8));
        cursor = span.end;
    }
    output.push_str(&text[cursor..]);

    assert!(!output.contains("jane.doe@example.org"));
    assert!(!output.contains("867-5309"));
    assert!(output.contains("email_"));
    assert!(output.contains("phone_"));
    assert!(!scanner.contains_sensitive(&output), "pseudonyms must not rescan as sensitive");
}

#[test]
fn pseudonyms_are_stable_for_one_salt() {
    let hasher = ContentHasher::new(HashAlgorithm::Sha256, b"s".to_vec()).expect("hasher");
    assert_eq!(
        hasher.pseudonym("email", "a@example.com", 12),
        hasher.pseudonym("email", "a@example.com", 12)
    );
}

// ============================================================================
// Custom classes
// ============================================================================

#[test]
fn custom_class_is_reported_by_name() {
    let mut scanner = PatternScanner::with_classes([PatternClass::Email]);
    scanner.add_custom("patient_id", r"PT-\d{5}").expect("register");

    let matches = scanner.scan("PT-00042 emailed ops@example.com");
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].class, PatternClass::Custom("patient_id".to_string()));
    assert_eq!(matches[0].class.label(), "patient_id");
    assert_eq!(matches[1].class, PatternClass::Email);
}

#[test]
fn card_detection_requires_luhn() {
    assert!(luhn_check("4012 8888 8888 1881"));
    let scanner = PatternScanner::with_classes([PatternClass::CardNumber]);
    assert_eq!(scanner.scan("card 4012 8888 8888 1881").len(), 1);
    assert!(scanner.scan("card 4012 8888 8888 1882").is_empty());
}
