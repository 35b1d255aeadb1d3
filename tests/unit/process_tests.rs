//! Unit tests for pseudo-terminal output decoding.

use agent_conductor::orchestrator::process::{take_utf8, TerminalSize};

#[test]
fn complete_text_is_taken_whole() {
    let mut carry = b"hello\n".to_vec();
    assert_eq!(take_utf8(&mut carry), "hello\n");
    assert!(carry.is_empty());
}

#[test]
fn split_multibyte_sequence_is_carried_over() {
    let bytes = "héllo".as_bytes();
    let mut carry = bytes[..2].to_vec();

    assert_eq!(take_utf8(&mut carry), "h");
    assert_eq!(carry, &bytes[1..2]);

    carry.extend_from_slice(&bytes[2..]);
    assert_eq!(take_utf8(&mut carry), "éllo");
    assert!(carry.is_empty());
}

#[test]
fn invalid_bytes_are_replaced() {
    let mut carry = vec![b'a', 0xFF, b'b'];
    assert_eq!(take_utf8(&mut carry), "a\u{FFFD}b");
    assert!(carry.is_empty());
}

#[test]
fn default_terminal_is_wide() {
    let size = TerminalSize::default();
    assert_eq!(size.cols, 32_000);
    assert_eq!(size.rows, 30);
}
