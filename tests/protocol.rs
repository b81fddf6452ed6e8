// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

use mikrotik_connector::{Reply, Sentence, encode_length, encode_sentence, read_words};
use std::io::ErrorKind;

const WORD_LIMIT: usize = 16 * 1024 * 1024;

async fn read_one(bytes: &[u8]) -> std::io::Result<Vec<String>> {
    let mut reader = bytes;
    read_words(&mut reader).await
}

#[test]
fn five_byte_lengths_use_f0_marker() {
    assert_eq!(encode_length(0x0FFF_FFFF), vec![0xEF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(encode_length(0x1000_0000), vec![0xF0, 0x10, 0x00, 0x00, 0x00]);
    assert_eq!(encode_length(0x7FFF_FFFF), vec![0xF0, 0x7F, 0xFF, 0xFF, 0xFF]);
    assert_eq!(encode_length(0xFFFF_FFFF), vec![0xF0, 0xFF, 0xFF, 0xFF, 0xFF]);
}

#[tokio::test]
async fn words_survive_every_prefix_width() {
    for len in [0x7F, 0x80, 0x4000, 0x0020_0000] {
        let word = "x".repeat(len);
        let words = read_one(&encode_sentence(&[word.as_str()])).await.unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].len(), len, "word of {len:#X} bytes");
    }
}

#[tokio::test]
async fn reserved_prefixes_are_rejected() {
    for first in 0xF8..=0xFFu8 {
        let err = read_one(&[first, 0, 0, 0, 0]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData, "prefix {first:#04X}");
    }
}

#[tokio::test]
async fn five_byte_prefix_is_decoded() {
    // a length the device can express but that we refuse to buffer
    let err = read_one(&encode_length(0x1000_0000)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(err.to_string().contains("268435456"));
}

#[tokio::test]
async fn oversized_word_fails_before_payload() {
    let err = read_one(&encode_length(WORD_LIMIT + 1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);

    // at the limit the length is accepted and the missing payload is the error
    let err = read_one(&encode_length(WORD_LIMIT)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn truncated_sentence_is_eof() {
    let bytes = encode_sentence(&["!re", "=name=ether1"]);
    let err = read_one(&bytes[..bytes.len() - 3]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn tags_route_interleaved_replies() {
    let mut bytes = encode_sentence(&["!re", ".tag=s7", "=name=alice", "=address=10.5.50.2"]);
    bytes.extend(encode_sentence(&["!done", ".tag=c3", "=ret=*A"]));
    bytes.extend(encode_sentence(&["!trap", ".tag=s7", "=category=2", "=message=interrupted"]));
    let mut reader = bytes.as_slice();

    let stream = Sentence::from_words(&read_words(&mut reader).await.unwrap());
    assert_eq!(stream.reply, Reply::Re);
    assert_eq!(stream.tag.as_deref(), Some("s7"));
    assert_eq!(stream.attributes["address"], "10.5.50.2");

    let command = Sentence::from_words(&read_words(&mut reader).await.unwrap());
    assert_eq!(command.reply, Reply::Done);
    assert_eq!(command.tag.as_deref(), Some("c3"));
    assert_eq!(command.attributes["ret"], "*A");

    let cancelled = Sentence::from_words(&read_words(&mut reader).await.unwrap());
    assert_eq!(cancelled.reply, Reply::Trap);
    assert_eq!(cancelled.tag.as_deref(), Some("s7"));
    assert_eq!(cancelled.reason(), "interrupted");
    assert!(!cancelled.attributes.contains_key(".tag"));
}

#[tokio::test]
async fn empty_sentences_between_replies_are_skipped() {
    let mut bytes = vec![0u8, 0u8];
    bytes.extend(encode_sentence(&["!done", ".tag=3"]));
    let mut reader = bytes.as_slice();

    let words = read_words(&mut reader).await.unwrap();
    assert_eq!(words, vec!["!done".to_string(), ".tag=3".to_string()]);
    assert_eq!(
        read_words(&mut reader).await.unwrap_err().kind(),
        ErrorKind::UnexpectedEof
    );
}

#[test]
fn fatal_reason_joins_bare_words() {
    let sentence = Sentence::from_words(&["!fatal", "session", "terminated"]);
    assert_eq!(sentence.reply, Reply::Fatal);
    assert_eq!(sentence.reason(), "session terminated");
}
