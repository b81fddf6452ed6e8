// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! RouterOS wire protocol framing
//!
//! Only what the connection layer needs: length prefixes, words, sentences
//! and reply classification. Every sentence the client sends carries a
//! `.tag` so replies can be routed back to the command or stream that
//! issued them.

use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::mikrotik::types::Record;

/// Upper bound for a single word; anything larger is treated as corruption
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

// RouterOS protocol length encoding - intentional truncation is part of the wire format
#[allow(clippy::cast_possible_truncation)]
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        vec![((len >> 8) as u8) | 0x80, (len & 0xFF) as u8]
    } else if len < 0x0020_0000 {
        vec![
            ((len >> 16) as u8) | 0xC0,
            ((len >> 8) & 0xFF) as u8,
            (len & 0xFF) as u8,
        ]
    } else if len < 0x1000_0000 {
        vec![
            ((len >> 24) as u8) | 0xE0,
            ((len >> 16) & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            (len & 0xFF) as u8,
        ]
    } else {
        vec![
            0xF0,
            ((len >> 24) & 0xFF) as u8,
            ((len >> 16) & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            (len & 0xFF) as u8,
        ]
    }
}

/// Encodes a full sentence: every word length-prefixed, then the empty word
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        out.extend_from_slice(&encode_length(bytes.len()));
        out.extend_from_slice(bytes);
    }
    out.push(0);
    out
}

pub(crate) async fn read_length<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let first = reader.read_u8().await?;
    let len = if first & 0x80 == 0 {
        first as usize
    } else if first & 0xC0 == 0x80 {
        let second = reader.read_u8().await?;
        (((first & 0x3F) as usize) << 8) + second as usize
    } else if first & 0xE0 == 0xC0 {
        let second = reader.read_u8().await?;
        let third = reader.read_u8().await?;
        (((first & 0x1F) as usize) << 16) + ((second as usize) << 8) + third as usize
    } else if first & 0xF0 == 0xE0 {
        let second = reader.read_u8().await?;
        let third = reader.read_u8().await?;
        let fourth = reader.read_u8().await?;
        (((first & 0x0F) as usize) << 24)
            + ((second as usize) << 16)
            + ((third as usize) << 8)
            + fourth as usize
    } else if first == 0xF0 {
        let b2 = reader.read_u8().await?;
        let b3 = reader.read_u8().await?;
        let b4 = reader.read_u8().await?;
        let b5 = reader.read_u8().await?;
        (b2 as usize) << 24 | (b3 as usize) << 16 | (b4 as usize) << 8 | b5 as usize
    } else {
        // 0xF8..=0xFF are reserved control bytes
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("reserved length prefix {first:#04X}"),
        ));
    };
    Ok(len)
}

pub(crate) async fn read_word<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = read_length(reader).await?;
    if len == 0 {
        return Ok(String::new());
    }
    if len > MAX_WORD_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("word of {len} bytes exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into())
}

/// Reply word that opens a sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `!re` - one data record
    Re,
    /// `!done` - command finished
    Done,
    /// `!trap` - command-level error
    Trap,
    /// `!fatal` - the device is closing the session
    Fatal,
    /// `!empty` - command finished without records (RouterOS 7.18+)
    Empty,
    Unknown(String),
}

impl Reply {
    fn from_word(word: &str) -> Self {
        match word {
            "!re" => Self::Re,
            "!done" => Self::Done,
            "!trap" => Self::Trap,
            "!fatal" => Self::Fatal,
            "!empty" => Self::Empty,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One decoded reply sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub reply: Reply,
    pub tag: Option<String>,
    pub attributes: Record,
    /// Bare words (the reason text that follows `!fatal`)
    pub message: Option<String>,
}

impl Sentence {
    /// Builds a sentence from raw words; the first word is the reply type
    pub fn from_words<S: AsRef<str>>(words: &[S]) -> Self {
        let mut iter = words.iter().map(AsRef::as_ref);
        let reply = Reply::from_word(iter.next().unwrap_or_default());
        let mut tag = None;
        let mut attributes = HashMap::new();
        let mut message: Option<String> = None;
        for word in iter {
            if let Some(value) = word.strip_prefix(".tag=") {
                tag = Some(value.to_string());
            } else if let Some(stripped) = word.strip_prefix('=') {
                if let Some((k, v)) = stripped.split_once('=') {
                    attributes.insert(k.to_string(), v.to_string());
                } else {
                    attributes.insert(stripped.to_string(), String::new());
                }
            } else {
                match message.as_mut() {
                    Some(m) => {
                        m.push(' ');
                        m.push_str(word);
                    }
                    None => message = Some(word.to_string()),
                }
            }
        }
        Self {
            reply,
            tag,
            attributes,
            message,
        }
    }

    /// Human readable reason carried by a `!trap` or `!fatal`
    pub fn reason(&self) -> String {
        self.attributes
            .get("message")
            .cloned()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Reads the raw words of the next non-empty sentence
pub async fn read_words<R>(reader: &mut R) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut words: Vec<String> = Vec::new();
    loop {
        let word = read_word(reader).await?;
        if word.is_empty() {
            if words.is_empty() {
                continue;
            }
            return Ok(words);
        }
        tracing::trace!("Received word: {}", word);
        words.push(word);
    }
}

/// Reads the next complete reply sentence
pub(crate) async fn read_sentence<R>(reader: &mut R) -> std::io::Result<Sentence>
where
    R: AsyncRead + Unpin,
{
    let words = read_words(reader).await?;
    Ok(Sentence::from_words(&words))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_length_small() {
        assert_eq!(encode_length(0), vec![0]);
        assert_eq!(encode_length(1), vec![1]);
        assert_eq!(encode_length(127), vec![127]);
    }

    #[test]
    fn test_encode_length_medium() {
        assert_eq!(encode_length(128), vec![0x80, 0x80]);
        assert_eq!(encode_length(256), vec![0x81, 0x00]);
        assert_eq!(encode_length(0x3FFF), vec![0xBF, 0xFF]);
    }

    #[test]
    fn test_encode_length_large() {
        assert_eq!(encode_length(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encode_length(0x1F_FFFF), vec![0xDF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_sentence_terminates_with_empty_word() {
        let bytes = encode_sentence(&["/login", "=name=admin"]);
        assert_eq!(bytes[0], 6);
        assert_eq!(&bytes[1..7], b"/login");
        assert_eq!(bytes[7], 11);
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_sentence_from_words_splits_tag_and_attributes() {
        let s = Sentence::from_words(&["!re", ".tag=7", "=.id=*1", "=comment=a=b"]);
        assert_eq!(s.reply, Reply::Re);
        assert_eq!(s.tag.as_deref(), Some("7"));
        assert_eq!(s.attributes.get(".id").map(String::as_str), Some("*1"));
        // values may themselves contain '='
        assert_eq!(s.attributes.get("comment").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn test_fatal_reason_uses_bare_words() {
        let s = Sentence::from_words(&["!fatal", "session", "terminated"]);
        assert_eq!(s.reply, Reply::Fatal);
        assert_eq!(s.reason(), "session terminated");
    }

    #[test]
    fn test_trap_reason_prefers_message_attribute() {
        let s = Sentence::from_words(&["!trap", "=category=2", "=message=interrupted"]);
        assert_eq!(s.reason(), "interrupted");
    }

    #[tokio::test]
    async fn test_read_sentence_from_encoded_bytes() {
        let mut bytes = encode_sentence(&["!done", ".tag=3", "=ret=abc"]);
        bytes.extend(encode_sentence(&["!re", "=name=x"]));
        let mut reader = bytes.as_slice();

        let first = read_sentence(&mut reader).await.unwrap();
        assert_eq!(first.reply, Reply::Done);
        assert_eq!(first.tag.as_deref(), Some("3"));
        assert_eq!(first.attributes["ret"], "abc");

        let second = read_sentence(&mut reader).await.unwrap();
        assert_eq!(second.reply, Reply::Re);
        assert!(second.tag.is_none());
    }

    #[tokio::test]
    async fn test_read_length_rejects_reserved_prefix() {
        let bytes = [0xF8u8];
        let mut reader = &bytes[..];
        let err = read_length(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
