//! Human readable identifiers for contests and tickets
//!
//! Codes are short and typed by people at a cash desk, so they are drawn from
//! `[A-Z0-9]` only. Uniqueness is not guaranteed here: callers insert, watch for
//! a unique-constraint violation and ask for a fresh code, at most
//! [`MAX_CODE_ATTEMPTS`] times.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_SUFFIX_LEN: usize = 6;
pub const TICKET_PREFIX: &str = "TK";
pub const MAX_CODE_ATTEMPTS: u32 = 10;

const FALLBACK_INITIALS: &str = "XX";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// `TK-XXXXXX`
    Ticket,
    /// Two initials from the contest name, then `-XXXXXX`
    Contest,
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket => write!(f, "ticket"),
            Self::Contest => write!(f, "contest"),
        }
    }
}

/// Source of candidate codes, swapped out in tests to force collisions
pub trait CodeGenerator: Send + Sync {
    /// `seed` is the contest name for [`CodeKind::Contest`] and ignored for tickets
    fn generate(&self, kind: CodeKind, seed: Option<&str>) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self, kind: CodeKind, seed: Option<&str>) -> String {
        generate_code_with(&mut rand::rng(), kind, seed)
    }
}

pub fn generate_code(kind: CodeKind, seed: Option<&str>) -> String {
    generate_code_with(&mut rand::rng(), kind, seed)
}

pub fn generate_code_with<R: Rng + ?Sized>(
    rng: &mut R,
    kind: CodeKind,
    seed: Option<&str>,
) -> String {
    let prefix = match kind {
        CodeKind::Ticket => TICKET_PREFIX.to_string(),
        CodeKind::Contest => extract_initials(seed.unwrap_or_default()),
    };
    format!("{}-{}", prefix, random_suffix(rng))
}

pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_SUFFIX_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Two uppercase letters derived from a contest name.
///
/// One word gives its first two letters (a one-letter word is doubled), more
/// words give the first letter of each of the first two. Accented Latin letters
/// are folded to their base letter and anything else is skipped.
pub fn extract_initials(name: &str) -> String {
    let words: Vec<Vec<char>> = name
        .split_whitespace()
        .map(|word| word.chars().filter_map(fold_letter).collect::<Vec<char>>())
        .filter(|letters| !letters.is_empty())
        .collect();

    match words.as_slice() {
        [] => FALLBACK_INITIALS.to_string(),
        [only] => {
            let first = only[0];
            let second = only.get(1).copied().unwrap_or(first);
            [first, second].iter().collect()
        }
        [first, second, ..] => [first[0], second[0]].iter().collect(),
    }
}

pub fn is_valid_code(kind: CodeKind, code: &str) -> bool {
    let Some((prefix, suffix)) = code.split_once('-') else {
        return false;
    };

    let prefix_ok = match kind {
        CodeKind::Ticket => prefix == TICKET_PREFIX,
        CodeKind::Contest => prefix.len() == 2 && prefix.bytes().all(|b| b.is_ascii_uppercase()),
    };

    prefix_ok
        && suffix.len() == CODE_SUFFIX_LEN
        && suffix.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

fn fold_letter(c: char) -> Option<char> {
    if c.is_ascii_alphabetic() {
        return Some(c.to_ascii_uppercase());
    }
    let folded = match c.to_lowercase().next()? {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'U',
        'ç' => 'C',
        'ñ' => 'N',
        _ => return None,
    };
    Some(folded)
}
