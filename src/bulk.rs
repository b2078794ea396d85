//! Best-effort parser for pasted bulk text.
//!
//! Blocks are separated by blank lines or by lines that only hold a list
//! number. A block with a source URL becomes a [`Job`]; a block without one
//! becomes the sticky header note for the blocks that follow it.

use crate::models::{Job, Specifics};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Single `key: value` lines are only read as specifics for these keys.
const COMMON_SPEC_KEYS: &[&str] = &[
    "size",
    "size name",
    "style",
    "style name",
    "colour",
    "colour name",
    "color",
    "pattern",
    "model",
    "material",
    "capacity",
    "length",
    "width",
    "height",
    "flavour",
    "flavor",
    "pack size",
    "variant",
    "type",
    "edition",
    "storage",
    "ram",
    "connectivity",
    "platform",
    "shape",
    "fit",
    "waist",
    "chest",
    "age range",
    "gender",
    "power",
    "wattage",
    "voltage",
    "brand",
];

const MIN_TITLE_HINT_CHARS: usize = 8;

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://\S*amazon\.[a-z.]+/\S+").expect("source url pattern")
});
static QTY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:qty|quantity)\s*:\s*(\d+)\s*$").expect("qty pattern"));
static NOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*note\b[:\s]\s*(.+)$").expect("note pattern"));
static NUMBERING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\s*$").expect("numbering"));

enum LineKind {
    Url,
    Quantity,
    Note,
    Specifics,
    Other,
}

/// Parses pasted text into jobs numbered `1..=N` in block order.
pub fn parse(text: &str) -> Vec<Job> {
    let mut jobs = Vec::new();
    let mut sticky_note = String::new();

    for block in split_blocks(text) {
        let mut url: Option<String> = None;
        let mut quantity: Option<u32> = None;
        let mut local_notes: Vec<String> = Vec::new();
        let mut specifics = Specifics::new();
        let mut title_candidates: Vec<&str> = Vec::new();

        for line in &block {
            match classify(line, url.is_none()) {
                (LineKind::Url, Some(found)) => url = Some(found),
                (LineKind::Url, None) => {}
                (LineKind::Quantity, _) => {
                    if let Some(parsed) = parse_quantity(line) {
                        quantity = Some(parsed);
                    }
                }
                (LineKind::Note, _) => {
                    if let Some(note) = parse_note(line) {
                        local_notes.push(note);
                    }
                }
                (LineKind::Specifics, _) => specifics.extend(parse_specifics_line(line)),
                (LineKind::Other, _) => title_candidates.push(line.trim()),
            }
        }

        let Some(url) = url else {
            let header = block.join(" ").trim().to_string();
            if !header.is_empty() {
                sticky_note = header;
            }
            continue;
        };

        let mut job = Job::new(jobs.len() + 1, url);
        job.quantity = quantity.unwrap_or(1);
        job.note = merge_notes(&sticky_note, &local_notes);
        job.custom_specifics = specifics;
        job.title_hint = pick_title_hint(&title_candidates);
        jobs.push(job);
    }

    jobs
}

fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.trim().lines().map(str::trim_end) {
        if line.trim().is_empty() || NUMBERING_RE.is_match(line) {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Classifies a line. The URL is only returned while the block has none yet;
/// later URL lines are still classified as URLs so they never leak into
/// specifics or the title hint.
fn classify(line: &str, want_url: bool) -> (LineKind, Option<String>) {
    if let Some(found) = URL_RE.find(line) {
        let url = found
            .as_str()
            .trim()
            .trim_end_matches([')', '.', ',', ']'])
            .to_string();
        return (LineKind::Url, want_url.then_some(url));
    }

    let lowered = line.trim_start().to_lowercase();
    if (lowered.starts_with("qty") || lowered.starts_with("quantity")) && line.contains(':') {
        return (LineKind::Quantity, None);
    }
    if NOTE_RE.is_match(line) {
        return (LineKind::Note, None);
    }
    if line.contains(':') && !parse_specifics_line(line).is_empty() {
        return (LineKind::Specifics, None);
    }
    (LineKind::Other, None)
}

fn parse_quantity(line: &str) -> Option<u32> {
    QTY_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|qty| *qty > 0)
}

fn parse_note(line: &str) -> Option<String> {
    NOTE_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|note| !note.is_empty())
}

/// Reads `Key: Value | Key: Value` lines. A lone pair only counts when its key
/// is a common attribute, which keeps titles such as "4:1 Extract" out.
fn parse_specifics_line(line: &str) -> Specifics {
    let pairs: Vec<(&str, &str)> = line
        .split('|')
        .map(str::trim)
        .filter_map(|segment| segment.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    match pairs.as_slice() {
        [] => Specifics::new(),
        [(key, value)] => {
            let lowered = key.to_lowercase();
            if COMMON_SPEC_KEYS.contains(&lowered.as_str()) && !value.is_empty() {
                std::iter::once((*key, *value)).collect()
            } else {
                Specifics::new()
            }
        }
        _ => pairs
            .into_iter()
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .collect(),
    }
}

/// Reads a free-form `Key: Value | Key: Value` field as typed into a
/// single-product form. Unlike bulk lines, any key is accepted.
pub fn parse_custom_specifics(raw: &str) -> Specifics {
    raw.split('|')
        .filter_map(|segment| segment.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect()
}

fn merge_notes(sticky: &str, local: &[String]) -> String {
    let mut seen = HashSet::new();
    let mut parts: Vec<&str> = Vec::new();
    for part in std::iter::once(sticky).chain(local.iter().map(String::as_str)) {
        if !part.is_empty() && seen.insert(part) {
            parts.push(part);
        }
    }
    parts.join("\n")
}

fn pick_title_hint(candidates: &[&str]) -> Option<String> {
    let mut best: Option<&str> = None;
    for &candidate in candidates {
        let length = candidate.chars().count();
        if length < MIN_TITLE_HINT_CHARS || looks_like_product_code(candidate) {
            continue;
        }
        if best.is_none_or(|current| length > current.chars().count()) {
            best = Some(candidate);
        }
    }
    best.map(str::to_string)
}

fn looks_like_product_code(value: &str) -> bool {
    !value.contains(char::is_whitespace)
        && value
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
}
