// Field extraction from recognized stamp text
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::models::rules::airport;
use crate::models::{ExtractedStampCandidate, RecognitionMethod, RecognitionResult, StampType, COUNTRY_RULES};

lazy_static! {
    pub static ref DATE_PATTERN: Regex =
        Regex::new(r"\b(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{4}-\d{1,2}-\d{1,2})\b").expect("date pattern");
}

/// Tried in order; the first that parses wins.
pub const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%m/%d/%y", "%d/%m/%Y", "%d/%m/%y", "%Y-%m-%d", "%d-%m-%Y"];

const ENTRY_WORDS: &[&str] = &["ENTRY", "ARRIVAL"];
const EXIT_WORDS: &[&str] = &["EXIT", "DEPARTURE"];

/// Words printed on stamps that never name a place.
const NOISE_WORDS: &[&str] = &[
    "ENTRY", "EXIT", "ARRIVAL", "DEPARTURE", "ARRIVED", "DEPARTED", "ADMITTED", "IMMIGRATION",
    "PASSPORT", "CONTROL", "BORDER", "AIRPORT", "INTERNATIONAL", "AIR", "POLICE", "VISA",
    "TOURIST", "BUSINESS", "STUDENT", "WORK", "TRANSIT", "CLASS", "UNTIL", "PORT", "OF",
];

const WEIGHT_COUNTRY: f32 = 0.35;
const WEIGHT_DATE: f32 = 0.35;
const WEIGHT_CITY: f32 = 0.15;
const WEIGHT_AIRPORT: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenKind {
    Break,
    Content,
    Airport,
}

pub struct FieldExtractor;

impl FieldExtractor {
    /// Best-effort structured reading of one recognition result. Generative output that
    /// is JSON is mapped directly; anything else goes through the pattern rules.
    pub fn extract_result(result: &RecognitionResult) -> Option<ExtractedStampCandidate> {
        if result.source_method == RecognitionMethod::Generative {
            if let Some(candidate) = Self::from_generative_json(&result.text, result.confidence) {
                return candidate;
            }
            debug!("Generative output is not JSON, falling back to pattern rules");
        }
        Self::extract(&result.text, result.confidence, result.source_method)
    }

    /// `None` when no country, city or date can be identified.
    pub fn extract(text: &str, confidence: f32, method: RecognitionMethod) -> Option<ExtractedStampCandidate> {
        let stamp_type = Self::extract_direction(text);
        let date = Self::extract_date(text);

        let country_match = COUNTRY_RULES.find(text);
        let mut masked = text.to_string();
        if let Some((_, range)) = &country_match {
            masked.replace_range(range.clone(), "\n");
        }
        let tokens = tokenize(&masked);
        let city = Self::extract_city(&tokens);
        let airport_code = Self::extract_airport(&tokens);
        let country = country_match.map(|(name, _)| name.to_string());

        let (entry_date, exit_date) = match stamp_type {
            StampType::Exit => (None, date),
            // Undirected stamps are read as entries.
            StampType::Entry | StampType::Unknown => (date, None),
        };

        build_candidate(
            text,
            confidence,
            method,
            Fields {
                country,
                city,
                entry_date,
                exit_date,
                stamp_type,
                airport_code,
            },
        )
    }

    pub fn extract_direction(text: &str) -> StampType {
        let upper = text.to_uppercase();
        if ENTRY_WORDS.iter().any(|w| upper.contains(w)) {
            StampType::Entry
        } else if EXIT_WORDS.iter().any(|w| upper.contains(w)) {
            StampType::Exit
        } else {
            StampType::Unknown
        }
    }

    /// First date-shaped token that parses.
    pub fn extract_date(text: &str) -> Option<NaiveDate> {
        DATE_PATTERN
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .find_map(|m| parse_date(m.as_str()))
    }

    fn extract_city(tokens: &[(&str, TokenKind)]) -> Option<String> {
        let runs: Vec<Vec<&str>> = tokens
            .split(|(_, kind)| *kind != TokenKind::Content)
            .filter(|run| !run.is_empty())
            .map(|run| run.iter().map(|(word, _)| *word).collect())
            .collect();

        for run in &runs {
            if let Some(words) = sequences(run, is_title_word).into_iter().next() {
                return Some(words.join(" "));
            }
        }

        runs.iter()
            .flat_map(|run| sequences(run, is_upper_word))
            .find(|words| !(words.len() == 1 && words[0].len() == 3))
            .map(|words| words.iter().map(|w| title_case(w)).collect::<Vec<_>>().join(" "))
    }

    /// Known codes anywhere; otherwise a three-letter token not joined to another
    /// upper-case word ("LOS ANGELES" is a name).
    fn extract_airport(tokens: &[(&str, TokenKind)]) -> Option<String> {
        let is_upper_content = |i: Option<&(&str, TokenKind)>| {
            matches!(i, Some((word, TokenKind::Content)) if is_upper_word(word))
        };

        tokens.iter().enumerate().find_map(|(i, (word, kind))| match kind {
            TokenKind::Airport => Some(word.to_string()),
            TokenKind::Content
                if word.len() == 3
                    && is_upper_word(word)
                    && !is_upper_content(i.checked_sub(1).and_then(|p| tokens.get(p)))
                    && !is_upper_content(tokens.get(i + 1)) =>
            {
                Some(word.to_string())
            }
            _ => None,
        })
    }

    /// `Some(None)` when the JSON parsed but named nothing usable.
    fn from_generative_json(text: &str, confidence: f32) -> Option<Option<ExtractedStampCandidate>> {
        let stamp: GenerativeStamp = serde_json::from_str(strip_code_fence(text)).ok()?;

        let country = non_empty(stamp.country).map(|c| match COUNTRY_RULES.canonical_name(&c) {
            Some(name) => name.to_string(),
            None => c,
        });
        let entry_date = non_empty(stamp.entry_date).and_then(|d| parse_date(&d));
        let exit_date = non_empty(stamp.exit_date).and_then(|d| parse_date(&d));
        let stamp_type = match non_empty(stamp.stamp_type).map(|t| t.to_uppercase()) {
            Some(t) if ENTRY_WORDS.contains(&t.as_str()) => StampType::Entry,
            Some(t) if EXIT_WORDS.contains(&t.as_str()) => StampType::Exit,
            _ if entry_date.is_none() && exit_date.is_some() => StampType::Exit,
            _ if entry_date.is_some() => StampType::Entry,
            _ => StampType::Unknown,
        };

        Some(build_candidate(
            text,
            confidence,
            RecognitionMethod::Generative,
            Fields {
                country,
                city: non_empty(stamp.city),
                entry_date,
                exit_date,
                stamp_type,
                airport_code: non_empty(stamp.airport_code).map(|a| a.to_uppercase()),
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerativeStamp {
    country: Option<String>,
    city: Option<String>,
    entry_date: Option<String>,
    exit_date: Option<String>,
    airport_code: Option<String>,
    stamp_type: Option<String>,
}

struct Fields {
    country: Option<String>,
    city: Option<String>,
    entry_date: Option<NaiveDate>,
    exit_date: Option<NaiveDate>,
    stamp_type: StampType,
    airport_code: Option<String>,
}

fn build_candidate(
    text: &str,
    confidence: f32,
    method: RecognitionMethod,
    fields: Fields,
) -> Option<ExtractedStampCandidate> {
    let has_date = fields.entry_date.is_some() || fields.exit_date.is_some();
    if fields.country.is_none() && fields.city.is_none() && !has_date {
        return None;
    }

    let mut completeness = 0.0;
    if fields.country.is_some() {
        completeness += WEIGHT_COUNTRY;
    }
    if has_date {
        completeness += WEIGHT_DATE;
    }
    if fields.city.is_some() {
        completeness += WEIGHT_CITY;
    }
    if fields.airport_code.is_some() {
        completeness += WEIGHT_AIRPORT;
    }

    Some(ExtractedStampCandidate {
        raw_text: text.to_string(),
        confidence: confidence.min(completeness).clamp(0.0, 1.0),
        country: fields.country,
        city: fields.city,
        entry_date: fields.entry_date,
        exit_date: fields.exit_date,
        stamp_type: fields.stamp_type,
        airport_code: fields.airport_code,
        source_id: None,
        method,
    })
}

/// Parses with [`DATE_FORMATS`]. Four-digit-year formats refuse two-digit years so
/// `03/14/23` is read as 2023, not year 23.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS.iter().find_map(|format| {
        let date = NaiveDate::parse_from_str(raw, format).ok()?;
        if format.contains("%Y") && date.year() < 1000 {
            return None;
        }
        Some(date)
    })
}

/// Unwraps a Markdown code fence (```json ... ```) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Words in text order. Anything other than letters and blanks ends a run, and so does
/// a noise word.
fn tokenize(text: &str) -> Vec<(&str, TokenKind)> {
    let mut tokens = Vec::new();
    for segment in text.split(|c: char| !(c.is_alphabetic() || c == ' ' || c == '\t')) {
        for word in segment.split_whitespace() {
            let upper = word.to_uppercase();
            let kind = if word.chars().count() < 2 || NOISE_WORDS.contains(&upper.as_str()) {
                TokenKind::Break
            } else if word.len() == 3 && is_upper_word(word) && airport(word).is_some() {
                TokenKind::Airport
            } else {
                TokenKind::Content
            };
            tokens.push((word, kind));
        }
        tokens.push(("", TokenKind::Break));
    }
    tokens
}

/// Maximal runs of consecutive words satisfying `pred`.
fn sequences<'a>(words: &[&'a str], pred: fn(&str) -> bool) -> Vec<Vec<&'a str>> {
    words
        .split(|w| !pred(w))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_vec())
        .collect()
}

fn is_title_word(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(first) if first.is_uppercase())
        && word.chars().count() >= 2
        && chars.all(|c| c.is_lowercase())
}

fn is_upper_word(word: &str) -> bool {
    word.chars().count() >= 2 && word.chars().all(|c| c.is_uppercase())
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}
