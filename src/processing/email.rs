// Flight confirmation parsing from already-fetched email messages
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::Range;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::models::rules::{airline_by_iata, airline_by_name, AIRLINES};
use crate::models::{EmailMessage, FlightConfirmationCandidate};
use crate::processing::extractors::{parse_date, DATE_PATTERN};

pub const CONFIRMATION_KEYWORDS: &[&str] = &[
    "flight confirmation",
    "booking confirmation",
    "itinerary",
    "flight details",
    "ticket confirmation",
    "boarding pass",
];

/// Upper-case three-letter tokens common in confirmations that are not airports.
const NON_AIRPORT_TOKENS: &[&str] = &[
    "USD", "EUR", "GBP", "CAD", "MXN", "JPY", "PNR", "REF", "AND", "THE", "FOR", "YOU", "ARE",
    "NOT", "ALL", "VIA", "TAX", "FEE", "ETA", "ETD", "UTC", "GMT", "EST", "PST", "CST",
    "MST", "EDT", "PDT", "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT",
    "NOV", "DEC", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN",
];

const MONTHS: &[&str] = &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];

lazy_static! {
    static ref FLIGHT_NUMBER_PATTERN: Regex =
        Regex::new(r"\b([A-Z]{2,3})\s?(\d{3,4})\b").expect("flight number pattern");
    static ref TIME_PATTERN: Regex =
        Regex::new(r"(?i)\b(\d{1,2}:\d{2}(?:\s?(?:AM|PM))?)\b").expect("time pattern");
    static ref AIRPORT_PATTERN: Regex = Regex::new(r"\b([A-Z]{3})\b").expect("airport pattern");
    static ref MONTH_FIRST_DATE: Regex = Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})\b"
    )
    .expect("month first date pattern");
    static ref DAY_FIRST_DATE: Regex = Regex::new(
        r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})\b"
    )
    .expect("day first date pattern");
    static ref AIRLINE_PATTERN: Regex = {
        let mut names: Vec<&str> = AIRLINES.iter().map(|a| a.name).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()));
        let alternation = names.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|");
        Regex::new(&format!(r"(?i)\b({})\b", alternation)).expect("airline pattern")
    };
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?is)<(?:script|style)\b.*?</(?:script|style)\s*>").expect("script pattern");
    static ref BLOCK_BREAK: Regex = Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6]|table)\s*>").expect("break pattern");
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").expect("tag pattern");
}

pub struct EmailParser;

impl EmailParser {
    /// Flight metadata from a confirmation email, or `None` when the message is not a
    /// confirmation or nothing could be extracted. Depends only on the message.
    pub fn parse(email: &EmailMessage) -> Option<FlightConfirmationCandidate> {
        let body = Self::html_to_text(&email.body);
        if !Self::is_confirmation(&email.subject, &body) {
            return None;
        }

        let text = format!("{}\n{}", email.subject, body);
        let mut raw_fields: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let flights = extract_flight_numbers(&text);
        let dates = extract_dates(&text);
        let times = extract_times(&text);
        let flight_spans: Vec<Range<usize>> = flights.iter().map(|(span, _)| span.clone()).collect();
        let airports = extract_airports(&text, &flight_spans);
        let airlines = extract_airlines(&text);

        record(&mut raw_fields, "flight_number", flights.iter().map(|(_, f)| f.clone()));
        record(&mut raw_fields, "date", dates.iter().map(|(raw, _)| raw.clone()));
        record(&mut raw_fields, "time", times.iter().cloned());
        record(&mut raw_fields, "airport_code", airports.iter().cloned());
        record(&mut raw_fields, "airline", airlines.iter().map(|a| a.to_string()));

        if raw_fields.is_empty() {
            debug!("Email {} is a confirmation but no flight fields matched", email.message_id);
            return None;
        }

        let flight_number = flights.first().map(|(_, f)| f.clone());
        let airline = airlines.first().map(|a| a.to_string()).or_else(|| {
            flight_number
                .as_deref()
                .and_then(|f| f.get(..2))
                .and_then(airline_by_iata)
                .map(str::to_string)
        });

        Some(FlightConfirmationCandidate {
            source_email_id: email.message_id.clone(),
            flight_number,
            departure_date: dates.first().map(|(_, d)| *d),
            departure_time: times.first().cloned(),
            arrival_date: dates.get(1).map(|(_, d)| *d),
            arrival_time: times.get(1).cloned(),
            departure_airport: airports.first().cloned(),
            arrival_airport: airports.get(1).cloned(),
            airline,
            raw_fields,
        })
    }

    pub fn is_confirmation(subject: &str, body: &str) -> bool {
        let subject = subject.to_lowercase();
        let body = body.to_lowercase();
        CONFIRMATION_KEYWORDS
            .iter()
            .any(|keyword| subject.contains(keyword) || body.contains(keyword))
    }

    /// Markup reduced to plain text; bodies without tags are returned as they are.
    pub fn html_to_text(body: &str) -> Cow<'_, str> {
        if !HTML_TAG.is_match(body) {
            return Cow::Borrowed(body);
        }
        let text = SCRIPT_BLOCK.replace_all(body, " ");
        let text = BLOCK_BREAK.replace_all(&text, "\n");
        let text = HTML_TAG.replace_all(&text, " ");
        let text = text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");
        Cow::Owned(text)
    }
}

fn record(fields: &mut BTreeMap<String, Vec<String>>, name: &str, values: impl Iterator<Item = String>) {
    let values: Vec<String> = values.collect();
    if !values.is_empty() {
        fields.insert(name.to_string(), values);
    }
}

fn extract_flight_numbers(text: &str) -> Vec<(Range<usize>, String)> {
    FLIGHT_NUMBER_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let prefix = caps.get(1)?.as_str();
            // "LAX 2023-03-14" is an airport followed by a date.
            let followed_by_date = matches!(text[whole.end()..].chars().next(), Some('-' | '/' | ':'));
            if followed_by_date || NON_AIRPORT_TOKENS.contains(&prefix) {
                return None;
            }
            Some((whole.range(), whole.as_str().to_string()))
        })
        .collect()
}

/// Every date in text order, raw text alongside the parsed value.
fn extract_dates(text: &str) -> Vec<(String, NaiveDate)> {
    let mut found: Vec<(usize, String, NaiveDate)> = Vec::new();

    for m in DATE_PATTERN.find_iter(text) {
        if let Some(date) = parse_date(m.as_str()) {
            found.push((m.start(), m.as_str().to_string(), date));
        }
    }
    for caps in MONTH_FIRST_DATE.captures_iter(text) {
        if let (Some(whole), Some(date)) = (caps.get(0), month_date(&caps[1], &caps[2], &caps[3])) {
            found.push((whole.start(), whole.as_str().to_string(), date));
        }
    }
    for caps in DAY_FIRST_DATE.captures_iter(text) {
        if let (Some(whole), Some(date)) = (caps.get(0), month_date(&caps[2], &caps[1], &caps[3])) {
            found.push((whole.start(), whole.as_str().to_string(), date));
        }
    }

    found.sort_by_key(|(start, _, _)| *start);
    found.into_iter().map(|(_, raw, date)| (raw, date)).collect()
}

fn month_date(month: &str, day: &str, year: &str) -> Option<NaiveDate> {
    let month = MONTHS.iter().position(|m| month.to_lowercase().starts_with(m))? as u32 + 1;
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

fn extract_times(text: &str) -> Vec<String> {
    TIME_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn extract_airports(text: &str, flight_spans: &[Range<usize>]) -> Vec<String> {
    AIRPORT_PATTERN
        .find_iter(text)
        .filter(|m| !flight_spans.iter().any(|span| span.start <= m.start() && m.end() <= span.end))
        .map(|m| m.as_str())
        .filter(|code| !NON_AIRPORT_TOKENS.contains(code))
        .map(str::to_string)
        .collect()
}

fn extract_airlines(text: &str) -> Vec<&'static str> {
    AIRLINE_PATTERN
        .find_iter(text)
        .filter_map(|m| airline_by_name(m.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn email(subject: &str, body: &str) -> EmailMessage {
        EmailMessage {
            message_id: "msg-1".to_string(),
            subject: subject.to_string(),
            sender: "noreply@delta.com".to_string(),
            received_at: Utc.with_ymd_and_hms(2023, 2, 1, 12, 0, 0).unwrap(),
            body: body.to_string(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_delta_confirmation() {
        let message = email(
            "Your Delta Flight Confirmation",
            "Flight DL 1234 departs 03/14/2023 at 8:05 AM from ATL and arrives LAX at 10:15 AM.",
        );
        let flight = EmailParser::parse(&message).unwrap();

        assert_eq!(flight.source_email_id, "msg-1");
        assert_eq!(flight.flight_number.as_deref(), Some("DL 1234"));
        assert_eq!(flight.airline.as_deref(), Some("Delta"));
        assert_eq!(flight.departure_date, Some(date(2023, 3, 14)));
        assert_eq!(flight.arrival_date, None);
        assert_eq!(flight.departure_time.as_deref(), Some("8:05 AM"));
        assert_eq!(flight.arrival_time.as_deref(), Some("10:15 AM"));
        assert_eq!(flight.departure_airport.as_deref(), Some("ATL"));
        assert_eq!(flight.arrival_airport.as_deref(), Some("LAX"));
        assert_eq!(flight.raw_fields["airport_code"], vec!["ATL", "LAX"]);
        assert!((flight.confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let message = email("Itinerary", "UA 455 SFO to JFK on 2023-06-01");
        assert_eq!(EmailParser::parse(&message), EmailParser::parse(&message));
        assert!(EmailParser::parse(&message).is_some());
    }

    #[test]
    fn test_non_confirmation_is_ignored() {
        assert!(EmailParser::parse(&email("Lunch on Friday?", "DL 1234 was late again")).is_none());
    }

    #[test]
    fn test_confirmation_without_fields_is_ignored() {
        assert!(EmailParser::parse(&email("Your itinerary", "Please see the attached document.")).is_none());
    }

    #[test]
    fn test_html_body_and_airline_from_prefix() {
        let message = email(
            "Reservation",
            "<html><head><style>p { color: red; }</style></head><body>\
             <p>Booking confirmation</p><p>Flight&nbsp;UA 455 on 2023-06-01</p></body></html>",
        );
        let flight = EmailParser::parse(&message).unwrap();
        assert_eq!(flight.flight_number.as_deref(), Some("UA 455"));
        assert_eq!(flight.airline.as_deref(), Some("United"));
        assert_eq!(flight.departure_date, Some(date(2023, 6, 1)));
    }

    #[test]
    fn test_month_name_dates_in_text_order() {
        let message = email(
            "Boarding pass",
            "Depart 14 March 2023 from JFK, return Mar 21, 2023 via CDG",
        );
        let flight = EmailParser::parse(&message).unwrap();
        assert_eq!(flight.departure_date, Some(date(2023, 3, 14)));
        assert_eq!(flight.arrival_date, Some(date(2023, 3, 21)));
        assert_eq!(flight.departure_airport.as_deref(), Some("JFK"));
        assert_eq!(flight.arrival_airport.as_deref(), Some("CDG"));
    }

    #[test]
    fn test_currency_and_dates_are_not_flights_or_airports() {
        let message = email(
            "Ticket confirmation",
            "Total USD 450 charged. LAX 2023-03-14 PNR ABC",
        );
        let flight = EmailParser::parse(&message).unwrap();
        assert_eq!(flight.flight_number, None);
        assert_eq!(flight.raw_fields["airport_code"], vec!["LAX", "ABC"]);
    }

    #[test]
    fn test_seattle_is_an_airport() {
        assert!(NON_AIRPORT_TOKENS.iter().all(|token| token.len() == 3));

        let message = email("Itinerary", "AS 123 SEA to LAX on 2023-06-01");
        let flight = EmailParser::parse(&message).unwrap();
        assert_eq!(flight.departure_airport.as_deref(), Some("SEA"));
        assert_eq!(flight.arrival_airport.as_deref(), Some("LAX"));
    }

    #[test]
    fn test_plain_body_is_untouched() {
        assert!(matches!(EmailParser::html_to_text("no markup here"), Cow::Borrowed(_)));
        assert_eq!(EmailParser::html_to_text("a<br/>b &amp; c"), "a\nb & c");
    }
}
