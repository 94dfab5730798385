use lazy_static::lazy_static;
use regex::Regex;

pub struct CountryRule {
    /// Canonical, title-cased name reported on candidates and entries.
    pub country_name: &'static str,
    /// Upper-case spellings recognised on stamps, including the canonical one.
    pub aliases: &'static [&'static str],
}

pub struct CountryRules {
    pub countries: Vec<CountryRule>,
    matcher: Regex,
}

impl CountryRules {
    pub fn new() -> Self {
        let countries = vec![
            CountryRule {
                country_name: "United States",
                aliases: &["UNITED STATES OF AMERICA", "UNITED STATES", "U.S.A.", "USA"],
            },
            CountryRule { country_name: "Canada", aliases: &["CANADA"] },
            CountryRule { country_name: "Mexico", aliases: &["MEXICO", "ESTADOS UNIDOS MEXICANOS"] },
            CountryRule {
                country_name: "United Kingdom",
                aliases: &["UNITED KINGDOM", "GREAT BRITAIN", "UK"],
            },
            CountryRule { country_name: "France", aliases: &["FRANCE", "REPUBLIQUE FRANCAISE"] },
            CountryRule { country_name: "Germany", aliases: &["GERMANY", "DEUTSCHLAND"] },
            CountryRule { country_name: "Italy", aliases: &["ITALY", "ITALIA"] },
            CountryRule { country_name: "Spain", aliases: &["SPAIN", "ESPANA", "ESPAÑA"] },
            CountryRule { country_name: "Japan", aliases: &["JAPAN", "NIPPON"] },
            CountryRule { country_name: "China", aliases: &["CHINA"] },
            CountryRule { country_name: "Australia", aliases: &["AUSTRALIA"] },
            CountryRule { country_name: "Netherlands", aliases: &["NETHERLANDS", "NEDERLAND"] },
            CountryRule { country_name: "Portugal", aliases: &["PORTUGAL"] },
            CountryRule { country_name: "Switzerland", aliases: &["SWITZERLAND", "SCHWEIZ", "SUISSE"] },
            CountryRule { country_name: "Ireland", aliases: &["IRELAND"] },
            CountryRule { country_name: "India", aliases: &["INDIA"] },
            CountryRule { country_name: "Brazil", aliases: &["BRAZIL", "BRASIL"] },
            CountryRule { country_name: "Argentina", aliases: &["ARGENTINA"] },
            CountryRule { country_name: "Thailand", aliases: &["THAILAND"] },
            CountryRule { country_name: "Singapore", aliases: &["SINGAPORE"] },
            CountryRule { country_name: "South Korea", aliases: &["REPUBLIC OF KOREA", "SOUTH KOREA", "KOREA"] },
            CountryRule { country_name: "United Arab Emirates", aliases: &["UNITED ARAB EMIRATES", "UAE"] },
            CountryRule { country_name: "Turkey", aliases: &["TURKEY", "TURKIYE"] },
            CountryRule { country_name: "New Zealand", aliases: &["NEW ZEALAND"] },
        ];

        // Longest alias first so "UNITED STATES OF AMERICA" wins over "UNITED STATES".
        let mut aliases: Vec<&str> = countries.iter().flat_map(|c| c.aliases.iter().copied()).collect();
        aliases.sort_by(|a, b| b.len().cmp(&a.len()));
        let alternation = aliases.iter().map(|a| regex::escape(a)).collect::<Vec<_>>().join("|");
        let matcher = Regex::new(&format!(r"(?i)(?:^|[^\p{{L}}])({})(?:$|[^\p{{L}}])", alternation))
            .expect("country vocabulary pattern");

        CountryRules { countries, matcher }
    }

    /// First vocabulary hit in `text`: canonical name plus the byte span of the match.
    pub fn find(&self, text: &str) -> Option<(&'static str, std::ops::Range<usize>)> {
        let captures = self.matcher.captures(text)?;
        let matched = captures.get(1)?;
        let name = self.canonical_name(matched.as_str())?;
        Some((name, matched.range()))
    }

    /// Canonical name for an alias, case-insensitive.
    pub fn canonical_name(&self, alias: &str) -> Option<&'static str> {
        let upper = alias.trim().to_uppercase();
        self.countries
            .iter()
            .find(|rule| rule.aliases.iter().any(|a| *a == upper) || rule.country_name.to_uppercase() == upper)
            .map(|rule| rule.country_name)
    }
}

impl Default for CountryRules {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AirlineRule {
    pub name: &'static str,
    pub iata_code: &'static str,
}

pub const AIRLINES: &[AirlineRule] = &[
    AirlineRule { name: "American", iata_code: "AA" },
    AirlineRule { name: "Delta", iata_code: "DL" },
    AirlineRule { name: "United", iata_code: "UA" },
    AirlineRule { name: "Southwest", iata_code: "WN" },
    AirlineRule { name: "JetBlue", iata_code: "B6" },
    AirlineRule { name: "Alaska", iata_code: "AS" },
    AirlineRule { name: "Spirit", iata_code: "NK" },
    AirlineRule { name: "Frontier", iata_code: "F9" },
    AirlineRule { name: "Air Canada", iata_code: "AC" },
    AirlineRule { name: "British Airways", iata_code: "BA" },
    AirlineRule { name: "Lufthansa", iata_code: "LH" },
    AirlineRule { name: "Air France", iata_code: "AF" },
    AirlineRule { name: "KLM", iata_code: "KL" },
    AirlineRule { name: "Emirates", iata_code: "EK" },
    AirlineRule { name: "Aeromexico", iata_code: "AM" },
];

pub fn airline_by_iata(code: &str) -> Option<&'static str> {
    AIRLINES
        .iter()
        .find(|rule| rule.iata_code.eq_ignore_ascii_case(code))
        .map(|rule| rule.name)
}

/// Canonical airline name for a vocabulary word found in free text.
pub fn airline_by_name(name: &str) -> Option<&'static str> {
    AIRLINES
        .iter()
        .find(|rule| rule.name.eq_ignore_ascii_case(name.trim()))
        .map(|rule| rule.name)
}

pub struct AirportRule {
    pub code: &'static str,
    pub city: &'static str,
    pub country: &'static str,
}

pub const AIRPORTS: &[AirportRule] = &[
    AirportRule { code: "ATL", city: "Atlanta", country: "United States" },
    AirportRule { code: "BOS", city: "Boston", country: "United States" },
    AirportRule { code: "JFK", city: "New York", country: "United States" },
    AirportRule { code: "EWR", city: "Newark", country: "United States" },
    AirportRule { code: "LAX", city: "Los Angeles", country: "United States" },
    AirportRule { code: "ORD", city: "Chicago", country: "United States" },
    AirportRule { code: "SFO", city: "San Francisco", country: "United States" },
    AirportRule { code: "SEA", city: "Seattle", country: "United States" },
    AirportRule { code: "MIA", city: "Miami", country: "United States" },
    AirportRule { code: "DFW", city: "Dallas", country: "United States" },
    AirportRule { code: "YYZ", city: "Toronto", country: "Canada" },
    AirportRule { code: "YVR", city: "Vancouver", country: "Canada" },
    AirportRule { code: "YUL", city: "Montreal", country: "Canada" },
    AirportRule { code: "MEX", city: "Mexico City", country: "Mexico" },
    AirportRule { code: "CUN", city: "Cancun", country: "Mexico" },
    AirportRule { code: "LHR", city: "London", country: "United Kingdom" },
    AirportRule { code: "LGW", city: "London", country: "United Kingdom" },
    AirportRule { code: "CDG", city: "Paris", country: "France" },
    AirportRule { code: "FRA", city: "Frankfurt", country: "Germany" },
    AirportRule { code: "MUC", city: "Munich", country: "Germany" },
    AirportRule { code: "FCO", city: "Rome", country: "Italy" },
    AirportRule { code: "MAD", city: "Madrid", country: "Spain" },
    AirportRule { code: "BCN", city: "Barcelona", country: "Spain" },
    AirportRule { code: "AMS", city: "Amsterdam", country: "Netherlands" },
    AirportRule { code: "NRT", city: "Tokyo", country: "Japan" },
    AirportRule { code: "HND", city: "Tokyo", country: "Japan" },
    AirportRule { code: "PEK", city: "Beijing", country: "China" },
    AirportRule { code: "PVG", city: "Shanghai", country: "China" },
    AirportRule { code: "SYD", city: "Sydney", country: "Australia" },
    AirportRule { code: "DXB", city: "Dubai", country: "United Arab Emirates" },
    AirportRule { code: "SIN", city: "Singapore", country: "Singapore" },
    AirportRule { code: "ICN", city: "Seoul", country: "South Korea" },
];

pub fn airport(code: &str) -> Option<&'static AirportRule> {
    AIRPORTS.iter().find(|rule| rule.code.eq_ignore_ascii_case(code))
}

lazy_static! {
    pub static ref COUNTRY_RULES: CountryRules = CountryRules::new();
}
