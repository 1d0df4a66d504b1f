use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FlightBatch {
    #[serde(default, deserialize_with = "de_vec_or_null")]
    pub departures: Vec<FlightRecord>,
    #[serde(default, deserialize_with = "de_vec_or_null")]
    pub arrivals: Vec<FlightRecord>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FlightRecord {
    #[serde(default, deserialize_with = "de_string_from_any")]
    pub callsign: String,
    #[serde(default, deserialize_with = "de_opt_string_from_any")]
    pub origin: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string_from_any")]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "de_string_from_any")]
    pub status: String,
    #[serde(default, deserialize_with = "de_opt_string_from_any")]
    pub gate: Option<String>,
}

impl FlightRecord {
    pub fn new(callsign: &str) -> Self {
        Self {
            callsign: callsign.to_string(),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, origin: &str, destination: &str) -> Self {
        self.origin = Some(origin.to_string());
        self.destination = Some(destination.to_string());
        self
    }

    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn flight_status(&self) -> FlightStatus {
        FlightStatus::parse(&self.status)
    }

    pub fn origin_icao(&self) -> Option<String> {
        self.origin.as_deref().and_then(normalize_icao)
    }

    pub fn destination_icao(&self) -> Option<String> {
        self.destination.as_deref().and_then(normalize_icao)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightStatus {
    Scheduled,
    CheckIn,
    Boarding,
    Pushback,
    Taxiing,
    Departing,
    EnRoute,
    Approaching,
    Landing,
    Landed,
    AtGate,
    Cancelled,
    Unknown,
}

impl FlightStatus {
    /// Board labels are case-sensitive; only surrounding whitespace is ignored.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "Scheduled" => FlightStatus::Scheduled,
            "Check-in" => FlightStatus::CheckIn,
            "Boarding" => FlightStatus::Boarding,
            "Pushback" => FlightStatus::Pushback,
            "Taxiing" => FlightStatus::Taxiing,
            "Departing" => FlightStatus::Departing,
            "En Route" => FlightStatus::EnRoute,
            "Approaching" => FlightStatus::Approaching,
            "Landing" => FlightStatus::Landing,
            "Landed" => FlightStatus::Landed,
            "At Gate" => FlightStatus::AtGate,
            "Cancelled" => FlightStatus::Cancelled,
            _ => FlightStatus::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FlightStatus::Scheduled => "Scheduled",
            FlightStatus::CheckIn => "Check-in",
            FlightStatus::Boarding => "Boarding",
            FlightStatus::Pushback => "Pushback",
            FlightStatus::Taxiing => "Taxiing",
            FlightStatus::Departing => "Departing",
            FlightStatus::EnRoute => "En Route",
            FlightStatus::Approaching => "Approaching",
            FlightStatus::Landing => "Landing",
            FlightStatus::Landed => "Landed",
            FlightStatus::AtGate => "At Gate",
            FlightStatus::Cancelled => "Cancelled",
            FlightStatus::Unknown => "Unknown",
        }
    }

    /// Ranking weight used when one callsign shows up more than once in a batch.
    pub fn priority(self) -> u8 {
        match self {
            FlightStatus::Boarding => 100,
            FlightStatus::CheckIn => 95,
            FlightStatus::Pushback => 90,
            FlightStatus::Taxiing => 85,
            FlightStatus::Departing => 80,
            FlightStatus::EnRoute => 70,
            FlightStatus::Approaching => 60,
            FlightStatus::Landing => 55,
            FlightStatus::Landed => 50,
            FlightStatus::AtGate => 45,
            FlightStatus::Scheduled => 40,
            FlightStatus::Cancelled => 1,
            FlightStatus::Unknown => 0,
        }
    }

    /// Airborne or post-departure phases. Ground phases never move the board.
    pub fn is_follow_eligible(self) -> bool {
        matches!(
            self,
            FlightStatus::Departing
                | FlightStatus::EnRoute
                | FlightStatus::Approaching
                | FlightStatus::Landing
                | FlightStatus::Landed
                | FlightStatus::AtGate
        )
    }
}

pub fn normalize_callsign(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

pub fn normalize_icao(value: &str) -> Option<String> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() == 4 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Some(code)
    } else {
        None
    }
}

fn de_vec_or_null<'de, D>(deserializer: D) -> Result<Vec<FlightRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<FlightRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_string_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_opt_string_from_any(deserializer)?.unwrap_or_default())
}

fn de_opt_string_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected string or null, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_callsign, normalize_icao, FlightBatch, FlightStatus};

    const MOCK: &str = r#"{
        "departures": [
            {
                "callsign": "SWR25A ",
                "aircraft": "A20N",
                "origin": "lszh",
                "destination": "EGLL",
                "altitude": 3400,
                "groundspeed": 250,
                "status": "Departing",
                "direction": "DEP",
                "gate": 12
            },
            { "callsign": "EZY14", "destination": "N/A", "status": "Boarding" }
        ],
        "arrivals": null
    }"#;

    #[test]
    fn parse_mock_batch() {
        let batch: FlightBatch = serde_json::from_str(MOCK).unwrap();
        assert_eq!(batch.departures.len(), 2);
        assert!(batch.arrivals.is_empty());

        let first = &batch.departures[0];
        assert_eq!(first.callsign, "SWR25A");
        assert_eq!(first.origin_icao().as_deref(), Some("LSZH"));
        assert_eq!(first.destination_icao().as_deref(), Some("EGLL"));
        assert_eq!(first.gate.as_deref(), Some("12"));
        assert_eq!(first.flight_status(), FlightStatus::Departing);

        assert_eq!(batch.departures[1].destination_icao(), None);
    }

    #[test]
    fn missing_lists_are_empty() {
        let batch: FlightBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.departures.is_empty());
        assert!(batch.arrivals.is_empty());
    }

    #[test]
    fn icao_normalization() {
        assert_eq!(normalize_icao(" eddf ").as_deref(), Some("EDDF"));
        assert_eq!(normalize_icao("EDD"), None);
        assert_eq!(normalize_icao("ED1F"), None);
        assert_eq!(normalize_icao("N/A"), None);
        assert_eq!(normalize_icao(""), None);
    }

    #[test]
    fn callsign_normalization() {
        assert_eq!(normalize_callsign(" lx318 "), "LX318");
        assert_eq!(normalize_callsign("   "), "");
    }

    #[test]
    fn status_parsing_and_eligibility() {
        assert_eq!(FlightStatus::parse("En Route"), FlightStatus::EnRoute);
        assert_eq!(FlightStatus::parse(" Check-in "), FlightStatus::CheckIn);
        assert_eq!(FlightStatus::parse("landed"), FlightStatus::Unknown);
        assert!(!FlightStatus::parse("EN ROUTE").is_follow_eligible());
        assert_eq!(FlightStatus::parse("Diverted"), FlightStatus::Unknown);
        assert_eq!(FlightStatus::Unknown.priority(), 0);
        assert!(FlightStatus::Departing.is_follow_eligible());
        assert!(FlightStatus::AtGate.is_follow_eligible());
        assert!(!FlightStatus::Pushback.is_follow_eligible());
        assert!(!FlightStatus::Cancelled.is_follow_eligible());
        assert_eq!(FlightStatus::EnRoute.label(), "En Route");
    }
}
