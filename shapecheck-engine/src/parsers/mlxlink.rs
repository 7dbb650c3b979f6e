//! `mlxlink --json` output

use serde_json::Value;

/// Fields of one port as reported by `mlxlink -d <dev> --json ...`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkReport {
    pub speed: String,
    pub state: String,
    pub physical_state: String,
    pub width: String,
    pub status_opcode: String,
    pub recommendation: String,
    pub effective_physical_errors: String,
    pub effective_physical_ber: String,
    pub raw_physical_ber: String,
    pub raw_errors_per_lane: Vec<u64>,
}

/// Why an `mlxlink` output could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkParseError {
    /// Nothing usable came back for the device
    InvalidInterface,
    /// Output was not the expected JSON shape
    Unparseable,
}

impl LinkParseError {
    pub fn describe(&self, device: &str) -> String {
        match self {
            LinkParseError::InvalidInterface => format!("Invalid interface: {}", device),
            LinkParseError::Unparseable => "Unable to parse mlxlink output".to_string(),
        }
    }
}

pub fn parse(output: &str) -> Result<LinkReport, LinkParseError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(LinkParseError::InvalidInterface);
    }

    // mlxlink prints an error banner before the JSON when the port is down
    let json = if trimmed.starts_with("Error:") || !trimmed.starts_with('{') {
        match trimmed.find('{') {
            Some(start) => &trimmed[start..],
            None if trimmed.starts_with("Error:") => return Err(LinkParseError::InvalidInterface),
            None => return Err(LinkParseError::Unparseable),
        }
    } else {
        trimmed
    };

    let document: Value = serde_json::from_str(json).map_err(|_| LinkParseError::Unparseable)?;
    let output = document
        .get("result")
        .and_then(|result| result.get("output"))
        .ok_or(LinkParseError::Unparseable)?;

    let section = |name: &str| output.get(name).cloned().unwrap_or(Value::Null);
    let operational = section("Operational Info");
    let troubleshooting = section("Troubleshooting Info");
    let counters = section("Physical Counters and BER Info");

    Ok(LinkReport {
        speed: text(&operational, "Speed"),
        state: text(&operational, "State"),
        physical_state: text(&operational, "Physical state"),
        width: text(&operational, "Width"),
        status_opcode: text(&troubleshooting, "Status Opcode"),
        recommendation: text(&troubleshooting, "Recommendation"),
        effective_physical_errors: text(&counters, "Effective Physical Errors"),
        effective_physical_ber: text(&counters, "Effective Physical BER"),
        raw_physical_ber: text(&counters, "Raw Physical BER"),
        raw_errors_per_lane: lanes(counters.get("Raw Physical Errors Per Lane")),
    })
}

fn text(section: &Value, key: &str) -> String {
    match section.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Lane counters come as strings, numbers, or "undefined" for unused lanes
fn lanes(value: Option<&Value>) -> Vec<u64> {
    let one = |item: &Value| match item {
        Value::String(s) if s != "undefined" => s.trim().parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };

    match value {
        Some(Value::Array(items)) => items.iter().filter_map(one).collect(),
        Some(item) => one(item).into_iter().collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY: &str = r#"{
        "result": {"output": {
            "Operational Info": {"State": "Active", "Physical state": "LinkUp", "Speed": "200G", "Width": "4x"},
            "Troubleshooting Info": {"Status Opcode": "0", "Recommendation": "No issue was observed"},
            "Physical Counters and BER Info": {
                "Effective Physical Errors": "0",
                "Effective Physical BER": "15E-255",
                "Raw Physical BER": "1E-8",
                "Raw Physical Errors Per Lane": ["0", "12", "undefined", 3]
            }
        }}
    }"#;

    #[test]
    fn test_parse_fields() {
        let report = parse(HEALTHY).unwrap();
        assert_eq!(report.speed, "200G");
        assert_eq!(report.state, "Active");
        assert_eq!(report.physical_state, "LinkUp");
        assert_eq!(report.status_opcode, "0");
        assert_eq!(report.effective_physical_ber, "15E-255");
        assert_eq!(report.raw_errors_per_lane, vec![0, 12, 3]);
    }

    #[test]
    fn test_error_banner_before_json() {
        let output = format!("Error: port is down\n{}", HEALTHY);
        assert_eq!(parse(&output).unwrap().width, "4x");
        assert_eq!(parse("Error: no such device"), Err(LinkParseError::InvalidInterface));
        assert_eq!(parse(""), Err(LinkParseError::InvalidInterface));
        assert_eq!(parse("garbage"), Err(LinkParseError::Unparseable));
        assert_eq!(parse("{\"status\": 1}"), Err(LinkParseError::Unparseable));
    }
}
