//! Human-readable command descriptions.

use serde_json::Value;

use printprobe_core::catalog::CommandCategory;
use printprobe_core::payload::Payload;

/// Keywords in a response that hint at the kind of data returned.
const RESPONSE_HINTS: [(&str, &str); 3] = [
    ("temperature", "returns temperature data"),
    ("progress", "returns progress information"),
    ("status", "returns status information"),
];

/// Describe a command from its payload and a sample response.
pub fn describe(command: &Payload, response: Option<&Value>) -> String {
    let category = CommandCategory::infer(&command.to_string());
    let mut parts: Vec<&str> = Vec::new();

    match category {
        CommandCategory::Query => parts.push("query/status command"),
        CommandCategory::Control => parts.push("control/configuration command"),
        CommandCategory::Operation => parts.push("operation/execution command"),
        CommandCategory::Other => {}
    }

    if let Some(response @ Value::Object(_)) = response {
        let text = response.to_string().to_lowercase();
        parts.extend(
            RESPONSE_HINTS
                .iter()
                .filter(|(keyword, _)| text.contains(keyword))
                .map(|(_, hint)| *hint),
        );
    }

    if parts.is_empty() {
        "command with unidentified purpose".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_query_with_hints() {
        let command = Payload::new().with("cmd", "get_status");
        let response = json!({"status": "ready", "nozzleTemperature": 24});
        assert_eq!(
            describe(&command, Some(&response)),
            "query/status command; returns temperature data; returns status information"
        );
    }

    #[test]
    fn test_describe_unknown() {
        let command = Payload::new().with("method", "pause");
        assert_eq!(describe(&command, None), "command with unidentified purpose");
        assert_eq!(
            describe(&command, Some(&json!(["progress"]))),
            "command with unidentified purpose"
        );
    }
}
