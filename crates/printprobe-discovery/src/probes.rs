//! Command sets sent during discovery.

use serde_json::json;

use printprobe_core::payload::Payload;

/// Keys tried by the variation generator.
pub const VARIATION_KEYS: [&str; 5] = ["cmd", "action", "request", "method", "type"];

/// Values tried by the variation generator.
pub const VARIATION_VALUES: [&str; 11] = [
    "status",
    "info",
    "temperature",
    "progress",
    "files",
    "print",
    "pause",
    "stop",
    "start",
    "get",
    "set",
];

/// Suffixes tried by the fuzzer as `get_<suffix>`.
pub const FUZZ_SUFFIXES: [&str; 4] = ["data", "state", "config", "version"];

/// Numeric ids tried by the fuzzer.
pub const FUZZ_ID_RANGE: std::ops::Range<u32> = 0..10;

fn payload(value: serde_json::Value) -> Payload {
    Payload::from_value(value).unwrap_or_default()
}

/// Ping variants used for the connectivity check.
pub fn connectivity_probes() -> Vec<Payload> {
    vec![
        payload(json!({"ping": "test"})),
        payload(json!({"action": "ping"})),
        payload(json!({"cmd": "ping"})),
        payload(json!({"request": "status"})),
    ]
}

/// Known commands tried first in the active phase.
pub fn seed_commands() -> Vec<Payload> {
    vec![
        payload(json!({"cmd": "get_status"})),
        payload(json!({"cmd": "get_temperature"})),
        payload(json!({"request": "printer_info"})),
        payload(json!({"action": "get_progress"})),
        payload(json!({"cmd": "fan_control", "state": "query"})),
        payload(json!({"cmd": "light_control", "state": "query"})),
        payload(json!({"cmd": "list_files"})),
        payload(json!({"action": "file_list"})),
        payload(json!({"request": "job_info"})),
    ]
}

/// Cross product of [`VARIATION_KEYS`] and [`VARIATION_VALUES`], at most
/// `max` payloads.
pub fn variations(max: usize) -> Vec<Payload> {
    VARIATION_KEYS
        .iter()
        .flat_map(|key| {
            VARIATION_VALUES
                .iter()
                .map(move |value| Payload::new().with(*key, *value))
        })
        .take(max)
        .collect()
}

/// Seeds followed by generated variations, duplicates of a seed removed.
pub fn active_commands(max_variations: usize) -> Vec<Payload> {
    let mut commands = seed_commands();
    for variation in variations(max_variations) {
        if !commands.contains(&variation) {
            commands.push(variation);
        }
    }
    commands
}

/// Conservative fuzz set, at most `max` payloads.
pub fn fuzz_patterns(max: usize) -> Vec<Payload> {
    let ids = FUZZ_ID_RANGE.map(|id| Payload::new().with("id", id).with("cmd", "query"));
    let suffixes = FUZZ_SUFFIXES
        .iter()
        .map(|suffix| Payload::new().with("cmd", format!("get_{}", suffix)));
    ids.chain(suffixes).take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variation_grid() {
        let all = variations(usize::MAX);
        assert_eq!(all.len(), 55);
        assert_eq!(all[0], Payload::new().with("cmd", "status"));
        assert_eq!(all[54], Payload::new().with("type", "set"));
        assert_eq!(variations(10).len(), 10);
    }

    #[test]
    fn test_fuzz_bounded() {
        let all = fuzz_patterns(50);
        assert_eq!(all.len(), 14);
        assert_eq!(all[0].to_string(), r#"{"cmd":"query","id":0}"#);
        assert_eq!(all[13].to_string(), r#"{"cmd":"get_version"}"#);
        assert_eq!(fuzz_patterns(3).len(), 3);
    }

    #[test]
    fn test_active_commands_start_with_seeds() {
        let commands = active_commands(100);
        assert_eq!(commands.len(), 9 + 55);
        assert_eq!(commands[0], Payload::new().with("cmd", "get_status"));
        assert_eq!(connectivity_probes().len(), 4);
    }
}
