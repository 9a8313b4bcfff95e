use serde_json::Value;

use chatgate_provider_core::{Classified, PayloadClassifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Channel {
    #[default]
    Content,
    Reasoning,
    Other,
}

impl Channel {
    fn for_path(path: &str) -> Self {
        if !path.ends_with("content") {
            Channel::Other
        } else if path.contains("reasoning") || path.contains("thinking") {
            Channel::Reasoning
        } else {
            Channel::Content
        }
    }
}

/// DeepSeek streams JSON patches: `p` names the field being appended to and
/// is omitted while it stays the same, so the last path is remembered.
#[derive(Debug, Default)]
pub struct DeepSeekClassifier {
    channel: Channel,
}

impl PayloadClassifier for DeepSeekClassifier {
    fn classify(&mut self, payload: &str) -> Vec<Classified> {
        let Ok(data) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };

        if let Some(path) = data.get("p").and_then(Value::as_str) {
            if path == "response/status" {
                return match data.get("v").and_then(Value::as_str) {
                    Some("FINISHED") => vec![Classified::Terminal],
                    _ => Vec::new(),
                };
            }
            self.channel = Channel::for_path(path);
        }

        if data.get("type").and_then(Value::as_str) == Some("thinking") {
            return text_of(&data)
                .map(|text| vec![Classified::Reasoning(text)])
                .unwrap_or_default();
        }

        if let Some(text) = data.get("v").and_then(Value::as_str) {
            return match self.channel {
                Channel::Content => vec![Classified::Content(text.to_string())],
                Channel::Reasoning => vec![Classified::Reasoning(text.to_string())],
                Channel::Other => Vec::new(),
            };
        }

        if data.get("type").and_then(Value::as_str) == Some("text")
            && let Some(text) = data.get("content").and_then(Value::as_str)
        {
            return vec![Classified::Content(text.to_string())];
        }

        if let Some(delta) = data.pointer("/choices/0/delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                return vec![Classified::Content(text.to_string())];
            }
            if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
                return vec![Classified::Reasoning(text.to_string())];
            }
        }

        Vec::new()
    }
}

fn text_of(data: &Value) -> Option<String> {
    data.get("v")
        .or_else(|| data.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
