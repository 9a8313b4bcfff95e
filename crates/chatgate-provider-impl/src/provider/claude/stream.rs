use serde_json::Value;

use chatgate_provider_core::{Classified, PayloadClassifier};

/// Understands both the legacy `completion` events and the message-style
/// `content_block_delta` events of the claude.ai web API.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeClassifier;

impl PayloadClassifier for ClaudeClassifier {
    fn classify(&mut self, payload: &str) -> Vec<Classified> {
        let Ok(data) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };
        match data.get("type").and_then(Value::as_str) {
            Some("completion") => {
                let mut out = Vec::new();
                if let Some(text) = data.get("completion").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    out.push(Classified::Content(text.to_string()));
                }
                if data.get("stop_reason").is_some_and(|reason| !reason.is_null()) {
                    out.push(Classified::Terminal);
                }
                out
            }
            Some("content_block_delta") => {
                let Some(delta) = data.get("delta") else {
                    return Vec::new();
                };
                let text = |key: &str| {
                    delta
                        .get(key)
                        .and_then(Value::as_str)
                        .filter(|text| !text.is_empty())
                        .map(str::to_string)
                };
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => text("text").map(Classified::Content).into_iter().collect(),
                    Some("thinking_delta") => text("thinking")
                        .map(Classified::Reasoning)
                        .into_iter()
                        .collect(),
                    _ => Vec::new(),
                }
            }
            Some("message_stop") => vec![Classified::Terminal],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chatgate_provider_core::{
        FinishReason, FramedTranslator, StreamEvent, StreamTranslator, TranslateOptions,
    };

    use super::*;

    fn run(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut translator = FramedTranslator::new(ClaudeClassifier, TranslateOptions::default());
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(translator.transform(chunk));
        }
        events.extend(translator.finalize());
        events
    }

    const MESSAGES: &str = concat!(
        "event: message_start\r\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m\"}}\r\n\r\n",
        "event: content_block_start\r\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\"}}\r\n\r\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"想\"}}\r\n\r\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"x\"}}\r\n\r\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hé\"}}\r\n\r\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"llo\"}}\r\n\r\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\r\n\r\n",
        "data: {\"type\":\"message_stop\"}\r\n\r\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"late\"}}\r\n\r\n",
    );

    #[test]
    fn message_events_translate() {
        assert_eq!(
            run(&[MESSAGES.as_bytes()]),
            vec![
                StreamEvent::Reasoning("想".into()),
                StreamEvent::Content("Hé".into()),
                StreamEvent::Content("llo".into()),
                StreamEvent::Terminal(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn every_byte_split_matches_single_chunk() {
        let bytes = MESSAGES.as_bytes();
        let whole = run(&[bytes]);
        for split in 0..=bytes.len() {
            assert_eq!(run(&[&bytes[..split], &bytes[split..]]), whole, "split at {split}");
        }
    }

    #[test]
    fn legacy_completion_stops_on_stop_reason() {
        let events = run(&[concat!(
            "data: {\"type\":\"completion\",\"completion\":\"Hi\",\"stop_reason\":null}\n\n",
            "data: {\"type\":\"completion\",\"completion\":\"!\",\"stop_reason\":\"stop_sequence\"}\n\n",
            "data: {\"type\":\"completion\",\"completion\":\"after\",\"stop_reason\":null}\n\n",
        )
        .as_bytes()]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hi".into()),
                StreamEvent::Content("!".into()),
                StreamEvent::Terminal(FinishReason::Stop),
            ]
        );
    }
}
