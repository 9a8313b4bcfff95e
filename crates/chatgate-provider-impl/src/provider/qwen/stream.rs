use serde_json::Value;

use chatgate_provider_core::{Classified, PayloadClassifier};

/// Qwen's phase-output stream: `choices[0].delta` carries a `phase`
/// (`thinking_summary` or `answer`), incremental `content` and a `status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct QwenClassifier;

impl PayloadClassifier for QwenClassifier {
    fn classify(&mut self, payload: &str) -> Vec<Classified> {
        let Ok(data) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };
        if data.get("response.created").is_some() {
            return Vec::new();
        }
        let Some(delta) = data.pointer("/choices/0/delta") else {
            return Vec::new();
        };
        let phase = delta.get("phase").and_then(Value::as_str);

        if delta.get("status").and_then(Value::as_str) == Some("finished") {
            return match phase {
                Some("answer") => vec![Classified::Terminal],
                _ => Vec::new(),
            };
        }

        match phase {
            Some("thinking_summary") => delta
                .get("extra")
                .and_then(thinking_text)
                .map(|text| vec![Classified::Reasoning(text)])
                .unwrap_or_default(),
            Some("answer") => delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|content| !content.is_empty())
                .map(|content| vec![Classified::Content(content.to_string())])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

fn joined(extra: &Value, pointer: &str, separator: &str) -> String {
    extra
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(separator)
        })
        .unwrap_or_default()
}

fn thinking_text(extra: &Value) -> Option<String> {
    let thoughts = joined(extra, "/summary_thought/content", "\n");
    let title = joined(extra, "/summary_title/content", "");
    let text = if title.is_empty() {
        thoughts
    } else {
        format!("[{title}]\n{thoughts}")
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use chatgate_provider_core::{
        FinishReason, FramedTranslator, StreamEvent, StreamTranslator, TranslateOptions,
    };

    use super::*;

    const RECORDED: &str = concat!(
        "data: {\"response.created\":{\"chat_id\":\"c1\",\"response_id\":\"r1\"}}\n\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"phase\":\"thinking_summary\",\"extra\":{\"summary_thought\":{\"content\":[\"用户问好\"]}},\"status\":\"typing\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"phase\":\"thinking_summary\",\"extra\":{\"summary_title\":{\"content\":[\"回应\",\"问候\"]},\"summary_thought\":{\"content\":[\"一\",\"二\"]}}}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"phase\":\"thinking_summary\",\"status\":\"finished\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"phase\":\"answer\",\"content\":\"你好\",\"status\":\"typing\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"phase\":\"answer\",\"content\":\"！\",\"status\":\"typing\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"phase\":\"answer\",\"content\":\"\",\"status\":\"finished\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"phase\":\"answer\",\"content\":\"late\"}}]}\n\n",
    );

    fn run(chunks: &[&[u8]], options: TranslateOptions) -> Vec<StreamEvent> {
        let mut translator = FramedTranslator::new(QwenClassifier, options);
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(translator.transform(chunk));
        }
        events.extend(translator.finalize());
        events
    }

    #[test]
    fn recorded_stream_translates() {
        assert_eq!(
            run(&[RECORDED.as_bytes()], TranslateOptions::default()),
            vec![
                StreamEvent::Reasoning("用户问好".into()),
                StreamEvent::Reasoning("[回应问候]\n一\n二".into()),
                StreamEvent::Content("你好".into()),
                StreamEvent::Content("！".into()),
                StreamEvent::Terminal(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn every_byte_split_matches_single_chunk() {
        let bytes = RECORDED.as_bytes();
        let whole = run(&[bytes], TranslateOptions::default());
        for split in 0..=bytes.len() {
            let events = run(&[&bytes[..split], &bytes[split..]], TranslateOptions::default());
            assert_eq!(events, whole, "split at {split}");
        }
    }

    #[test]
    fn strip_reasoning_keeps_answer_only() {
        let options = TranslateOptions {
            strip_reasoning: true,
            clean_mode: false,
        };
        let events = run(&[RECORDED.as_bytes()], options);
        assert!(events.iter().all(|event| !matches!(event, StreamEvent::Reasoning(_))));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn stream_without_finish_gets_one_terminal() {
        let events = run(
            &[b"data: {\"choices\":[{\"delta\":{\"phase\":\"answer\",\"content\":\"x\"}}]}"],
            TranslateOptions::default(),
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("x".into()),
                StreamEvent::Terminal(FinishReason::Stop),
            ]
        );
    }
}
