use chatgate_protocol::{LineDecoder, data_payload};
use futures_util::StreamExt;

use crate::error::ProviderError;
use crate::event::{FinishReason, StreamEvent};
use crate::provider::ByteStream;

const SENTINEL_TOKENS: [&str; 2] = ["<｜end▁of▁thinking｜>", "<|endoftext|>"];
const CITATION_OPEN: &str = "[citation:";

/// Turns raw upstream bytes into unified stream events.
///
/// `transform` may be called with chunks split at any byte offset. After a
/// terminal event has been produced every later call returns nothing, and
/// `finalize` synthesizes the terminal event when the upstream never sent one.
pub trait StreamTranslator: Send {
    fn transform(&mut self, chunk: &[u8]) -> Vec<StreamEvent>;
    fn finalize(&mut self) -> Vec<StreamEvent>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    pub strip_reasoning: bool,
    pub clean_mode: bool,
}

/// What a single `data:` payload means for a given vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Content(String),
    Reasoning(String),
    Terminal,
}

pub trait PayloadClassifier: Send {
    /// Classifies one payload. `[DONE]` never reaches the classifier.
    fn classify(&mut self, payload: &str) -> Vec<Classified>;
}

/// Line-framed SSE translator shared by every vendor; only payload
/// classification differs per provider.
pub struct FramedTranslator<C> {
    decoder: LineDecoder,
    classifier: C,
    options: TranslateOptions,
    finished: bool,
}

impl<C: PayloadClassifier> FramedTranslator<C> {
    pub fn new(classifier: C, options: TranslateOptions) -> Self {
        Self {
            decoder: LineDecoder::new(),
            classifier,
            options,
            finished: false,
        }
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        let Some(payload) = data_payload(line) else {
            return;
        };
        if payload == "[DONE]" {
            self.terminate(out);
            return;
        }
        for classified in self.classifier.classify(payload) {
            if self.finished {
                break;
            }
            match classified {
                Classified::Content(text) => {
                    let mut text = strip_sentinels(&text);
                    if self.options.clean_mode {
                        text = strip_citations(&text);
                    }
                    if !text.is_empty() {
                        out.push(StreamEvent::Content(text));
                    }
                }
                Classified::Reasoning(text) => {
                    if self.options.strip_reasoning {
                        continue;
                    }
                    let text = strip_sentinels(&text);
                    if !text.is_empty() {
                        out.push(StreamEvent::Reasoning(text));
                    }
                }
                Classified::Terminal => self.terminate(out),
            }
        }
    }

    fn terminate(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.finished {
            self.finished = true;
            out.push(StreamEvent::Terminal(FinishReason::Stop));
        }
    }
}

impl<C: PayloadClassifier> StreamTranslator for FramedTranslator<C> {
    fn transform(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        for line in self.decoder.push(chunk) {
            self.handle_line(&line, &mut out);
        }
        out
    }

    fn finalize(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if let Some(line) = self.decoder.finish() {
            self.handle_line(&line, &mut out);
        }
        self.terminate(&mut out);
        out
    }
}

fn strip_sentinels(text: &str) -> String {
    let mut text = text.to_string();
    for token in SENTINEL_TOKENS {
        if text.contains(token) {
            text = text.replace(token, "");
        }
    }
    text
}

/// Removes inline search citation markers such as `[citation:3]`.
pub fn strip_citations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(CITATION_OPEN) {
        let after = &rest[start + CITATION_OPEN.len()..];
        let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 && after[digits..].starts_with(']') {
            out.push_str(&rest[..start]);
            rest = &after[digits + 1..];
        } else {
            out.push_str(&rest[..start + 1]);
            rest = &rest[start + 1..];
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    pub content: String,
    pub reasoning: Option<String>,
}

impl Collected {
    /// Returns true once the terminal event has been absorbed.
    fn absorb(&mut self, events: Vec<StreamEvent>) -> bool {
        for event in events {
            match event {
                StreamEvent::Content(text) => self.content.push_str(&text),
                StreamEvent::Reasoning(text) => {
                    self.reasoning.get_or_insert_with(String::new).push_str(&text)
                }
                StreamEvent::Terminal(_) => return true,
            }
        }
        false
    }
}

/// Drives a translator over a whole upstream stream and concatenates the
/// output. Reading stops at the first terminal event.
pub async fn collect(
    mut stream: ByteStream,
    mut translator: Box<dyn StreamTranslator>,
) -> Result<Collected, ProviderError> {
    let mut collected = Collected::default();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if collected.absorb(translator.transform(&chunk)) {
            return Ok(collected);
        }
    }
    collected.absorb(translator.finalize());
    Ok(collected)
}
