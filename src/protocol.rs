//! Data-channel message formats
//!
//! JSON events exchanged with the remote assistant. Only the greeting is
//! ever sent, and only completed-response transcripts are read back.

use serde::{Deserialize, Serialize};

/// Event type carrying a finished response
pub const RESPONSE_DONE: &str = "response.done";

/// Messages sent to the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseOptions },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseOptions {
    pub modalities: Vec<Modality>,
    pub instructions: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Text,
}

impl ClientEvent {
    /// Ask the assistant to speak first, in audio and text
    pub fn greeting(instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseOptions {
                modalities: vec![Modality::Audio, Modality::Text],
                instructions: instructions.into(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An inbound event; fields this device does not use are ignored
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub response: Option<ResponseBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub transcript: Option<String>,
}

impl ServerEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Transcript of the first content part of the first output item,
    /// present only on completed responses
    pub fn transcript(&self) -> Option<&str> {
        if self.kind != RESPONSE_DONE {
            return None;
        }
        self.response
            .as_ref()?
            .output
            .first()?
            .content
            .first()?
            .transcript
            .as_deref()
    }
}

/// Pull the transcript out of a raw data-channel message.
///
/// Anything that is not a well-formed completed response yields `None`.
pub fn extract_transcript(payload: &[u8]) -> Option<String> {
    match ServerEvent::parse(payload) {
        Ok(event) => event.transcript().map(str::to_owned),
        Err(e) => {
            tracing::trace!("Ignoring unparseable data-channel message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_wire_format() {
        let json = ClientEvent::greeting("Say 'How can I help?.'").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "response.create");
        assert_eq!(
            value["response"]["modalities"],
            serde_json::json!(["audio", "text"])
        );
        assert_eq!(value["response"]["instructions"], "Say 'How can I help?.'");
    }

    #[test]
    fn test_extract_transcript() {
        let done = br#"{"type":"response.done","response":{"output":[{"content":[{"transcript":"hello"}]}]}}"#;
        assert_eq!(extract_transcript(done).as_deref(), Some("hello"));
    }

    #[test]
    fn test_other_events_ignored() {
        assert_eq!(extract_transcript(br#"{"type":"ping"}"#), None);
        assert_eq!(
            extract_transcript(br#"{"type":"response.audio.delta","response":{"output":[{"content":[{"transcript":"x"}]}]}}"#),
            None
        );
    }

    #[test]
    fn test_malformed_shapes_ignored() {
        assert_eq!(extract_transcript(b"not json"), None);
        assert_eq!(extract_transcript(br#"{"type":"response.done"}"#), None);
        assert_eq!(
            extract_transcript(br#"{"type":"response.done","response":{"output":[]}}"#),
            None
        );
        assert_eq!(
            extract_transcript(br#"{"type":"response.done","response":{"output":[{"content":[{}]}]}}"#),
            None
        );
        assert_eq!(
            extract_transcript(br#"{"type":"response.done","response":{"output":"oops"}}"#),
            None
        );
        assert_eq!(extract_transcript(br#"{"response":{}}"#), None);
    }
}
