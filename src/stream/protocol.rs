use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::types::ControlEvent;

/// Wire envelope: every message is `{"event": {"<name>": {...}}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventBody,
}

impl Envelope {
    pub fn new(event: EventBody) -> Self {
        Self { event }
    }

    pub fn to_json(&self) -> String {
        // The event enum serializes infallibly.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventBody {
    // Outgoing lifecycle
    SessionStart {
        inference_configuration: InferenceConfiguration,
    },
    PromptStart {
        prompt_name: String,
        audio_output_configuration: AudioConfiguration,
    },
    ContentStart {
        prompt_name: String,
        content_name: String,
        #[serde(rename = "type")]
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interactive: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_input_configuration: Option<AudioConfiguration>,
    },
    TextInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    AudioInput {
        prompt_name: String,
        content_name: String,
        /// Base64 LPCM payload.
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    /// Barge-in: stop producing response audio for the current turn.
    Interrupt {
        prompt_name: String,
    },
    PromptEnd {
        prompt_name: String,
    },
    SessionEnd {},

    // Incoming
    TextOutput {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    AudioOutput {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    ContentEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    CompletionEnd {},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl Default for InferenceConfiguration {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    pub encoding: String,
    pub audio_type: String,
}

impl AudioConfiguration {
    fn lpcm(sample_rate: u32, voice_id: Option<String>) -> Self {
        Self {
            media_type: "audio/lpcm".to_string(),
            sample_rate_hertz: sample_rate,
            sample_size_bits: 16,
            channel_count: 1,
            voice_id,
            encoding: "base64".to_string(),
            audio_type: "SPEECH".to_string(),
        }
    }
}

/// Per-session content identifiers, fixed at open.
#[derive(Debug, Clone)]
pub struct SessionIds {
    pub prompt_name: String,
    pub text_content: String,
    pub audio_content: String,
}

impl SessionIds {
    pub fn generate() -> Self {
        Self {
            prompt_name: Uuid::new_v4().to_string(),
            text_content: Uuid::new_v4().to_string(),
            audio_content: Uuid::new_v4().to_string(),
        }
    }
}

/// The fixed opening choreography: session start, prompt start with the
/// voice selection, the system prompt as a closed text content block, and
/// the interactive audio input content start. Sent verbatim on every
/// (re)connect; none of it is renegotiated mid-session.
pub fn preamble(
    ids: &SessionIds,
    voice_id: &str,
    system_prompt: &str,
    capture_rate: u32,
    playback_rate: u32,
) -> Vec<Envelope> {
    vec![
        Envelope::new(EventBody::SessionStart {
            inference_configuration: InferenceConfiguration::default(),
        }),
        Envelope::new(EventBody::PromptStart {
            prompt_name: ids.prompt_name.clone(),
            audio_output_configuration: AudioConfiguration::lpcm(
                playback_rate,
                Some(voice_id.to_string()),
            ),
        }),
        Envelope::new(EventBody::ContentStart {
            prompt_name: ids.prompt_name.clone(),
            content_name: ids.text_content.clone(),
            kind: "TEXT".to_string(),
            role: Some("SYSTEM".to_string()),
            interactive: Some(false),
            audio_input_configuration: None,
        }),
        Envelope::new(EventBody::TextInput {
            prompt_name: ids.prompt_name.clone(),
            content_name: ids.text_content.clone(),
            content: system_prompt.to_string(),
        }),
        Envelope::new(EventBody::ContentEnd {
            prompt_name: Some(ids.prompt_name.clone()),
            content_name: Some(ids.text_content.clone()),
            stop_reason: None,
        }),
        Envelope::new(EventBody::ContentStart {
            prompt_name: ids.prompt_name.clone(),
            content_name: ids.audio_content.clone(),
            kind: "AUDIO".to_string(),
            role: Some("USER".to_string()),
            interactive: Some(true),
            audio_input_configuration: Some(AudioConfiguration::lpcm(capture_rate, None)),
        }),
    ]
}

pub fn audio_input(ids: &SessionIds, pcm: &[i16], seq: u64) -> Envelope {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    Envelope::new(EventBody::AudioInput {
        prompt_name: ids.prompt_name.clone(),
        content_name: ids.audio_content.clone(),
        content: B64.encode(bytes),
        sequence: Some(seq),
    })
}

pub fn interrupt(ids: &SessionIds) -> Envelope {
    Envelope::new(EventBody::Interrupt {
        prompt_name: ids.prompt_name.clone(),
    })
}

pub fn closing(ids: &SessionIds) -> Vec<Envelope> {
    vec![
        Envelope::new(EventBody::ContentEnd {
            prompt_name: Some(ids.prompt_name.clone()),
            content_name: Some(ids.audio_content.clone()),
            stop_reason: None,
        }),
        Envelope::new(EventBody::PromptEnd {
            prompt_name: ids.prompt_name.clone(),
        }),
        Envelope::new(EventBody::SessionEnd {}),
    ]
}

/// What the receive loop does with one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlEvent),
    /// Decoded response PCM with its wire sequence number, if any.
    Audio { pcm: Vec<i16>, sequence: Option<u64> },
    /// Transcript text; logged only.
    Text(String),
    Ignore,
}

pub fn classify(body: EventBody) -> Inbound {
    match body {
        EventBody::ContentStart { kind, role, .. } => {
            if kind == "AUDIO" && role.as_deref() == Some("ASSISTANT") {
                Inbound::Control(ControlEvent::TurnStarted)
            } else {
                Inbound::Ignore
            }
        }
        EventBody::AudioOutput { content, sequence } => match B64.decode(content.as_bytes()) {
            Ok(bytes) => {
                let pcm = bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect();
                Inbound::Audio { pcm, sequence }
            }
            Err(e) => Inbound::Control(ControlEvent::Error(
                ErrorKind::ProtocolError,
                format!("bad audio payload: {e}"),
            )),
        },
        EventBody::ContentEnd { stop_reason, .. } => match stop_reason.as_deref() {
            Some("INTERRUPTED") => Inbound::Control(ControlEvent::Interrupted),
            Some("END_TURN") => Inbound::Control(ControlEvent::TurnEnded),
            // Transcript and input content blocks close mid-turn; only an
            // explicit end-of-turn leaves the speaking state.
            _ => Inbound::Ignore,
        },
        EventBody::TextOutput { content, .. } => Inbound::Text(content),
        EventBody::CompletionEnd {} | EventBody::SessionEnd {} => {
            Inbound::Control(ControlEvent::SessionEnded)
        }
        // Echoes of our own event shapes from a misbehaving endpoint.
        _ => Inbound::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_audio_output() {
        let json = r#"{"event":{"audioOutput":{"content":"AAD/fw==","sequence":7}}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        match classify(env.event) {
            Inbound::Audio { pcm, sequence } => {
                assert_eq!(pcm, vec![0, 32767]);
                assert_eq!(sequence, Some(7));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn assistant_audio_content_start_begins_a_turn() {
        let json = r#"{"event":{"contentStart":{"promptName":"p","contentName":"c","type":"AUDIO","role":"ASSISTANT"}}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            classify(env.event),
            Inbound::Control(ControlEvent::TurnStarted)
        );
    }

    #[test]
    fn transcript_content_end_is_ignored() {
        let json =
            r#"{"event":{"contentEnd":{"contentName":"transcript","stopReason":"PARTIAL_TURN"}}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(classify(env.event), Inbound::Ignore);

        let json = r#"{"event":{"contentEnd":{"stopReason":"END_TURN"}}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(classify(env.event), Inbound::Control(ControlEvent::TurnEnded));
    }

    #[test]
    fn interrupted_stop_reason_maps_to_barge_in() {
        let json = r#"{"event":{"contentEnd":{"stopReason":"INTERRUPTED"}}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            classify(env.event),
            Inbound::Control(ControlEvent::Interrupted)
        );
    }

    #[test]
    fn preamble_order_is_fixed() {
        let ids = SessionIds::generate();
        let events = preamble(&ids, "matthew", "prompt", 16_000, 24_000);
        assert_eq!(events.len(), 6);
        assert!(events[0].to_json().contains("sessionStart"));
        assert!(events[1].to_json().contains("promptStart"));
        assert!(events[5].to_json().contains("audioInputConfiguration"));
    }
}
