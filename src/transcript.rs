//! Chat transcript persistence (§4.8).
//!
//! Every chat is saved as a `chat_history.json` file attached to its own
//! object version, filed under a well-known "Dialogs with the AI assistant"
//! folder so a platform browser can list past conversations the same way it
//! lists any other document. A save failure is never fatal to a request —
//! callers log [`TranscriptError`] and move on — but loading and saving
//! stay typed here so that decision is made once, at the call site, rather
//! than by swallowing errors inside this module.

use std::sync::Arc;

use serde_json::Value;

use crate::error::TranscriptError;
use crate::platform::{Credentials, FileHandle, PlatformClient};
use crate::types::ChatTranscript;

const DIALOGS_FOLDER_NAME: &str = "Диалоги с ИИ-помощником";
const TRANSCRIPT_FILE_NAME: &str = "chat_history.json";

pub struct TranscriptStore {
    platform: Arc<PlatformClient>,
    naming_authority_id: String,
}

impl TranscriptStore {
    pub fn new(platform: Arc<PlatformClient>, naming_authority_id: impl Into<String>) -> Self {
        Self { platform, naming_authority_id: naming_authority_id.into() }
    }

    /// Save `transcript` as a new object named `<chat_title>#<timestamp>`
    /// under the dialogs folder, returning the new object's id.
    pub async fn save(
        &self,
        creds: &Credentials<'_>,
        parent_folder_id: &str,
        chat_title: &str,
        timestamp: &str,
        transcript: &ChatTranscript,
    ) -> Result<String, TranscriptError> {
        let folder = self
            .platform
            .create_folder(creds, DIALOGS_FOLDER_NAME, parent_folder_id, None)
            .await?;
        let folder_id = extract_id(&folder).ok_or_else(|| {
            TranscriptError::Parse("dialogs folder response had no id field".into())
        })?;

        let object_name = format!("{chat_title}#{timestamp}");
        let created = self
            .platform
            .create_object(
                creds,
                &object_name,
                &folder_id,
                &self.naming_authority_id,
                None,
                Some(TRANSCRIPT_FILE_NAME),
                None,
            )
            .await?;
        let object_id = extract_id(&created).ok_or_else(|| {
            TranscriptError::Parse("created transcript object had no id field".into())
        })?;

        let file_handle = self.transcript_file_handle(creds, &object_id).await?;
        let body = serde_json::to_vec(transcript).map_err(|e| TranscriptError::Parse(e.to_string()))?;
        self.platform.put_file_content(creds, &file_handle, &body).await?;

        Ok(object_id)
    }

    /// Load the transcript attached to `object_id`.
    pub async fn load(&self, creds: &Credentials<'_>, object_id: &str) -> Result<ChatTranscript, TranscriptError> {
        let file_handle = self.transcript_file_handle(creds, object_id).await?;
        let bytes = self.platform.get_file_content(creds, &file_handle).await?;
        parse_transcript(&bytes)
    }

    async fn transcript_file_handle(&self, creds: &Credentials<'_>, object_id: &str) -> Result<FileHandle, TranscriptError> {
        let files = self.platform.get_object_files(creds, object_id).await?;
        files
            .into_iter()
            .find(|f| f.name == TRANSCRIPT_FILE_NAME)
            .map(|f| FileHandle { file_id: f.irvf_id, name: f.name })
            .ok_or_else(|| TranscriptError::Parse(format!("object {object_id} has no {TRANSCRIPT_FILE_NAME}")))
    }
}

fn extract_id(raw: &Value) -> Option<String> {
    raw.get("id")
        .or_else(|| raw.get("objectId"))
        .or_else(|| raw.get("folderId"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Parses transcript bytes that may be a plain JSON document, a JSON string
/// containing base64-encoded JSON, or `{"content": "<base64>"}` — the
/// platform's file-content envelope has varied across versions.
fn parse_transcript(bytes: &[u8]) -> Result<ChatTranscript, TranscriptError> {
    if let Ok(transcript) = serde_json::from_slice::<ChatTranscript>(bytes) {
        return Ok(transcript);
    }

    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        if let Some(encoded) = value.as_str().or_else(|| value.get("content").and_then(|v| v.as_str())) {
            use base64::Engine;
            if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) {
                if let Ok(transcript) = serde_json::from_slice::<ChatTranscript>(&decoded) {
                    return Ok(transcript);
                }
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        use base64::Engine;
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(text.trim()) {
            if let Ok(transcript) = serde_json::from_slice::<ChatTranscript>(&decoded) {
                return Ok(transcript);
            }
        }
    }

    Err(TranscriptError::Parse("transcript content was not plain JSON or base64-wrapped JSON".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn parse_transcript_accepts_plain_json() {
        let transcript = ChatTranscript { messages: vec![ChatMessage { role: "user".into(), content: "hi".into() }] };
        let bytes = serde_json::to_vec(&transcript).unwrap();
        let parsed = parse_transcript(&bytes).unwrap();
        assert_eq!(parsed.messages.len(), 1);
    }

    #[test]
    fn parse_transcript_accepts_base64_wrapped_json() {
        use base64::Engine;
        let transcript = ChatTranscript { messages: vec![ChatMessage { role: "assistant".into(), content: "hello".into() }] };
        let inner = serde_json::to_vec(&transcript).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(inner);
        let envelope = serde_json::json!({ "content": encoded });
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let parsed = parse_transcript(&bytes).unwrap();
        assert_eq!(parsed.messages[0].content, "hello");
    }

    #[test]
    fn parse_transcript_rejects_garbage() {
        assert!(parse_transcript(b"not json or base64 \x00\x01").is_err());
    }

    #[test]
    fn extract_id_checks_fallback_fields() {
        assert_eq!(extract_id(&serde_json::json!({"id": "a"})), Some("a".to_string()));
        assert_eq!(extract_id(&serde_json::json!({"objectId": "b"})), Some("b".to_string()));
        assert_eq!(extract_id(&serde_json::json!({"folderId": "c"})), Some("c".to_string()));
        assert_eq!(extract_id(&serde_json::json!({})), None);
    }
}
