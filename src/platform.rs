//! Document-management platform adapter (§4.9).
//!
//! The upstream API is loosely typed JSON authenticated by a `Referer`
//! header plus a `JSESSIONID` cookie, both supplied per call rather than
//! held as ambient client state — a single adapter instance can serve
//! requests on behalf of different sessions. Responses are normalized into
//! [`ObjectVersion`]/[`FileDescriptor`] exactly once, at this boundary;
//! nothing above this module touches the platform's raw JSON shapes.

use serde_json::Value;

use crate::error::PlatformError;
use crate::types::{FileDescriptor, ObjectVersion};

const API_PATH: &str = "/platform-api/v1";

/// Per-request credentials: the platform trusts whichever session the
/// `JSESSIONID` cookie names, scoped by the `Referer` the browser would
/// have sent.
pub struct Credentials<'a> {
    pub referer: &'a str,
    pub jsessionid: &'a str,
}

impl<'a> Credentials<'a> {
    fn validate(&self) -> Result<(), PlatformError> {
        if self.referer.trim().is_empty() {
            return Err(PlatformError::MissingReferer);
        }
        if self.jsessionid.trim().is_empty() {
            return Err(PlatformError::MissingJsessionid);
        }
        Ok(())
    }
}

/// A file attached to an object version, as addressed for content
/// read/write calls.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub file_id: String,
    pub name: String,
}

pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PATH, path)
    }

    async fn get(&self, creds: &Credentials<'_>, path: &str) -> Result<Value, PlatformError> {
        creds.validate()?;
        let response = self
            .http
            .get(self.url(path))
            .header("Referer", creds.referer)
            .header("Cookie", format!("JSESSIONID={}", creds.jsessionid))
            .send()
            .await
            .map_err(classify)?;
        parse_response(response).await
    }

    async fn post(&self, creds: &Credentials<'_>, path: &str, body: &Value) -> Result<Value, PlatformError> {
        creds.validate()?;
        let response = self
            .http
            .post(self.url(path))
            .header("Referer", creds.referer)
            .header("Cookie", format!("JSESSIONID={}", creds.jsessionid))
            .json(body)
            .send()
            .await
            .map_err(classify)?;
        parse_response(response).await
    }

    /// `GET /user/current` — the identity the session belongs to.
    pub async fn get_current_user(&self, creds: &Credentials<'_>) -> Result<Value, PlatformError> {
        self.get(creds, "/user/current").await
    }

    /// `POST /object/{id}` — full metadata for one object version,
    /// normalized into [`ObjectVersion`].
    pub async fn get_object_version(
        &self,
        creds: &Credentials<'_>,
        object_id: &str,
        with_meta: bool,
        with_files: bool,
    ) -> Result<ObjectVersion, PlatformError> {
        let body = serde_json::json!({
            "withMeta": with_meta,
            "withFiles": with_files,
        });
        let raw = self.post(creds, &format!("/object/{object_id}"), &body).await?;
        parse_object_version(object_id, &raw)
    }

    /// `GET /object/{id}/files` — the files attached to an object version.
    pub async fn get_object_files(&self, creds: &Credentials<'_>, object_id: &str) -> Result<Vec<FileDescriptor>, PlatformError> {
        let raw = self.get(creds, &format!("/object/{object_id}/files")).await?;
        let list = raw.as_array().cloned().unwrap_or_default();
        Ok(list.iter().map(parse_file_descriptor).collect())
    }

    /// `GET /file/{id}/read` — raw file content. The platform returns
    /// content base64-encoded in a JSON envelope; this decodes it.
    pub async fn get_file_content(&self, creds: &Credentials<'_>, file: &FileHandle) -> Result<Vec<u8>, PlatformError> {
        let raw = self.get(creds, &format!("/file/{}/read", file.file_id)).await?;
        decode_file_payload(&raw)
    }

    /// `POST /file/{id}/write` — overwrite a file's content.
    pub async fn put_file_content(&self, creds: &Credentials<'_>, file: &FileHandle, bytes: &[u8]) -> Result<(), PlatformError> {
        creds.validate()?;
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let crc = format!("{:x}", md5::compute(bytes));
        let path = format!(
            "/file/{}/write?fileName={}&crc={crc}",
            file.file_id,
            urlencoding::encode(&file.name)
        );
        let body = serde_json::json!({ "content": encoded });
        self.post(creds, &path, &body).await?;
        Ok(())
    }

    /// `GET /folder/{id}/children` — the folders and objects directly
    /// under a folder.
    pub async fn list_folder_children(&self, creds: &Credentials<'_>, folder_id: &str) -> Result<Vec<Value>, PlatformError> {
        let raw = self.get(creds, &format!("/folder/{folder_id}/children")).await?;
        Ok(raw.as_array().cloned().unwrap_or_default())
    }

    /// `POST /folder/{parent}/children/find` then, if absent,
    /// `POST /folder/{parent}/children` — create a folder only if one by
    /// this name doesn't already exist under `parent_id`.
    pub async fn create_folder(
        &self,
        creds: &Credentials<'_>,
        name: &str,
        parent_id: &str,
        description: Option<&str>,
    ) -> Result<Value, PlatformError> {
        let find_body = serde_json::json!({ "name": name });
        let found = self.post(creds, &format!("/folder/{parent_id}/children/find"), &find_body).await?;
        let existing = found.as_array().and_then(|list| list.iter().find(|f| f.get("name").and_then(|n| n.as_str()) == Some(name)));
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }

        let create_body = serde_json::json!({
            "name": name,
            "description": description.unwrap_or(name),
        });
        self.post(creds, &format!("/folder/{parent_id}/children"), &create_body).await
    }

    /// `POST /folder/{parent}/objects` — create a new object, or a new
    /// version of `object_id` when given.
    pub async fn create_object(
        &self,
        creds: &Credentials<'_>,
        name: &str,
        parent_folder_id: &str,
        naming_authority_id: &str,
        description: Option<&str>,
        file_name: Option<&str>,
        object_id: Option<&str>,
    ) -> Result<Value, PlatformError> {
        let mut body = serde_json::json!({
            "name": name,
            "description": description.unwrap_or(name),
            "namingAuthorityId": naming_authority_id,
        });
        if let Some(object_id) = object_id {
            body["objectId"] = Value::String(object_id.to_string());
        }
        if let Some(file_name) = file_name {
            body["fileName"] = Value::String(file_name.to_string());
        }
        self.post(creds, &format!("/folder/{parent_folder_id}/objects"), &body).await
    }
}

async fn parse_response(response: reqwest::Response) -> Result<Value, PlatformError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(PlatformError::NotFound(response.text().await.unwrap_or_default()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PlatformError::Connection(format!("{status}: {body}")));
    }
    Ok(response.json::<Value>().await?)
}

fn parse_object_version(object_id: &str, raw: &Value) -> Result<ObjectVersion, PlatformError> {
    let name = raw.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let version_id = raw.get("versionId").and_then(|v| v.as_str()).unwrap_or(object_id).to_string();
    let parent_id = raw.get("parentId").and_then(|v| v.as_str()).map(str::to_string);
    let naming_authority_id = raw.get("namingAuthorityId").and_then(|v| v.as_str()).map(str::to_string);
    let files = raw
        .get("files")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(parse_file_descriptor).collect())
        .unwrap_or_default();

    Ok(ObjectVersion {
        io_id: object_id.to_string(),
        version_id,
        parent_id,
        naming_authority_id,
        name,
        files,
    })
}

fn parse_file_descriptor(raw: &Value) -> FileDescriptor {
    FileDescriptor {
        irvf_id: raw.get("fileId").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        name: raw.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        size: raw.get("size").and_then(|v| v.as_u64()).unwrap_or(0),
        content_type: raw.get("contentType").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
    }
}

/// The platform wraps file content in a JSON envelope whose shape varies
/// by endpoint version: either `{"content": "<base64>"}` or a bare base64
/// string. Both are accepted.
fn decode_file_payload(raw: &Value) -> Result<Vec<u8>, PlatformError> {
    use base64::Engine;
    let encoded = match raw {
        Value::String(s) => s.as_str(),
        Value::Object(_) => raw.get("content").and_then(|v| v.as_str()).ok_or_else(|| {
            PlatformError::Connection("file content response missing 'content' field".into())
        })?,
        _ => return Err(PlatformError::Connection("unexpected file content response shape".into())),
    };
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| PlatformError::Connection(format!("invalid base64 file content: {e}")))
}

fn classify(err: reqwest::Error) -> PlatformError {
    if err.is_connect() || err.is_timeout() {
        PlatformError::Connection(err.to_string())
    } else {
        PlatformError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_reject_empty_referer() {
        let creds = Credentials { referer: "", jsessionid: "abc" };
        assert!(matches!(creds.validate(), Err(PlatformError::MissingReferer)));
    }

    #[test]
    fn credentials_reject_empty_jsessionid() {
        let creds = Credentials { referer: "https://platform.example.com", jsessionid: "" };
        assert!(matches!(creds.validate(), Err(PlatformError::MissingJsessionid)));
    }

    #[test]
    fn credentials_accept_both_present() {
        let creds = Credentials { referer: "https://platform.example.com", jsessionid: "abc" };
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn parse_object_version_fills_defaults_for_missing_fields() {
        let raw = serde_json::json!({ "name": "Report" });
        let version = parse_object_version("obj-1", &raw).unwrap();
        assert_eq!(version.io_id, "obj-1");
        assert_eq!(version.version_id, "obj-1");
        assert_eq!(version.name, "Report");
        assert!(version.files.is_empty());
    }

    #[test]
    fn decode_file_payload_accepts_envelope_and_bare_string() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let envelope = serde_json::json!({ "content": encoded.clone() });
        assert_eq!(decode_file_payload(&envelope).unwrap(), b"hello");

        let bare = Value::String(encoded);
        assert_eq!(decode_file_payload(&bare).unwrap(), b"hello");
    }

    #[test]
    fn decode_file_payload_rejects_unexpected_shape() {
        let raw = serde_json::json!(42);
        assert!(decode_file_payload(&raw).is_err());
    }
}
