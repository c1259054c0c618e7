//! Broadcaster stream settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument};
use url::Url;

use crate::error::HostError;
use crate::HostResult;

const DEFAULT_INDENT: &str = "  ";

/// Destination for discovered credentials.
pub trait SettingsSink: Send + Sync {
    /// Store the ingest server and stream key.
    fn write_stream_settings(&self, server: &str, key: &str) -> HostResult<()>;
}

/// The broadcaster's service settings file.
///
/// Only `settings.server` and `settings.key` are changed; key order,
/// indentation and the trailing newline of the file are kept.
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, message: impl Into<String>) -> HostError {
        HostError::Settings {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

impl SettingsSink for JsonSettingsFile {
    #[instrument(name = "settings_write", skip_all, fields(path = %self.path.display()))]
    fn write_stream_settings(&self, server: &str, key: &str) -> HostResult<()> {
        validate_server(server)?;
        if key.trim().is_empty() {
            return Err(self.error("stream key is empty"));
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.error(e.to_string()))?;
        let updated = update_document(&content, server, key).map_err(|e| self.error(e))?;
        fs::write(&self.path, updated).map_err(|e| self.error(e.to_string()))?;

        info!(server = %server, "Stream settings written");
        Ok(())
    }
}

/// Accept only `rtmp://` and `rtmps://` URLs with a host.
pub fn validate_server(server: &str) -> HostResult<Url> {
    let url = Url::parse(server).map_err(|_| HostError::InvalidServer(server.to_string()))?;
    match url.scheme() {
        "rtmp" | "rtmps" if url.host_str().is_some() => Ok(url),
        _ => Err(HostError::InvalidServer(server.to_string())),
    }
}

/// Set `settings.server` and `settings.key` in a JSON document.
fn update_document(content: &str, server: &str, key: &str) -> Result<String, String> {
    let mut document: Value =
        serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))?;

    let root = document
        .as_object_mut()
        .ok_or_else(|| "document is not an object".to_string())?;

    let settings = root
        .entry("settings")
        .or_insert_with(|| Value::Object(Map::new()));
    if settings.is_null() {
        *settings = Value::Object(Map::new());
    }
    let settings = settings
        .as_object_mut()
        .ok_or_else(|| "\"settings\" is not an object".to_string())?;

    settings.insert("server".to_string(), Value::String(server.to_string()));
    settings.insert("key".to_string(), Value::String(key.to_string()));

    let indent = detect_indent(content);
    let mut out = Vec::with_capacity(content.len() + key.len());
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    document
        .serialize(&mut serializer)
        .map_err(|e| e.to_string())?;

    let mut text = String::from_utf8(out).map_err(|e| e.to_string())?;
    if content.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

/// Indentation of the first indented line, or two spaces.
fn detect_indent(content: &str) -> &str {
    content
        .lines()
        .skip(1)
        .map(|line| {
            let body = line.trim_start_matches(|c: char| c == ' ' || c == '\t');
            &line[..line.len() - body.len()]
        })
        .find(|indent| !indent.is_empty())
        .unwrap_or(DEFAULT_INDENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_only_credentials() {
        let content = "{\n    \"type\": \"rtmp_custom\",\n    \"settings\": {\n        \"bwtest\": false,\n        \"server\": \"rtmp://old/app\",\n        \"use_auth\": false\n    }\n}\n";
        let updated = update_document(content, "rtmp://new.example.com/live", "abc").unwrap();

        assert_eq!(
            updated,
            "{\n    \"type\": \"rtmp_custom\",\n    \"settings\": {\n        \"bwtest\": false,\n        \"server\": \"rtmp://new.example.com/live\",\n        \"use_auth\": false,\n        \"key\": \"abc\"\n    }\n}\n"
        );
    }

    #[test]
    fn test_creates_settings_object() {
        let updated = update_document(r#"{"type":"rtmp_custom"}"#, "rtmp://h/app", "k").unwrap();
        let value: Value = serde_json::from_str(&updated).unwrap();

        assert_eq!(value["settings"]["server"], "rtmp://h/app");
        assert_eq!(value["settings"]["key"], "k");
        assert!(updated.starts_with("{\n  \"type\""));
        assert!(!updated.ends_with('\n'));

        let updated = update_document(r#"{"settings":null}"#, "rtmp://h/app", "k").unwrap();
        assert!(updated.contains("\"key\": \"k\""));
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(update_document("[1, 2]", "rtmp://h/app", "k").is_err());
        assert!(update_document(r#"{"settings": "x"}"#, "rtmp://h/app", "k").is_err());
        assert!(update_document("{", "rtmp://h/app", "k").is_err());
    }

    #[test]
    fn test_validate_server() {
        assert!(validate_server("rtmp://push-rtmp-abc.example.com/thirdgame").is_ok());
        assert!(validate_server("rtmps://live.example.com:443/app").is_ok());
        assert!(validate_server("https://example.com/").is_err());
        assert!(validate_server("push-rtmp-abc.example.com").is_err());
    }

    #[test]
    fn test_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, "{\n\t\"settings\": {}\n}").unwrap();

        let sink = JsonSettingsFile::new(&path);
        sink.write_stream_settings("rtmp://h.example.com/app", "stream-1")
            .unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "{\n\t\"settings\": {\n\t\t\"server\": \"rtmp://h.example.com/app\",\n\t\t\"key\": \"stream-1\"\n\t}\n}"
        );
    }

    #[test]
    fn test_write_rejects_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, "{}").unwrap();
        let sink = JsonSettingsFile::new(&path);

        assert!(matches!(
            sink.write_stream_settings("http://h/app", "k"),
            Err(HostError::InvalidServer(_))
        ));
        assert!(matches!(
            sink.write_stream_settings("rtmp://h/app", " "),
            Err(HostError::Settings { .. })
        ));
        assert!(matches!(
            JsonSettingsFile::new(dir.path().join("missing.json"))
                .write_stream_settings("rtmp://h/app", "k"),
            Err(HostError::Settings { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }
}
