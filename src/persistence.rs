//! `PersistenceAdapter` port and a filesystem implementation (§6 "sessionOperation").
//!
//! Persisted sessions are wrapped in a versioned envelope so future format
//! changes can be migrated on load rather than breaking existing files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::session::{Session, SessionId};

pub const ENVELOPE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

/// `{version, format, compressed, encrypted, data}` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub version: String,
    pub format: ExportFormat,
    pub compressed: bool,
    pub encrypted: bool,
    pub data: serde_json::Value,
}

/// Storage port; the engine depends on this trait, not a concrete backend.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save(&self, session: &Session) -> EngineResult<()>;
    async fn load(&self, session_id: &SessionId) -> EngineResult<Session>;
    async fn list(&self) -> EngineResult<Vec<SessionId>>;
    async fn delete(&self, session_id: &SessionId) -> EngineResult<()>;
    async fn export(&self, session_id: &SessionId, format: ExportFormat) -> EngineResult<String>;
}

/// Filesystem-backed adapter: one JSON file per session under `sessions/`,
/// one metadata sidecar under `metadata/`.
pub struct FsPersistence {
    root: PathBuf,
}

impl FsPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// `SessionId::parse` accepts dots per §3.1, which is too permissive to
    /// turn directly into a filename. The persistence boundary applies its
    /// own, stricter rule independently: no dots, no separators, 1-255
    /// bytes (§8 #8: rejected ids never touch disk).
    fn assert_filesystem_safe(raw: &str) -> EngineResult<()> {
        if raw.is_empty()
            || raw.len() > 255
            || !raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(EngineError::InvalidSessionId(format!(
                "session id {raw:?} is not filesystem-safe"
            )));
        }
        Ok(())
    }

    fn session_path(&self, session_id: &SessionId) -> EngineResult<PathBuf> {
        let raw = session_id.as_str();
        Self::assert_filesystem_safe(raw)?;
        Ok(self.sessions_dir().join(format!("{raw}.json")))
    }

    fn metadata_path(&self, session_id: &SessionId) -> EngineResult<PathBuf> {
        let raw = session_id.as_str();
        Self::assert_filesystem_safe(raw)?;
        Ok(self.metadata_dir().join(format!("{raw}.meta.json")))
    }

    async fn ensure_dirs(&self) -> EngineResult<()> {
        tokio::fs::create_dir_all(self.sessions_dir()).await?;
        tokio::fs::create_dir_all(self.metadata_dir()).await?;
        Ok(())
    }

    fn render_markdown(session: &Session) -> String {
        let mut out = format!(
            "# Session {}\n\n**Technique:** {}\n\n**Problem:** {}\n\n## History\n\n",
            session.session_id, session.technique, session.problem
        );
        for entry in &session.history {
            out.push_str(&format!(
                "### Step {}\n\n{}\n\n",
                entry.step,
                serde_json::to_string_pretty(&entry.output).unwrap_or_default()
            ));
        }
        out
    }

    fn render_csv(session: &Session) -> String {
        let mut out = String::from("step,timestamp,is_revision\n");
        for entry in &session.history {
            out.push_str(&format!(
                "{},{},{}\n",
                entry.step,
                entry.timestamp.to_rfc3339(),
                entry.is_revision.unwrap_or(false)
            ));
        }
        out
    }
}

#[async_trait]
impl PersistenceAdapter for FsPersistence {
    async fn save(&self, session: &Session) -> EngineResult<()> {
        self.ensure_dirs().await?;
        let envelope = PersistedEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            format: ExportFormat::Json,
            compressed: false,
            encrypted: false,
            data: serde_json::to_value(session)?,
        };
        let path = self.session_path(&session.session_id)?;
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        tokio::fs::write(&path, bytes).await?;

        let meta_path = self.metadata_path(&session.session_id)?;
        let meta = serde_json::json!({
            "sessionId": session.session_id.to_string(),
            "technique": session.technique,
            "status": session.status,
            "lastActivityTime": session.last_activity_time,
        });
        tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).await?;
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> EngineResult<Session> {
        let path = self.session_path(session_id)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| EngineError::SessionNotFound(session_id.to_string()))?;
        let envelope: PersistedEnvelope = serde_json::from_slice(&bytes)?;
        let session: Session = serde_json::from_value(envelope.data)?;
        Ok(session)
    }

    async fn list(&self) -> EngineResult<Vec<SessionId>> {
        self.ensure_dirs().await?;
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(self.sessions_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(stem) = Path::new(&entry.file_name())
                .file_stem()
                .and_then(|s| s.to_str())
            {
                if let Ok(id) = SessionId::parse(stem) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    async fn delete(&self, session_id: &SessionId) -> EngineResult<()> {
        let path = self.session_path(session_id)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|_| EngineError::SessionNotFound(session_id.to_string()))?;
        if let Ok(meta_path) = self.metadata_path(session_id) {
            let _ = tokio::fs::remove_file(meta_path).await;
        }
        Ok(())
    }

    async fn export(&self, session_id: &SessionId, format: ExportFormat) -> EngineResult<String> {
        let session = self.load(session_id).await?;
        Ok(match format {
            ExportFormat::Json => serde_json::to_string_pretty(&session)?,
            ExportFormat::Markdown => Self::render_markdown(&session),
            ExportFormat::Csv => Self::render_csv(&session),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session::new(
            SessionId::parse("s1").unwrap(),
            None,
            "six_hats".into(),
            "foster innovation".into(),
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir();
        let adapter = FsPersistence::new(dir.clone());
        let session = sample_session();
        adapter.save(&session).await.unwrap();
        let loaded = adapter.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.technique, session.technique);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn dotted_session_id_is_valid_but_not_filesystem_safe() {
        let dir = tempdir();
        let adapter = FsPersistence::new(dir.clone());
        let session_id = SessionId::parse("session.1").unwrap();
        let mut session = sample_session();
        session.session_id = session_id;
        let err = adapter.save(&session).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SESSION_ID");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn load_unknown_session_is_not_found() {
        let dir = tempdir();
        let adapter = FsPersistence::new(dir.clone());
        let err = adapter.load(&SessionId::parse("ghost").unwrap()).await.unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn export_markdown_contains_problem_statement() {
        let dir = tempdir();
        let adapter = FsPersistence::new(dir.clone());
        let session = sample_session();
        adapter.save(&session).await.unwrap();
        let markdown = adapter
            .export(&session.session_id, ExportFormat::Markdown)
            .await
            .unwrap();
        assert!(markdown.contains("foster innovation"));
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    fn tempdir() -> PathBuf {
        std::env::temp_dir().join(format!("lateral-engine-test-{}", uuid::Uuid::new_v4()))
    }
}
