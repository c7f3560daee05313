//! Diary-note generation on top of the router.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::RouterError;
use crate::router::Router;
use crate::types::{PriorityHint, RouterRequest, RouterResponse};

pub const DIARY_SYSTEM_PROMPT: &str = "You are a thoughtful assistant that helps people create \
meaningful personal diary entries from their spoken thoughts or experiences. Focus on emotional \
depth, personal reflection, and authentic expression.";

const FALLBACK_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum DiaryError {
    #[error("Transcription is empty")]
    EmptyTranscription,

    #[error("Invalid job id {0:?}")]
    InvalidJobId(String),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("Failed to write diary note: {0}")]
    Io(#[from] std::io::Error),
}

/// Prompt asking for a structured first-person diary entry.
pub fn build_diary_prompt(transcription: &str) -> String {
    format!(
        "Convert the following transcription into a well-structured personal diary entry.\n\n\
         Create a thoughtful, reflective diary note with the following sections:\n\n\
         **Date & Time**: Today's date and approximate time\n\
         **Mood/Feelings**: Emotional state and general feelings expressed\n\
         **Key Events**: Main activities, experiences, or topics discussed\n\
         **Thoughts & Reflections**: Personal insights, learnings, or deeper thoughts\n\
         **Takeaways**: Important points or actions to remember\n\n\
         Guidelines:\n\
         - Write in first person as if the person is writing their own diary\n\
         - Maintain a personal, authentic tone\n\
         - Focus on the emotional and experiential aspects\n\
         - Keep it concise but meaningful\n\
         - If multiple topics are discussed, organize them logically\n\n\
         Transcription:\n{transcription}\n\n\
         Please create a personal diary entry based on this content:"
    )
}

/// Note shown when no model could write one; built from the transcription
/// alone.
pub fn fallback_note(transcription: &str) -> String {
    let trimmed = transcription.trim();
    let excerpt = match trimmed.char_indices().nth(FALLBACK_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    };

    format!(
        "**Mood/Feelings**: [Unable to analyze due to service limitation]\n\n\
         **Key Events**:\n{excerpt}\n\n\
         **Thoughts & Reflections**:\n\
         This is a transcribed recording that needs further personal reflection.\n\n\
         **Takeaways**:\n\
         Review the full transcription for important points and personal insights.\n\n\
         ---\n\
         *Note: This entry was generated automatically because AI processing was unavailable.*\n"
    )
}

#[derive(Debug, Clone)]
pub struct DiaryNote {
    pub text: String,
    pub provider_used: String,
    pub emergency: bool,
}

impl DiaryNote {
    /// Wrap a router reply, swapping the generic emergency text for the
    /// diary fallback note.
    pub fn from_response(response: &RouterResponse, transcription: &str) -> Self {
        let emergency = response.is_emergency();
        let text = if emergency {
            fallback_note(transcription)
        } else {
            response.text.clone()
        };

        Self {
            text,
            provider_used: response.provider_used.clone(),
            emergency,
        }
    }
}

pub struct DiaryNoteGenerator {
    router: Arc<Router>,
}

impl DiaryNoteGenerator {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn request_for(
        transcription: &str,
        user_id: &str,
        priority: PriorityHint,
        max_cost: Option<f64>,
    ) -> RouterRequest {
        let mut request = RouterRequest::new(build_diary_prompt(transcription), user_id)
            .with_system_prompt(DIARY_SYSTEM_PROMPT)
            .with_priority(priority);
        if let Some(max_cost) = max_cost {
            request = request.with_max_cost(max_cost);
        }
        request
    }

    pub async fn generate(
        &self,
        transcription: &str,
        user_id: &str,
        priority: PriorityHint,
        max_cost: Option<f64>,
    ) -> Result<DiaryNote, DiaryError> {
        if transcription.trim().is_empty() {
            return Err(DiaryError::EmptyTranscription);
        }

        let request = Self::request_for(transcription, user_id, priority, max_cost);
        let response = self.router.generate(&request).await?;
        let note = DiaryNote::from_response(&response, transcription);

        if note.emergency {
            warn!(user_id, "Diary note generated from fallback template");
        } else {
            info!(
                user_id,
                provider = %note.provider_used,
                length = note.text.len(),
                "Diary note generated"
            );
        }

        Ok(note)
    }
}

/// Write `note` to `<dir>/diary_notes/<job_id>.md`.
pub async fn save_note(dir: &Path, job_id: &str, note: &str) -> Result<PathBuf, DiaryError> {
    let valid = !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && !job_id.contains(['/', '\\']);
    if !valid {
        return Err(DiaryError::InvalidJobId(job_id.to_string()));
    }

    let notes_dir = dir.join("diary_notes");
    tokio::fs::create_dir_all(&notes_dir).await?;

    let path = notes_dir.join(format!("{job_id}.md"));
    tokio::fs::write(&path, note).await?;
    info!(path = %path.display(), "Diary note saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_transcription() {
        let prompt = build_diary_prompt("I went hiking.");
        assert!(prompt.contains("Transcription:\nI went hiking."));
        assert!(prompt.ends_with("based on this content:"));
    }

    #[test]
    fn test_fallback_note_truncates() {
        let long = "a".repeat(FALLBACK_EXCERPT_CHARS + 1);
        let note = fallback_note(&long);
        assert!(note.contains(&format!("{}...", "a".repeat(FALLBACK_EXCERPT_CHARS))));
        assert_eq!(fallback_note("short"), fallback_note("short"));
    }

    #[tokio::test]
    async fn test_save_note_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_note(dir.path(), "job-42", "hello").await.unwrap();
        assert_eq!(path, dir.path().join("diary_notes").join("job-42.md"));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_save_note_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["", "..", "../escape", "a/b"] {
            assert!(matches!(
                save_note(dir.path(), bad, "x").await,
                Err(DiaryError::InvalidJobId(_))
            ));
        }
    }
}
