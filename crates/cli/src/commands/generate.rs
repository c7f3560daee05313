use anyhow::{bail, Context, Result};
use clap::Args;
use console::style;
use llm::{
    save_note, DiaryNote, DiaryNoteGenerator, JsonLinesSink, PriorityHint, TracingSink, UsageSink,
    UsageTracker,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::{build_router, load_config};

/// Generate a diary note from a transcription file.
#[derive(Debug, Args)]
pub struct GenerateCommand {
    /// File holding the transcription text
    #[arg(long)]
    transcript: PathBuf,

    #[arg(long)]
    user_id: String,

    /// Routing hint (low, medium, high)
    #[arg(long, default_value = "medium")]
    priority: PriorityHint,

    /// Advisory budget in USD
    #[arg(long)]
    max_cost: Option<f64>,

    /// Notes are written to <output-dir>/diary_notes/<job-id>.md
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Defaults to a random UUID
    #[arg(long)]
    job_id: Option<String>,

    /// Overall deadline; the fallback note is used once it passes
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Append per-attempt usage records to this JSON Lines file
    #[arg(long)]
    usage_log: Option<PathBuf>,

    /// Print the note and a router status report to stdout
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl GenerateCommand {
    pub async fn execute(self) -> Result<()> {
        let transcription = tokio::fs::read_to_string(&self.transcript)
            .await
            .with_context(|| format!("Failed to read {}", self.transcript.display()))?;
        if transcription.trim().is_empty() {
            bail!("Transcription file {} is empty", self.transcript.display());
        }

        let config = load_config()?;
        let sink: Arc<dyn UsageSink> = match &self.usage_log {
            Some(path) => Arc::new(JsonLinesSink::new(path.clone())),
            None => Arc::new(TracingSink),
        };
        let tracker = Arc::new(UsageTracker::with_sink(sink, config.usage_batch.clone()));
        let router = build_router(&config, tracker.clone())?;
        let generator = DiaryNoteGenerator::new(Arc::new(router));

        let generation =
            generator.generate(&transcription, &self.user_id, self.priority, self.max_cost);
        let note = match self.deadline_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), generation).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(deadline_secs = secs, "Deadline passed, using fallback note");
                    let request = DiaryNoteGenerator::request_for(
                        &transcription,
                        &self.user_id,
                        self.priority,
                        self.max_cost,
                    );
                    let response = generator.router().emergency_response(&request);
                    DiaryNote::from_response(&response, &transcription)
                }
            },
            None => generation.await?,
        };

        let job_id = self
            .job_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let path = save_note(&self.output_dir, &job_id, &note.text).await?;

        if self.verbose {
            println!("{}", note.text);
            println!();
            println!("{}", generator.router().status_report(None));
        }

        let source = if note.emergency {
            style("fallback template").yellow().to_string()
        } else {
            style(&note.provider_used).green().to_string()
        };
        println!("{} ({})", path.display(), source);

        tracker.shutdown().await;
        Ok(())
    }
}
