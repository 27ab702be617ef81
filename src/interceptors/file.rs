use super::Interceptor;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes each exchange to `<base_path>/exchange_<timestamp>_<seq>.md`.
#[derive(Debug)]
pub struct FileInterceptor {
    base_path: PathBuf,
    // Two exchanges inside one millisecond must not overwrite each other
    sequence: AtomicU64,
}

impl FileInterceptor {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path, sequence: AtomicU64::new(0) }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait]
impl Interceptor for FileInterceptor {
    async fn save(&self, prompt: &str, response: &str) -> std::io::Result<()> {
        let timestamp = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let filename = format!("exchange_{}_{:04}.md", timestamp.format("%Y%m%d_%H%M%S_%3f"), seq);
        let file_path = self.base_path.join(filename);

        fs::create_dir_all(&self.base_path).await?;

        let content = format!(
            "# Prompt\n\n{}\n\n# Response\n\n{}\n",
            prompt,
            response
        );

        let mut file = fs::File::create(&file_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %file_path.display(), "Transcript written");

        Ok(())
    }
}
