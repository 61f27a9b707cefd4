//! Persisting the finished article.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use newsagent_shared::{Article, NewsAgentError, Result};

/// Durable home of the run's single output.
pub trait ArticleStore: Send + Sync {
    /// Replace whatever was stored before. Returns where the article landed.
    fn save(&self, article: &Article) -> Result<PathBuf>;

    fn location(&self) -> &Path;
}

/// Markdown file at a fixed path, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileArticleStore {
    path: PathBuf,
}

impl FileArticleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "article.md".into());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

impl ArticleStore for FileArticleStore {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn save(&self, article: &Article) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| NewsAgentError::io(parent, e))?;
        }

        let mut body = article.body_markdown.trim_end().to_string();
        body.push('\n');

        let temp = self.temp_path();
        std::fs::write(&temp, &body).map_err(|e| NewsAgentError::io(&temp, e))?;
        std::fs::rename(&temp, &self.path).map_err(|e| NewsAgentError::io(&self.path, e))?;

        debug!(bytes = body.len(), "article written");
        Ok(self.path.clone())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
