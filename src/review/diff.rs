use std::collections::HashMap;
use std::sync::Arc;

use agentdesk_common::Task;
use serde::Serialize;

use super::{ReviewDetail, ReviewLoader};
use crate::errors::{DeskError, Result};

/// One screenful of a file's diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffPage {
    pub file: String,
    pub offset: usize,
    pub total_lines: usize,
    pub lines: Vec<String>,
}

impl DiffPage {
    pub fn has_more(&self) -> bool {
        self.offset + self.lines.len() < self.total_lines
    }
}

/// Pages through the diffs of a review, one file at a time.
///
/// Each file's diff is fetched once and kept. Each file keeps its own scroll
/// offset, so switching away and back lands where the reader left off.
pub struct DiffBrowser {
    loader: Arc<dyn ReviewLoader>,
    task: Task,
    branch: String,
    files: Vec<String>,
    current: usize,
    page_size: usize,
    cache: HashMap<String, Vec<String>>,
    offsets: HashMap<String, usize>,
}

impl DiffBrowser {
    pub fn new(loader: Arc<dyn ReviewLoader>, detail: &ReviewDetail, page_size: usize) -> Self {
        Self {
            loader,
            task: detail.task.clone(),
            branch: detail.branch.clone(),
            files: detail.file_paths(),
            current: 0,
            page_size: page_size.max(1),
            cache: HashMap::new(),
            offsets: HashMap::new(),
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn current_file(&self) -> Option<&str> {
        self.files.get(self.current).map(String::as_str)
    }

    pub fn offset_of(&self, file: &str) -> usize {
        self.offsets.get(file).copied().unwrap_or(0)
    }

    /// Number of distinct files whose diff has been fetched.
    pub fn cached_files(&self) -> usize {
        self.cache.len()
    }

    /// Switch to `file`, keeping every file's scroll position.
    pub async fn select(&mut self, file: &str) -> Result<DiffPage> {
        let index = self
            .files
            .iter()
            .position(|f| f == file)
            .ok_or_else(|| DeskError::FileNotInReview {
                id: self.task.id.to_string(),
                path: file.to_string(),
            })?;
        self.current = index;
        self.page().await
    }

    pub async fn next_file(&mut self) -> Result<DiffPage> {
        if !self.files.is_empty() {
            self.current = (self.current + 1) % self.files.len();
        }
        self.page().await
    }

    pub async fn prev_file(&mut self) -> Result<DiffPage> {
        if !self.files.is_empty() {
            self.current = (self.current + self.files.len() - 1) % self.files.len();
        }
        self.page().await
    }

    /// The visible page of the current file.
    pub async fn page(&mut self) -> Result<DiffPage> {
        let file = self.require_current()?;
        self.ensure_loaded(&file).await?;
        Ok(self.render(&file))
    }

    /// Move the current file's offset by `delta` lines, clamped to the diff.
    pub async fn scroll(&mut self, delta: isize) -> Result<DiffPage> {
        let file = self.require_current()?;
        self.ensure_loaded(&file).await?;
        let total = self.cache.get(&file).map(Vec::len).unwrap_or(0);
        let max_offset = total.saturating_sub(self.page_size);
        let current = self.offset_of(&file);
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta.unsigned_abs()).min(max_offset)
        };
        self.offsets.insert(file.clone(), next);
        Ok(self.render(&file))
    }

    pub async fn page_down(&mut self) -> Result<DiffPage> {
        let step = isize::try_from(self.page_size).unwrap_or(isize::MAX);
        self.scroll(step).await
    }

    pub async fn page_up(&mut self) -> Result<DiffPage> {
        let step = isize::try_from(self.page_size).unwrap_or(isize::MAX);
        self.scroll(-step).await
    }

    fn require_current(&self) -> Result<String> {
        self.current_file()
            .map(str::to_string)
            .ok_or_else(|| DeskError::InvalidInput(format!("review of {} has no files", self.task.id)))
    }

    async fn ensure_loaded(&mut self, file: &str) -> Result<()> {
        if self.cache.contains_key(file) {
            return Ok(());
        }
        let text = self.loader.file_diff(&self.task, &self.branch, file).await?;
        let lines = text.lines().map(str::to_string).collect();
        self.cache.insert(file.to_string(), lines);
        Ok(())
    }

    fn render(&self, file: &str) -> DiffPage {
        let lines = self.cache.get(file).map(Vec::as_slice).unwrap_or(&[]);
        let offset = self.offset_of(file).min(lines.len());
        let end = (offset + self.page_size).min(lines.len());
        DiffPage {
            file: file.to_string(),
            offset,
            total_lines: lines.len(),
            lines: lines[offset..end].to_vec(),
        }
    }
}
