//! Request validation and admission.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::task::TaskRequest;
use crate::types::TaskId;

use super::DownloadController;

impl DownloadController {
    /// Submit a download request
    ///
    /// The request is validated against the configuration snapshot first; a
    /// rejected request never touches the registry. An accepted request is
    /// registered as Queued and starts right away if a slot is free.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has started
    /// - [`Error::Validation`] for an empty source, a malformed URL, a mode
    ///   the platform does not offer, or a non-positive override
    /// - [`Error::Config`] if the snapshot itself is unusable
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use taskdl::*;
    /// # async fn example(controller: DownloadController) -> Result<()> {
    /// let request = TaskRequest::parse("douyin", "post", "https://www.douyin.com/user/MS4w")?;
    /// let id = controller.submit(request).await?;
    /// println!("queued {}", id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        self.config.validate()?;
        let request = request.validated().inspect_err(|e| {
            tracing::debug!(error = %e, "rejected download request");
        })?;

        let platform = request.platform;
        let mode = request.mode;
        let id = self.manager.add(request).await;
        tracing::info!(task_id = %id, platform = %platform, mode = %mode, "task submitted");

        self.pump().await;
        Ok(id)
    }
}
