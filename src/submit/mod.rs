//! Submission pipeline.
//!
//! `Idle -> Uploading -> Analyzing -> Persisting -> Done`, with an edge to
//! `Failed` from every non-terminal stage. Analysis is best-effort: when it
//! fails the post is still written, without a plant name, and the failure comes
//! back as a warning. An upload failure happens before any post exists. A
//! persisting failure leaves the uploaded object behind.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::errors::ClientError;
use crate::models::{CreatePostRequest, Identity, PlantAnalysis, Post, StoredObject};
use crate::request::{Generation, RequestScope, Ticket};
use crate::session::IdentityProvider;
use crate::storage::IMAGE_PREFIX;

/// Upload progress as a non-decreasing percentage.
pub struct UploadProgress<'a> {
    percent: AtomicU8,
    on_change: Box<dyn Fn(u8) + Send + Sync + 'a>,
}

impl<'a> UploadProgress<'a> {
    pub fn new(on_change: impl Fn(u8) + Send + Sync + 'a) -> Self {
        Self {
            percent: AtomicU8::new(0),
            on_change: Box::new(on_change),
        }
    }

    /// Record `sent` of `total` bytes. Values below the current percentage are ignored.
    pub fn report(&self, sent: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            ((sent.min(total) * 100) / total) as u8
        };
        let previous = self.percent.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            (self.on_change)(percent);
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }
}

/// Durable storage for attachments.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        bearer: &str,
        progress: &UploadProgress<'_>,
    ) -> Result<StoredObject, ClientError>;
}

/// External plant identification.
#[async_trait]
pub trait AnalysisService: Send + Sync + 'static {
    async fn analyze(&self, image_url: &str, bearer: &str) -> Result<PlantAnalysis, ClientError>;
}

/// Authenticated post write.
#[async_trait]
pub trait PostWriter: Send + Sync + 'static {
    async fn create_post(
        &self,
        request: &CreatePostRequest,
        bearer: &str,
    ) -> Result<Post, ClientError>;
}

/// Binary attachment of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// User-authored input of one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub title: String,
    pub content: String,
    pub attachment: Option<Attachment>,
}

/// Observable pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubmissionStage {
    #[default]
    Idle,
    Uploading {
        percent: u8,
    },
    Analyzing,
    Persisting,
    Done {
        post_id: String,
    },
    Failed(ClientError),
}

impl SubmissionStage {
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SubmissionStage::Uploading { .. }
                | SubmissionStage::Analyzing
                | SubmissionStage::Persisting
        )
    }
}

/// Successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReport {
    pub post: Post,
    pub analysis: Option<PlantAnalysis>,
    /// Non-fatal problem, currently only [`ClientError::AnalysisUnavailable`]
    pub warning: Option<ClientError>,
}

/// Deadlines of the network steps.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTimeouts {
    pub upload: Duration,
    pub analysis: Duration,
    pub persist: Duration,
}

/// Storage path of an attachment: namespaced by uploader and time.
pub fn attachment_path(uid: &str, file_name: &str, at: DateTime<Utc>) -> String {
    let mut sanitized = String::with_capacity(file_name.len());
    for c in file_name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        // Runs of dots collapse to one so no `..` segment survives
        if c == '.' && sanitized.ends_with('.') {
            continue;
        }
        sanitized.push(c);
    }
    let sanitized = sanitized.trim_start_matches('.');
    let name = if sanitized.is_empty() { "image" } else { sanitized };
    format!("{}/{}/{}_{}", IMAGE_PREFIX, uid, at.timestamp_millis(), name)
}

pub struct SubmissionPipeline {
    identity: Arc<dyn IdentityProvider>,
    objects: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisService>,
    posts: Arc<dyn PostWriter>,
    timeouts: PipelineTimeouts,
    generation: Generation,
    stage: watch::Sender<SubmissionStage>,
}

impl SubmissionPipeline {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        objects: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisService>,
        posts: Arc<dyn PostWriter>,
        timeouts: PipelineTimeouts,
    ) -> Self {
        let (stage, _) = watch::channel(SubmissionStage::Idle);
        Self {
            identity,
            objects,
            analysis,
            posts,
            timeouts,
            generation: Generation::new(),
            stage,
        }
    }

    pub fn watch(&self) -> watch::Receiver<SubmissionStage> {
        self.stage.subscribe()
    }

    pub fn stage(&self) -> SubmissionStage {
        self.stage.borrow().clone()
    }

    /// Back to `Idle`; stage updates of in-flight submissions are dropped.
    pub fn reset(&self) {
        self.generation.invalidate();
        self.stage.send_replace(SubmissionStage::Idle);
    }

    /// Run a submission end to end.
    pub async fn submit(
        &self,
        submitter: Option<&Identity>,
        submission: Submission,
    ) -> Result<SubmissionReport, ClientError> {
        let (submitter, attachment) = validate(submitter, &submission)?;
        if self.stage.borrow().is_in_progress() {
            return Err(ClientError::Validation(
                "A submission is already in progress.".to_string(),
            ));
        }

        let ticket = self.generation.begin();
        match self.run(ticket, submitter, &submission, attachment).await {
            Ok(report) => {
                self.set_stage(
                    ticket,
                    SubmissionStage::Done {
                        post_id: report.post.id.clone(),
                    },
                );
                tracing::info!("Submitted post {}", report.post.id);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Submission failed: {}", e);
                self.set_stage(ticket, SubmissionStage::Failed(e.clone()));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        ticket: Ticket,
        submitter: &Identity,
        submission: &Submission,
        attachment: &Attachment,
    ) -> Result<SubmissionReport, ClientError> {
        // Uploading
        self.set_stage(ticket, SubmissionStage::Uploading { percent: 0 });
        let upload_token = self.identity.id_token(false).await?;
        let path = attachment_path(&submitter.uid, &attachment.file_name, Utc::now());
        let progress = UploadProgress::new(|percent| {
            self.set_stage(ticket, SubmissionStage::Uploading { percent });
        });
        let stored = RequestScope::new(self.timeouts.upload)
            .run(
                self.objects
                    .upload(&path, &attachment.bytes, &upload_token, &progress),
            )
            .await?;
        tracing::debug!("Attachment stored at {}", stored.url);

        // Analyzing
        self.set_stage(ticket, SubmissionStage::Analyzing);
        let bearer = self.identity.id_token(true).await?;
        let (analysis, warning) = match RequestScope::new(self.timeouts.analysis)
            .run(self.analysis.analyze(&stored.url, &bearer))
            .await
        {
            Ok(analysis) => (Some(analysis), None),
            Err(e) => {
                tracing::warn!("Plant analysis unavailable, saving without it: {}", e);
                (None, Some(ClientError::AnalysisUnavailable(e.to_string())))
            }
        };

        // Persisting
        self.set_stage(ticket, SubmissionStage::Persisting);
        let content = submission.content.trim();
        let request = CreatePostRequest {
            title: submission.title.trim().to_string(),
            content: (!content.is_empty()).then(|| content.to_string()),
            image_url: Some(stored.url.clone()),
            author_id: submitter.uid.clone(),
            plant_name: analysis
                .as_ref()
                .map(|a| a.plant_name.clone())
                .filter(|name| !name.is_empty()),
        };
        let post = RequestScope::new(self.timeouts.persist)
            .run(self.posts.create_post(&request, &bearer))
            .await?;

        Ok(SubmissionReport {
            post,
            analysis,
            warning,
        })
    }

    fn set_stage(&self, ticket: Ticket, stage: SubmissionStage) {
        if self.generation.is_current(ticket) {
            self.stage.send_replace(stage);
        }
    }
}

fn validate<'a>(
    submitter: Option<&'a Identity>,
    submission: &'a Submission,
) -> Result<(&'a Identity, &'a Attachment), ClientError> {
    let submitter = submitter
        .ok_or_else(|| ClientError::Validation("Sign in before posting.".to_string()))?;
    let attachment = submission
        .attachment
        .as_ref()
        .filter(|a| !a.bytes.is_empty());
    match attachment {
        Some(attachment) if !submission.title.trim().is_empty() => Ok((submitter, attachment)),
        _ => Err(ClientError::Validation(
            "Title and image are required.".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    pub struct MemoryObjects {
        pub uploads: Mutex<Vec<(String, usize)>>,
        pub fail_with: Mutex<Option<ClientError>>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for MemoryObjects {
        async fn upload(
            &self,
            path: &str,
            bytes: &[u8],
            _bearer: &str,
            progress: &UploadProgress<'_>,
        ) -> Result<StoredObject, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            let total = bytes.len() as u64;
            for sent in [total / 4, total / 2, total / 3, total] {
                progress.report(sent, total);
            }
            self.uploads.lock().push((path.to_string(), bytes.len()));
            Ok(StoredObject {
                path: path.to_string(),
                url: format!("http://store/{}", path),
                size: total,
            })
        }
    }

    #[derive(Default)]
    pub struct FixedAnalysis {
        pub result: Mutex<Option<PlantAnalysis>>,
        pub calls: AtomicUsize,
    }

    impl FixedAnalysis {
        pub fn naming(plant: &str) -> Self {
            let analysis = Self::default();
            *analysis.result.lock() = Some(PlantAnalysis {
                plant_name: plant.to_string(),
                common_names: vec![],
                family: Some("Lamiaceae".to_string()),
                description: None,
            });
            analysis
        }
    }

    #[async_trait]
    impl AnalysisService for FixedAnalysis {
        async fn analyze(
            &self,
            _image_url: &str,
            _bearer: &str,
        ) -> Result<PlantAnalysis, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .lock()
                .clone()
                .ok_or_else(|| ClientError::Network("503 Service Unavailable".into()))
        }
    }

    #[derive(Default)]
    pub struct MemoryWriter {
        pub written: Mutex<Vec<CreatePostRequest>>,
        pub fail_with: Mutex<Option<ClientError>>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl PostWriter for MemoryWriter {
        async fn create_post(
            &self,
            request: &CreatePostRequest,
            _bearer: &str,
        ) -> Result<Post, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            let mut written = self.written.lock();
            written.push(request.clone());
            Ok(Post {
                id: format!("created-{}", written.len()),
                title: request.title.clone(),
                content: request.content.clone(),
                image_url: request.image_url.clone(),
                author_id: request.author_id.clone(),
                plant_name: request.plant_name.clone(),
                created_at: Utc::now(),
                like_count: 0,
            })
        }
    }

    pub fn timeouts() -> PipelineTimeouts {
        PipelineTimeouts {
            upload: Duration::from_secs(60),
            analysis: Duration::from_secs(30),
            persist: Duration::from_secs(5),
        }
    }

    pub fn submission(title: &str) -> Submission {
        Submission {
            title: title.to_string(),
            content: "found by the river".to_string(),
            attachment: Some(Attachment {
                file_name: "mint leaf.jpg".to_string(),
                bytes: vec![7; 1000],
            }),
        }
    }
}
