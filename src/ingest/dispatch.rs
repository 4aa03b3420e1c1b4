//! Question-plus-files dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

use super::render::PageRasterizer;
use crate::llm::{
    ASSISTANT_PREAMBLE, ChatMessage, ChatOptions, ChatProvider, FileStore, LlmError,
    ProviderFileHandle, UploadedFile, VisionProvider, validate_question,
};

/// Which provider path served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    /// A lone PDF rasterized and sent to the vision model.
    Vision,
    /// Files registered with the provider store and referenced from a long-context chat.
    BulkUpload,
}

impl DispatchRoute {
    /// Pick the route for a validated, non-empty file list.
    ///
    /// Only a single PDF goes through the vision model; several PDFs still take the upload path.
    pub fn for_files(files: &[UploadedFile]) -> Self {
        match files {
            [only] if only.is_pdf() => Self::Vision,
            _ => Self::BulkUpload,
        }
    }
}

/// Answer produced by [`FileDispatcher::ask_with_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAnswer {
    /// Raw answer text.
    pub answer: String,
    /// Model that produced the answer.
    pub model: String,
    /// Path that served the request.
    pub route: DispatchRoute,
}

/// Model identifiers used by the two dispatch paths.
#[derive(Debug, Clone)]
pub struct DispatchModels {
    /// Long-context chat model for uploaded files.
    pub long_context: String,
    /// Vision model for rasterized PDFs.
    pub vision: String,
}

/// Routes a question and its files to the provider, releasing every temporary and remote
/// resource it acquired before returning.
#[derive(Clone)]
pub struct FileDispatcher {
    chat: Arc<dyn ChatProvider>,
    store: Arc<dyn FileStore>,
    vision: Arc<dyn VisionProvider>,
    rasterizer: Arc<dyn PageRasterizer>,
    models: DispatchModels,
    scratch_root: PathBuf,
}

impl FileDispatcher {
    /// Assemble a dispatcher from provider capabilities and a rasterizer.
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        store: Arc<dyn FileStore>,
        vision: Arc<dyn VisionProvider>,
        rasterizer: Arc<dyn PageRasterizer>,
        models: DispatchModels,
    ) -> Self {
        Self {
            chat,
            store,
            vision,
            rasterizer,
            models,
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Place temporary PDFs and page images under `root` instead of the system temp directory.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Answer `question` using the uploaded `files`.
    ///
    /// Either one coherent answer or one error is returned; there is no partial success.
    pub async fn ask_with_files(
        &self,
        question: &str,
        files: &[UploadedFile],
    ) -> Result<DispatchAnswer, LlmError> {
        validate_question(question)?;
        if files.is_empty() || files.iter().any(|file| file.filename.trim().is_empty()) {
            return Err(LlmError::Validation("files 不能为空".into()));
        }

        let route = DispatchRoute::for_files(files);
        tracing::info!(files = files.len(), route = ?route, "Dispatching question with files");

        // Detached so uploaded handles are still released if the caller stops waiting.
        let dispatcher = self.clone();
        let question = question.to_string();
        let files = files.to_vec();
        tokio::spawn(async move { dispatcher.run(route, &question, &files).await }).await?
    }

    async fn run(
        &self,
        route: DispatchRoute,
        question: &str,
        files: &[UploadedFile],
    ) -> Result<DispatchAnswer, LlmError> {
        let (answer, model) = match route {
            DispatchRoute::Vision => (
                self.answer_from_pdf(question, &files[0]).await?,
                self.models.vision.clone(),
            ),
            DispatchRoute::BulkUpload => (
                self.answer_from_uploads(question, files).await?,
                self.models.long_context.clone(),
            ),
        };

        Ok(DispatchAnswer {
            answer,
            model,
            route,
        })
    }

    async fn answer_from_pdf(&self, question: &str, file: &UploadedFile) -> Result<String, LlmError> {
        let scratch = Scratch::create(&self.scratch_root)?;
        let result = self.render_and_ask(&scratch, question, file).await;
        scratch.release();
        if let Err(error) = &result {
            tracing::error!(filename = %file.filename, error = %error, "Vision path failed");
        }
        result
    }

    async fn render_and_ask(
        &self,
        scratch: &Scratch,
        question: &str,
        file: &UploadedFile,
    ) -> Result<String, LlmError> {
        tokio::fs::write(scratch.pdf.path(), &file.content).await?;

        let rasterizer = Arc::clone(&self.rasterizer);
        let pdf = scratch.pdf.path().to_path_buf();
        let out_dir = scratch.images.path().to_path_buf();
        let pages = tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, &out_dir)).await??;
        if pages.is_empty() {
            return Err(LlmError::NoPagesRendered);
        }

        tracing::debug!(pages = pages.len(), model = %self.models.vision, "Submitting page images");
        self.vision
            .vision_complete(&self.models.vision, &pages, question)
            .await
    }

    async fn answer_from_uploads(
        &self,
        question: &str,
        files: &[UploadedFile],
    ) -> Result<String, LlmError> {
        let mut handles = Vec::with_capacity(files.len());
        let result = self.upload_and_complete(question, files, &mut handles).await;
        self.release_handles(&handles).await;
        if let Err(error) = &result {
            tracing::error!(files = files.len(), error = %error, "Bulk upload path failed");
        }
        result
    }

    async fn upload_and_complete(
        &self,
        question: &str,
        files: &[UploadedFile],
        handles: &mut Vec<ProviderFileHandle>,
    ) -> Result<String, LlmError> {
        // Files are buffered in memory, so every upload reads from the start.
        for file in files {
            handles.push(self.store.upload_file(file).await?);
        }

        let references = handles
            .iter()
            .map(ProviderFileHandle::reference)
            .collect::<Vec<_>>()
            .join(",");
        let messages = vec![
            ChatMessage::system(ASSISTANT_PREAMBLE),
            ChatMessage::system(references),
            ChatMessage::user(question),
        ];
        let options = ChatOptions {
            model: self.models.long_context.clone(),
            enable_search: Some(false),
        };
        self.chat.complete(messages, options).await
    }

    /// Best-effort removal of every registered handle. Failures are logged, never surfaced.
    async fn release_handles(&self, handles: &[ProviderFileHandle]) {
        for handle in handles {
            if let Err(error) = self.store.delete_file(handle).await {
                tracing::warn!(file_id = %handle.0, error = %error, "Failed to delete provider file");
            }
        }
    }
}

/// Temporary PDF copy plus the directory receiving its page images.
struct Scratch {
    pdf: NamedTempFile,
    images: TempDir,
}

impl Scratch {
    fn create(root: &Path) -> Result<Self, LlmError> {
        let pdf = tempfile::Builder::new()
            .prefix("pxtools-upload-")
            .suffix(".pdf")
            .tempfile_in(root)?;
        let images = tempfile::Builder::new()
            .prefix("pxtools-pages-")
            .tempdir_in(root)?;
        Ok(Self { pdf, images })
    }

    /// Delete the PDF and the image directory, logging (not returning) failures.
    fn release(self) {
        if let Err(error) = self.pdf.close() {
            tracing::warn!(error = %error, "Failed to remove temporary PDF");
        }
        if let Err(error) = self.images.close() {
            tracing::warn!(error = %error, "Failed to remove page image directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::render::page_file_name;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct StubProvider {
        uploads: Mutex<Vec<String>>,
        deletes: Mutex<Vec<ProviderFileHandle>>,
        completions: Mutex<Vec<(Vec<ChatMessage>, ChatOptions)>>,
        vision_calls: Mutex<Vec<Vec<PathBuf>>>,
        fail_upload_at: Option<usize>,
        fail_completion: bool,
        fail_deletes: bool,
        vision_answer: Option<String>,
        completion_delay: Option<Duration>,
    }

    #[async_trait]
    impl ChatProvider for StubProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            options: ChatOptions,
        ) -> Result<String, LlmError> {
            self.completions.lock().await.push((messages, options));
            if let Some(delay) = self.completion_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_completion {
                return Err(LlmError::InvalidResponse("completion exploded".into()));
            }
            Ok("summary".into())
        }
    }

    #[async_trait]
    impl FileStore for StubProvider {
        async fn upload_file(&self, file: &UploadedFile) -> Result<ProviderFileHandle, LlmError> {
            let mut uploads = self.uploads.lock().await;
            if self.fail_upload_at == Some(uploads.len()) {
                return Err(LlmError::InvalidResponse("upload exploded".into()));
            }
            uploads.push(file.filename.clone());
            Ok(ProviderFileHandle(format!("file-{}", uploads.len())))
        }

        async fn delete_file(&self, handle: &ProviderFileHandle) -> Result<(), LlmError> {
            self.deletes.lock().await.push(handle.clone());
            if self.fail_deletes {
                return Err(LlmError::InvalidResponse("delete exploded".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VisionProvider for StubProvider {
        async fn vision_complete(
            &self,
            _model: &str,
            frames: &[PathBuf],
            _question: &str,
        ) -> Result<String, LlmError> {
            for frame in frames {
                assert!(frame.exists(), "frame must exist during the call");
            }
            self.vision_calls.lock().await.push(frames.to_vec());
            self.vision_answer.clone().ok_or(LlmError::EmptyResponse)
        }
    }

    /// Writes `pages` placeholder images and records the scratch locations it was given.
    struct FakeRasterizer {
        pages: usize,
        seen: StdMutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl FakeRasterizer {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    impl PageRasterizer for FakeRasterizer {
        fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, LlmError> {
            assert_eq!(std::fs::read(pdf)?, b"%PDF-1.7 fake");
            self.seen
                .lock()
                .unwrap()
                .push((pdf.to_path_buf(), out_dir.to_path_buf()));
            (0..self.pages)
                .map(|index| -> Result<PathBuf, LlmError> {
                    let path = out_dir.join(page_file_name(index));
                    std::fs::write(&path, format!("page {index}"))?;
                    Ok(path)
                })
                .collect()
        }
    }

    fn dispatcher(provider: &Arc<StubProvider>, rasterizer: &Arc<FakeRasterizer>) -> FileDispatcher {
        FileDispatcher::new(
            provider.clone(),
            provider.clone(),
            provider.clone(),
            rasterizer.clone(),
            DispatchModels {
                long_context: "qwen-long".into(),
                vision: "qwen-vl-max-latest".into(),
            },
        )
    }

    fn text(name: &str) -> UploadedFile {
        UploadedFile::new(name, format!("contents of {name}").into_bytes())
    }

    fn pdf(name: &str) -> UploadedFile {
        UploadedFile::new(name, b"%PDF-1.7 fake".to_vec())
    }

    #[test]
    fn routing_only_sends_a_lone_pdf_to_vision() {
        assert_eq!(DispatchRoute::for_files(&[pdf("a.pdf")]), DispatchRoute::Vision);
        assert_eq!(DispatchRoute::for_files(&[pdf("a.PDF")]), DispatchRoute::Vision);
        assert_eq!(DispatchRoute::for_files(&[text("a.txt")]), DispatchRoute::BulkUpload);
        assert_eq!(
            DispatchRoute::for_files(&[pdf("a.pdf"), pdf("b.pdf")]),
            DispatchRoute::BulkUpload
        );
    }

    #[tokio::test]
    async fn validation_happens_before_any_io() {
        let provider = Arc::new(StubProvider::default());
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let error = dispatcher
            .ask_with_files("  ", &[text("a.txt")])
            .await
            .expect_err("blank question");
        assert!(error.is_validation());

        let error = dispatcher
            .ask_with_files("what?", &[])
            .await
            .expect_err("no files");
        assert!(error.is_validation());

        let error = dispatcher
            .ask_with_files("what?", &[UploadedFile::new("", b"x".to_vec())])
            .await
            .expect_err("nameless file");
        assert!(error.is_validation());

        assert!(provider.uploads.lock().await.is_empty());
        assert!(provider.completions.lock().await.is_empty());
        assert!(rasterizer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_request_still_deletes_uploaded_files() {
        let provider = Arc::new(StubProvider {
            completion_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.ask_with_files("compare", &[text("a.txt"), text("b.txt")]),
        )
        .await;
        assert!(outcome.is_err(), "caller gives up before the completion returns");

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(provider.uploads.lock().await.len(), 2);
        assert_eq!(
            *provider.deletes.lock().await,
            [
                ProviderFileHandle("file-1".into()),
                ProviderFileHandle("file-2".into())
            ]
        );
    }

    #[tokio::test]
    async fn bulk_path_uploads_once_completes_once_and_deletes_all() {
        let provider = Arc::new(StubProvider::default());
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let answer = dispatcher
            .ask_with_files("compare", &[text("a.txt"), pdf("b.pdf")])
            .await
            .expect("answer");
        assert_eq!(answer.answer, "summary");
        assert_eq!(answer.model, "qwen-long");
        assert_eq!(answer.route, DispatchRoute::BulkUpload);

        assert_eq!(*provider.uploads.lock().await, ["a.txt", "b.pdf"]);
        let completions = provider.completions.lock().await;
        assert_eq!(completions.len(), 1);
        let (messages, options) = &completions[0];
        assert_eq!(messages[0], ChatMessage::system(ASSISTANT_PREAMBLE));
        assert_eq!(
            messages[1],
            ChatMessage::system("fileid://file-1,fileid://file-2")
        );
        assert_eq!(messages[2], ChatMessage::user("compare"));
        assert_eq!(options.model, "qwen-long");
        assert_eq!(options.enable_search, Some(false));

        assert_eq!(
            *provider.deletes.lock().await,
            [
                ProviderFileHandle("file-1".into()),
                ProviderFileHandle("file-2".into())
            ]
        );
        assert!(rasterizer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_non_pdf_takes_bulk_path() {
        let provider = Arc::new(StubProvider::default());
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let answer = dispatcher
            .ask_with_files("summarize", &[text("notes.md")])
            .await
            .expect("answer");
        assert_eq!(answer.route, DispatchRoute::BulkUpload);
        assert_eq!(provider.uploads.lock().await.len(), 1);
        assert_eq!(provider.deletes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn completion_failure_still_deletes_every_handle() {
        let provider = Arc::new(StubProvider {
            fail_completion: true,
            ..Default::default()
        });
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let error = dispatcher
            .ask_with_files("compare", &[text("a.txt"), text("b.txt"), text("c.txt")])
            .await
            .expect_err("completion fails");
        assert!(error.to_string().contains("completion exploded"));
        assert_eq!(provider.deletes.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn partial_upload_failure_releases_registered_handles() {
        let provider = Arc::new(StubProvider {
            fail_upload_at: Some(2),
            ..Default::default()
        });
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let error = dispatcher
            .ask_with_files("compare", &[text("a.txt"), text("b.txt"), text("c.txt")])
            .await
            .expect_err("third upload fails");
        assert!(error.to_string().contains("upload exploded"));
        assert!(provider.completions.lock().await.is_empty());
        assert_eq!(
            *provider.deletes.lock().await,
            [
                ProviderFileHandle("file-1".into()),
                ProviderFileHandle("file-2".into())
            ]
        );
    }

    #[tokio::test]
    async fn delete_failures_do_not_mask_the_answer() {
        let provider = Arc::new(StubProvider {
            fail_deletes: true,
            ..Default::default()
        });
        let rasterizer = Arc::new(FakeRasterizer::new(1));
        let dispatcher = dispatcher(&provider, &rasterizer);

        let answer = dispatcher
            .ask_with_files("compare", &[text("a.txt"), text("b.txt")])
            .await
            .expect("answer despite delete failures");
        assert_eq!(answer.answer, "summary");
        assert_eq!(provider.deletes.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn vision_path_sends_pages_in_order_and_cleans_up() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(StubProvider {
            vision_answer: Some("three pages".into()),
            ..Default::default()
        });
        let rasterizer = Arc::new(FakeRasterizer::new(3));
        let dispatcher = dispatcher(&provider, &rasterizer).with_scratch_root(scratch.path());

        let answer = dispatcher
            .ask_with_files("read it", &[pdf("scan.pdf")])
            .await
            .expect("answer");
        assert_eq!(answer.answer, "three pages");
        assert_eq!(answer.model, "qwen-vl-max-latest");
        assert_eq!(answer.route, DispatchRoute::Vision);

        let calls = provider.vision_calls.lock().await;
        assert_eq!(calls.len(), 1);
        let names: Vec<_> = calls[0]
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["page-0001.png", "page-0002.png", "page-0003.png"]);

        let (pdf_path, image_dir) = rasterizer.seen.lock().unwrap()[0].clone();
        assert!(!pdf_path.exists());
        assert!(!image_dir.exists());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
        assert!(provider.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn zero_page_pdf_fails_without_vision_call() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(StubProvider::default());
        let rasterizer = Arc::new(FakeRasterizer::new(0));
        let dispatcher = dispatcher(&provider, &rasterizer).with_scratch_root(scratch.path());

        let error = dispatcher
            .ask_with_files("read it", &[pdf("empty.pdf")])
            .await
            .expect_err("no pages");
        assert!(matches!(error, LlmError::NoPagesRendered));
        assert!(error.to_string().contains("conversion produced no output"));
        assert!(provider.vision_calls.lock().await.is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_vision_answer_fails_and_cleans_up() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(StubProvider::default());
        let rasterizer = Arc::new(FakeRasterizer::new(2));
        let dispatcher = dispatcher(&provider, &rasterizer).with_scratch_root(scratch.path());

        let error = dispatcher
            .ask_with_files("read it", &[pdf("scan.pdf")])
            .await
            .expect_err("empty response");
        assert!(error.to_string().contains("empty response"));
        assert_eq!(provider.vision_calls.lock().await.len(), 1);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
