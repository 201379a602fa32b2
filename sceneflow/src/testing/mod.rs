//! Test doubles for the collaborator seams.
//!
//! Hand-written stubs with scripted failures and call recording. The
//! [`CallLog`] captures in-progress intervals so concurrency tests can
//! assert which calls overlapped in time.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::PipelineError;
use crate::services::{DescribeService, ImageEditService, PromptService};

/// Initializes tracing output for tests. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Encodes a solid-color PNG of the given size.
#[must_use]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([120, 80, 200, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode test png");
    out
}

/// One recorded call interval.
#[derive(Debug, Clone)]
pub struct CallSpan {
    /// Label of the call site, e.g. `describe`.
    pub label: String,
    /// When the call entered the collaborator.
    pub started: Instant,
    /// When the call returned.
    pub ended: Instant,
}

fn intersects(a: &CallSpan, b: &CallSpan) -> bool {
    a.started < b.ended && b.started < a.ended
}

/// Shared log of call intervals across stub collaborators.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    spans: Arc<Mutex<Vec<CallSpan>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed interval.
    pub fn record(&self, label: impl Into<String>, started: Instant, ended: Instant) {
        self.spans.lock().push(CallSpan {
            label: label.into(),
            started,
            ended,
        });
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn spans(&self) -> Vec<CallSpan> {
        self.spans.lock().clone()
    }

    /// Returns true if any two distinct spans with these labels overlap
    /// in time. Pass the same label twice to check self-overlap.
    #[must_use]
    pub fn overlapped(&self, label_a: &str, label_b: &str) -> bool {
        let spans = self.spans.lock();
        for (i, a) in spans.iter().enumerate() {
            if a.label != label_a {
                continue;
            }
            for (j, b) in spans.iter().enumerate() {
                if i != j && b.label == label_b && intersects(a, b) {
                    return true;
                }
            }
        }
        false
    }

    /// Number of spans recorded under `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.spans.lock().iter().filter(|s| s.label == label).count()
    }
}

/// Scripted behavior shared by the stub collaborators.
#[derive(Debug)]
struct StubBehavior {
    fail_first: usize,
    calls: AtomicUsize,
    delay: Duration,
    log: Option<(CallLog, &'static str)>,
}

impl StubBehavior {
    fn new() -> Self {
        Self {
            fail_first: 0,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            log: None,
        }
    }

    /// Runs the shared choreography: record, delay, fail if scripted.
    async fn step(&self) -> Result<(), PipelineError> {
        let started = Instant::now();
        let n = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = if n < self.fail_first {
            Err(PipelineError::Remote(format!("scripted failure {n}")))
        } else {
            Ok(())
        };

        if let Some((log, label)) = &self.log {
            log.record(*label, started, Instant::now());
        }
        outcome
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

macro_rules! stub_builders {
    () => {
        /// Fails the first `n` calls with a transient error.
        #[must_use]
        pub fn failing_first(mut self, n: usize) -> Self {
            self.behavior.fail_first = n;
            self
        }

        /// Fails every call with a transient error.
        #[must_use]
        pub fn always_failing(self) -> Self {
            self.failing_first(usize::MAX)
        }

        /// Sleeps for `delay` inside every call.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.behavior.delay = delay;
            self
        }

        /// Records call intervals into `log` under this stub's label.
        #[must_use]
        pub fn with_log(mut self, log: CallLog) -> Self {
            self.behavior.log = Some((log, Self::LABEL));
            self
        }

        /// Number of calls received so far.
        #[must_use]
        pub fn calls(&self) -> usize {
            self.behavior.calls()
        }
    };
}

/// Stub [`DescribeService`] returning a fixed description.
#[derive(Debug)]
pub struct StubDescriber {
    text: String,
    behavior: StubBehavior,
}

impl StubDescriber {
    const LABEL: &'static str = "describe";

    /// Creates a stub answering with `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            behavior: StubBehavior::new(),
        }
    }

    stub_builders!();
}

#[async_trait]
impl DescribeService for StubDescriber {
    async fn describe(&self, _image_url: &str) -> Result<String, PipelineError> {
        self.behavior.step().await?;
        Ok(self.text.clone())
    }
}

/// Stub [`PromptService`] returning a fixed prompt.
#[derive(Debug)]
pub struct StubPrompter {
    text: String,
    behavior: StubBehavior,
}

impl StubPrompter {
    const LABEL: &'static str = "prompt";

    /// Creates a stub answering with `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            behavior: StubBehavior::new(),
        }
    }

    stub_builders!();
}

#[async_trait]
impl PromptService for StubPrompter {
    async fn generate(&self, _description: &str) -> Result<String, PipelineError> {
        self.behavior.step().await?;
        Ok(self.text.clone())
    }
}

/// Stub [`ImageEditService`] returning fixed image bytes.
#[derive(Debug)]
pub struct StubEditor {
    image: Vec<u8>,
    behavior: StubBehavior,
}

impl StubEditor {
    const LABEL: &'static str = "edit";

    /// Creates a stub answering with `image` bytes.
    #[must_use]
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            behavior: StubBehavior::new(),
        }
    }

    /// Creates a stub answering with a small valid PNG.
    #[must_use]
    pub fn with_png(width: u32, height: u32) -> Self {
        Self::new(png_bytes(width, height))
    }

    stub_builders!();
}

#[async_trait]
impl ImageEditService for StubEditor {
    async fn edit(&self, _image_url: &str, _prompt: &str) -> Result<Vec<u8>, PipelineError> {
        self.behavior.step().await?;
        Ok(self.image.clone())
    }
}
