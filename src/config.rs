//! Configuration types for question extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Setters clamp obviously-wrong values;
//! [`ExtractionConfigBuilder::build`] rejects the ones that cannot be clamped.

use crate::error::ExtractError;
use crate::pipeline::llm::VisionModel;
use crate::pipeline::render::PageRenderer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Largest accepted per-page retry budget.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for one or more extraction runs.
///
/// # Example
/// ```rust
/// use edgequake_examcrop::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(300)
///     .questions_per_page(4)
///     .storage_root("/srv/exam/questions")
///     .build()
///     .unwrap();
/// assert_eq!(config.questions_per_page, 4);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering density in DPI. Range: 72–600. Default: 300.
    ///
    /// Answer options are often set in small type; below ~200 DPI the cropped
    /// snippets stop being legible once shown at their natural size.
    pub dpi: u32,

    /// Upper bound on the rendered page width in pixels. Default: 2480.
    pub max_width_px: u32,

    /// Upper bound on the rendered page height in pixels. Default: 3508.
    ///
    /// Together with `max_width_px` this is A4 at 300 DPI, which keeps
    /// oversized pages from allocating poster-sized bitmaps.
    pub max_height_px: u32,

    /// Number of equal strips produced by the fallback detector. Default: 5.
    pub questions_per_page: u32,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision model. Takes precedence over every provider
    /// setting; used by tests and by hosts with their own inference client.
    pub vision: Option<Arc<dyn VisionModel>>,

    /// Pre-constructed page renderer. Defaults to pdfium.
    pub renderer: Option<Arc<dyn PageRenderer>>,

    /// Sampling temperature for the detection call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page on a failed or timed-out vision call. Range: 0–10.
    /// Default: 2.
    ///
    /// Unparseable or empty replies are not retried; they go straight to
    /// the fallback detector.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt and capped at
    /// 30s. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the vision model in seconds. Default: 60.
    ///
    /// A timeout counts as a failed attempt, never as a fatal error.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom detection instruction. If None, uses the built-in prompt.
    pub detection_prompt: Option<String>,

    /// Directory holding one sub-directory of question images per group.
    /// Default: `questions`.
    pub storage_root: PathBuf,

    /// Public path prefix for question image URLs. Default: `/questions`.
    pub url_prefix: String,

    /// Parent directory for per-run scratch areas. Default: system temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Delete the source PDF after a successful run. Default: true.
    ///
    /// Failed runs always keep the source so it can be inspected or retried.
    pub remove_source_on_success: bool,

    /// Receives per-page events while a run is in progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_width_px: 2480,
            max_height_px: 3508,
            questions_per_page: 5,
            model: None,
            provider_name: None,
            provider: None,
            vision: None,
            renderer: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            password: None,
            detection_prompt: None,
            storage_root: PathBuf::from("questions"),
            url_prefix: "/questions".to_string(),
            scratch_dir: None,
            remove_source_on_success: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_width_px", &self.max_width_px)
            .field("max_height_px", &self.max_height_px)
            .field("questions_per_page", &self.questions_per_page)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("vision", &self.vision.as_ref().map(|_| "<dyn VisionModel>"))
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn PageRenderer>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("storage_root", &self.storage_root)
            .field("url_prefix", &self.url_prefix)
            .field("remove_source_on_success", &self.remove_source_on_success)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_width_px(mut self, px: u32) -> Self {
        self.config.max_width_px = px.max(100);
        self
    }

    pub fn max_height_px(mut self, px: u32) -> Self {
        self.config.max_height_px = px.max(100);
        self
    }

    pub fn questions_per_page(mut self, n: u32) -> Self {
        self.config.questions_per_page = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision(mut self, vision: Arc<dyn VisionModel>) -> Self {
        self.config.vision = Some(vision);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    /// Clamped to [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn detection_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.detection_prompt = Some(prompt.into());
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.url_prefix = prefix.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn remove_source_on_success(mut self, v: bool) -> Self {
        self.config.remove_source_on_success = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.questions_per_page == 0 {
            return Err(ExtractError::InvalidConfig(
                "questions_per_page must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.storage_root.as_os_str().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "storage_root must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
