// src/services/orchestrator.rs
//! Walks a product analysis section by section and fills in images.
//!
//! Every section is classified once into a [`SectionPolicy`]; the policy
//! alone decides whether synthesis is called. Sections are processed in list
//! order with at most one synthesis call in flight, so the progress record
//! always names the unit currently being generated.

use crate::errors::PageGenError;
use crate::models::{
    ColorOption, GenerationMode, ModelSettings, ProductAnalysis, ReferenceImage, Section,
};
use crate::services::progress::ProgressTracker;
use crate::services::prompt::{build_collage_prompt, resolve_prompt, substitute_color_placeholders};
use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How a section is handled. Rules are checked in declaration order and the
/// first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionPolicy {
    /// `useFixedImage` with a payload: use the supplied image, never generate.
    FixedImage,
    /// Already carries a human-supplied original image.
    OriginalPassthrough,
    /// Already carries an image from the interactive preview step.
    PreviewPassthrough,
    /// One composite image for a `collage-*` layout.
    Collage,
    /// One image per empty slot.
    MultiSlot,
    /// One image from the section prompt.
    SingleImage,
    /// Nothing to generate.
    Passthrough,
}

impl SectionPolicy {
    pub fn classify(section: &Section) -> Self {
        if section.use_fixed_image && section.fixed_image().is_some() {
            SectionPolicy::FixedImage
        } else if section.is_original_image && section.has_image() {
            SectionPolicy::OriginalPassthrough
        } else if section.is_preview && section.has_image() {
            SectionPolicy::PreviewPassthrough
        } else if section.layout_type.is_collage() {
            SectionPolicy::Collage
        } else if section.slots().is_some() && !section.layout_type.is_text_only() {
            SectionPolicy::MultiSlot
        } else if section.prompt().is_some() && !section.layout_type.is_text_only() {
            SectionPolicy::SingleImage
        } else {
            SectionPolicy::Passthrough
        }
    }

    pub fn calls_synthesis(self) -> bool {
        matches!(
            self,
            SectionPolicy::Collage | SectionPolicy::MultiSlot | SectionPolicy::SingleImage
        )
    }
}

/// Whether a section counts toward `GenerationProgress::total`.
pub fn is_eligible(section: &Section) -> bool {
    if section.layout_type.is_text_only() {
        return false;
    }
    if section.use_fixed_image && section.fixed_image().is_some() {
        return false;
    }
    if section.is_original_image && section.has_image() {
        return false;
    }
    section.prompt().is_some() || section.slots().is_some() || section.layout_type.is_collage()
}

pub fn eligible_count(sections: &[Section]) -> usize {
    sections.iter().filter(|s| is_eligible(s)).count()
}

/// Input to one orchestration run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub analysis: ProductAnalysis,
    /// Uploaded product photos; the first one is the primary reference.
    pub reference_images: Vec<ReferenceImage>,
    pub color_options: Vec<ColorOption>,
    pub mode: GenerationMode,
    pub model_settings: Option<ModelSettings>,
}

/// A run that stopped early. `partial` keeps every section: those finished
/// before the failure carry their results, the rest are as submitted.
#[derive(Debug)]
pub struct RunFailure {
    pub error: PageGenError,
    pub partial: ProductAnalysis,
}

/// Handles shared between a run and its observers.
#[derive(Debug, Clone)]
pub struct RunControl {
    progress: ProgressTracker,
    cancel: CancellationToken,
    working: Arc<watch::Sender<Option<ProductAnalysis>>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (working, _rx) = watch::channel(None);
        Self {
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
            working: Arc::new(working),
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Working copy as of the last finished section.
    pub fn last_snapshot(&self) -> Option<ProductAnalysis> {
        self.working.borrow().clone()
    }

    fn publish(&self, analysis: &ProductAnalysis) {
        self.working.send_replace(Some(analysis.clone()));
    }
}

/// Per-run values every section handler needs.
struct SectionContext<'a> {
    subject: &'a str,
    colors: &'a [ColorOption],
    primary: Option<&'a ReferenceImage>,
    mode: GenerationMode,
    model_settings: Option<&'a ModelSettings>,
    cancel: &'a CancellationToken,
}

pub struct Orchestrator {
    synthesizer: Arc<dyn ImageSynthesizer>,
}

impl Orchestrator {
    pub fn new(synthesizer: Arc<dyn ImageSynthesizer>) -> Self {
        Self { synthesizer }
    }

    /// Generates images for every eligible section of `request.analysis`.
    ///
    /// Progress is reset to idle when the run ends, whether it succeeded or not.
    pub async fn run(
        &self,
        request: GenerationRequest,
        control: &RunControl,
    ) -> Result<ProductAnalysis, RunFailure> {
        let started = Instant::now();
        let total = eligible_count(&request.analysis.sections);
        control.progress.begin(total, Utc::now());
        info!(
            "Generation run started for '{}': {} sections, {} eligible, synthesizer={}",
            request.analysis.product_name,
            request.analysis.sections.len(),
            total,
            self.synthesizer.name()
        );

        let outcome = self.walk(&request, control).await;
        control.progress.reset();

        match &outcome {
            Ok(_) => info!(
                "Generation run finished in {}ms",
                started.elapsed().as_millis()
            ),
            Err(failure) => error!(
                "Generation run aborted after {}ms: {}",
                started.elapsed().as_millis(),
                failure.error
            ),
        }
        outcome
    }

    async fn walk(
        &self,
        request: &GenerationRequest,
        control: &RunControl,
    ) -> Result<ProductAnalysis, RunFailure> {
        let mut working = request.analysis.clone();
        control.publish(&working);

        let ctx = SectionContext {
            subject: request.analysis.subject(),
            colors: &request.color_options,
            primary: request.reference_images.first(),
            mode: request.mode,
            model_settings: request.model_settings.as_ref(),
            cancel: &control.cancel,
        };

        for index in 0..working.sections.len() {
            if control.cancel.is_cancelled() {
                warn!("Generation run cancelled before section {}", index);
                return Err(RunFailure {
                    error: PageGenError::Cancelled,
                    partial: working,
                });
            }

            let section = working.sections[index].clone();
            let counted = is_eligible(&section);
            let policy = SectionPolicy::classify(&section);
            let section_id = section.id.clone();

            if counted {
                control.progress.start_unit(&section.id, &section.title);
            }
            debug!("Section {} classified as {:?}", section_id, policy);

            match self.process_section(section, policy, &ctx).await {
                Ok(updated) => working.sections[index] = updated,
                Err(error) => {
                    error!("Section {} failed: {}", section_id, error);
                    return Err(RunFailure {
                        error,
                        partial: working,
                    });
                }
            }

            if counted {
                control.progress.complete_unit(&section_id);
            }
            control.publish(&working);
        }

        Ok(working)
    }

    /// Generates a single section immediately for the interactive preview.
    /// Images from an earlier preview are discarded first; the result is
    /// flagged so a later run reuses it instead of generating again.
    pub async fn preview_section(
        &self,
        mut section: Section,
        analysis: &ProductAnalysis,
        reference_images: &[ReferenceImage],
        color_options: &[ColorOption],
        mode: GenerationMode,
        model_settings: Option<&ModelSettings>,
    ) -> Result<Section, PageGenError> {
        if section.is_preview {
            section.is_preview = false;
            section.image_url = None;
            if let Some(slots) = section.image_slots.as_mut() {
                slots.iter_mut().for_each(|slot| slot.image_url = None);
            }
        }

        let policy = SectionPolicy::classify(&section);
        let cancel = CancellationToken::new();
        let ctx = SectionContext {
            subject: analysis.subject(),
            colors: color_options,
            primary: reference_images.first(),
            mode,
            model_settings,
            cancel: &cancel,
        };

        let mut section = self.process_section(section, policy, &ctx).await?;
        if policy.calls_synthesis() {
            section.is_preview = true;
        }
        Ok(section)
    }

    async fn process_section(
        &self,
        mut section: Section,
        policy: SectionPolicy,
        ctx: &SectionContext<'_>,
    ) -> Result<Section, PageGenError> {
        match policy {
            SectionPolicy::FixedImage => {
                section.image_url = section.fixed_image_data_url();
                section.is_original_image = true;
            }
            SectionPolicy::OriginalPassthrough | SectionPolicy::Passthrough => {}
            SectionPolicy::PreviewPassthrough => {
                section.is_preview = false;
            }
            SectionPolicy::Collage => {
                let extra = section
                    .prompt()
                    .map(|p| substitute_color_placeholders(p, ctx.colors));
                let subject = substitute_color_placeholders(ctx.subject, ctx.colors);
                let prompt =
                    build_collage_prompt(section.layout_type.as_code(), &subject, extra.as_deref());
                let image = self
                    .synthesize(prompt, ctx.primary.cloned(), ctx)
                    .await?;
                section.image_url = Some(image);
            }
            SectionPolicy::MultiSlot => {
                self.fill_slots(&mut section, ctx).await?;
            }
            SectionPolicy::SingleImage => {
                let raw = section.prompt().unwrap_or_default();
                let resolved = resolve_prompt(raw, ctx.colors, ctx.primary);
                let image = self
                    .synthesize(resolved.text, resolved.reference_image, ctx)
                    .await?;
                section.image_url = Some(image);
            }
        }
        Ok(section)
    }

    /// Slot failures are logged and leave the slot empty; only cancellation
    /// escapes.
    async fn fill_slots(
        &self,
        section: &mut Section,
        ctx: &SectionContext<'_>,
    ) -> Result<(), PageGenError> {
        let fallback_prompt = section.prompt().map(str::to_string);
        let Some(slots) = section.image_slots.as_mut() else {
            return Ok(());
        };

        for slot in slots.iter_mut() {
            if slot.has_image() {
                continue;
            }

            let raw = match slot.prompt.trim() {
                "" => fallback_prompt.as_deref(),
                prompt => Some(prompt),
            };
            let Some(raw) = raw else {
                warn!(
                    "Slot {} of section {} has no prompt, skipping",
                    slot.id, section.id
                );
                continue;
            };

            let resolved = resolve_prompt(raw, ctx.colors, ctx.primary);
            match self
                .synthesize(resolved.text, resolved.reference_image, ctx)
                .await
            {
                Ok(image) => slot.image_url = Some(image),
                Err(PageGenError::Cancelled) => return Err(PageGenError::Cancelled),
                Err(e) => warn!(
                    "Slot {} of section {} failed, leaving it empty: {}",
                    slot.id, section.id, e
                ),
            }
        }

        if let Some(first) = slots.first().and_then(|slot| slot.image_url.clone()) {
            section.image_url = Some(first);
        }
        Ok(())
    }

    async fn synthesize(
        &self,
        prompt: String,
        reference_image: Option<ReferenceImage>,
        ctx: &SectionContext<'_>,
    ) -> Result<String, PageGenError> {
        let request = SynthesisRequest {
            prompt,
            reference_image,
            mode: ctx.mode,
            model_settings: ctx.model_settings.cloned(),
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(PageGenError::Cancelled),
            result = self.synthesizer.synthesize(&request) => result,
        }
    }
}
