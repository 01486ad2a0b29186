//! Subcommand handlers

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clipscribe_lib::core::annotations::store::timestamp_now;
use clipscribe_lib::core::annotations::{
    AnnotationPipeline, AnnotationRecord, AnnotationResult, AnnotationStore, AttemptInput,
    ClassifiedError, DashScopeProvider, PromptLibrary, VideoRef, VisionProvider,
};
use clipscribe_lib::core::cost::EncodingParameters;
use clipscribe_lib::core::settings::{AnnotatorSettings, SettingsManager};
use clipscribe_lib::core::Resolution;

use crate::output;
use crate::AnnotateArgs;

/// Frame side used when only the frame rate is given
const DEFAULT_SIDE: u32 = 448;

/// Characters of the annotation echoed to the terminal
const PREVIEW_CHARS: usize = 500;

// =============================================================================
// Context
// =============================================================================

/// Shared state for all subcommands
pub struct Context {
    pub manager: SettingsManager,
    pub json: bool,
}

impl Context {
    pub fn new(settings_path: Option<PathBuf>, json: bool) -> Self {
        let manager = match settings_path {
            Some(path) => SettingsManager::with_path(path),
            None => SettingsManager::default_location(),
        };
        Self { manager, json }
    }

    /// Stored settings with the environment applied
    pub fn settings(&self) -> AnnotatorSettings {
        let mut settings = self.manager.load();
        settings.apply_env();
        settings
    }

    fn store(&self, settings: &AnnotatorSettings) -> AnnotationStore {
        AnnotationStore::new(settings.outputs_dir_in(&self.manager.data_dir()))
    }
}

// =============================================================================
// Argument Parsers
// =============================================================================

/// `--duration` in seconds; finite and non-negative
pub fn parse_duration(value: &str) -> Result<f64, String> {
    let duration = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid duration: '{}'", value))?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(format!(
            "Duration must be a non-negative number of seconds, got '{}'",
            value
        ));
    }
    Ok(duration)
}

// =============================================================================
// Pixel Budget
// =============================================================================

/// `--pixel-budget MIN:MAX[:TOTAL]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBudget {
    pub min_pixels: u32,
    pub max_pixels: u32,
    pub total_pixels: Option<u32>,
}

pub fn parse_pixel_budget(value: &str) -> Result<PixelBudget, String> {
    let parts: Vec<&str> = value.split(':').map(str::trim).collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(format!("Expected MIN:MAX[:TOTAL], got '{}'", value));
    }

    let parse = |part: &str| {
        part.parse::<u32>()
            .map_err(|_| format!("Invalid pixel count: '{}'", part))
    };
    let min_pixels = parse(parts[0])?;
    let max_pixels = parse(parts[1])?;
    let total_pixels = parts.get(2).map(|p| parse(p)).transpose()?;

    if min_pixels == 0 || min_pixels > max_pixels {
        return Err("Pixel budget needs 0 < MIN <= MAX".to_string());
    }
    Ok(PixelBudget {
        min_pixels,
        max_pixels,
        total_pixels,
    })
}

// =============================================================================
// Cost Commands
// =============================================================================

pub fn estimate(ctx: &Context, duration: f64, fps: f64, resolution: Resolution) -> Result<()> {
    let model = ctx.settings().cost_model;
    let estimate = model.estimate(duration, fps, resolution);
    if ctx.json {
        return output::print_json(&estimate);
    }
    output::print_estimate(fps, resolution, &estimate);
    Ok(())
}

pub fn optimize(ctx: &Context, duration: f64, target: u64, prefer_quality: bool) -> Result<()> {
    let model = ctx.settings().cost_model;
    let result = model.search(duration, target, prefer_quality);
    if ctx.json {
        return output::print_json(&result);
    }
    output::print_optimization("Best match", &result);
    Ok(())
}

pub fn presets(ctx: &Context, duration: f64) -> Result<()> {
    let model = ctx.settings().cost_model;
    let presets = model.recommended_presets(duration);
    if ctx.json {
        return output::print_json(&presets);
    }
    output::print_presets(&presets);
    Ok(())
}

pub fn validate(ctx: &Context, duration: f64, fps: f64, resolution: Resolution) -> Result<()> {
    let model = ctx.settings().cost_model;
    let validation = model.validate(fps, resolution, duration);
    if ctx.json {
        output::print_json(&validation)?;
    } else {
        output::print_validation(&validation);
    }
    if !validation.is_valid {
        bail!("Parameters violate provider limits");
    }
    Ok(())
}

// =============================================================================
// Annotate
// =============================================================================

/// Picks encoding parameters from a preset or explicit flags
pub fn resolve_parameters(
    settings: &AnnotatorSettings,
    args: &AnnotateArgs,
) -> (EncodingParameters, Option<String>) {
    let (mut params, note) = match (args.preset, args.fps, args.resolution) {
        (Some(preset), _, _) => {
            let result = settings.cost_model.search(
                args.duration,
                preset.target_tokens(),
                preset.prefer_quality(),
            );
            (result.parameters, Some(format!("{} preset", preset)))
        }
        (None, None, None) => {
            let presets = settings.cost_model.recommended_presets(args.duration);
            (
                presets.balanced.parameters,
                Some("balanced preset (no parameters given)".to_string()),
            )
        }
        (None, fps, resolution) => (
            EncodingParameters::fixed(
                fps.unwrap_or(settings.fps),
                resolution.unwrap_or(Resolution::square(DEFAULT_SIDE)),
            ),
            None,
        ),
    };

    if let Some(budget) = args.pixel_budget {
        params = EncodingParameters::pixel_budget(
            params.fps,
            params.resolution,
            budget.min_pixels,
            budget.max_pixels,
            budget.total_pixels,
        );
    }
    (params, note)
}

pub async fn annotate(ctx: &Context, args: AnnotateArgs) -> Result<()> {
    let mut settings = ctx.settings();
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if let Some(temperature) = args.temperature {
        settings.temperature = temperature;
    }
    settings.normalize();

    let data_dir = ctx.manager.data_dir();
    let prompts = PromptLibrary::new(settings.prompts_dir_in(&data_dir));
    let prompt = prompts
        .load(args.prompt.as_deref())
        .context("Failed to load prompt")?;

    let (params, note) = resolve_parameters(&settings, &args);
    let video = VideoRef::parse(&args.video);
    let input = AttemptInput::new(
        video.clone(),
        args.duration,
        params.clone(),
        &prompt,
        &settings.model,
    );

    if !ctx.json {
        output::print_plan(&args.video, &settings.model, &params, note.as_deref());
    }

    let provider = Arc::new(
        DashScopeProvider::new(settings.dashscope_config())
            .context("Failed to create DashScope client")?,
    );
    if !provider.is_available() {
        bail!(
            "The {} provider is not included in this build (enable the 'ai-providers' feature)",
            provider.name()
        );
    }
    let pipeline = Arc::new(AnnotationPipeline::new(settings.pipeline_config(), provider));

    if let Some(mut events) = pipeline.take_event_receiver() {
        let quiet = ctx.json;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !quiet {
                    output::print_event(&event);
                }
            }
        });
    }

    let cancel_handle = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                if pipeline.cancel() {
                    tracing::warn!("Cancellation requested");
                } else {
                    // Nothing running (e.g. at the retry prompt)
                    std::process::exit(130);
                }
            }
        })
    };

    let mut outcome = pipeline.start(input).await;
    while let Err(error) = &outcome {
        if !error.is_retryable() || ctx.json || !confirm_retry(error).await? {
            break;
        }
        outcome = pipeline.retry().await;
    }
    cancel_handle.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(ClassifiedError::Cancelled) => bail!("Annotation cancelled"),
        Err(error) => return Err(error.into()),
    };

    let video_name = video.map(|v| v.display_name()).unwrap_or_default();
    let record = AnnotationRecord::new(&video_name, &params, &result, &timestamp_now());
    let saved = if args.no_save {
        None
    } else {
        Some(
            ctx.store(&settings)
                .save(&record)
                .context("Failed to save annotation")?,
        )
    };

    if ctx.json {
        return output::print_json(&record);
    }
    print_summary(&result, saved.as_ref().map(|s| (&s.json_path, &s.txt_path)));
    Ok(())
}

fn print_summary(result: &AnnotationResult, saved: Option<(&PathBuf, &PathBuf)>) {
    output::print_result(result, PREVIEW_CHARS);
    if let Some((json_path, txt_path)) = saved {
        println!("Saved:");
        println!("  JSON: {}", json_path.display());
        println!("  TXT:  {}", txt_path.display());
    }
}

/// Asks the operator whether to retry; never retries without a terminal
async fn confirm_retry(error: &ClassifiedError) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }

    eprint!("{}\nRetry with the same parameters? [y/N] ", error);
    std::io::stderr().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await??;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// =============================================================================
// History / Models
// =============================================================================

pub fn history(ctx: &Context, limit: usize) -> Result<()> {
    let settings = ctx.settings();
    let store = ctx.store(&settings);
    let entries: Vec<_> = store.list()?.into_iter().take(limit).collect();

    if ctx.json {
        let records: Vec<&AnnotationRecord> = entries.iter().map(|e| &e.record).collect();
        return output::print_json(&records);
    }
    output::print_history(store.outputs_dir(), &entries);
    Ok(())
}

pub fn models(ctx: &Context) -> Result<()> {
    let models = DashScopeProvider::available_models();
    if ctx.json {
        return output::print_json(&models);
    }
    for model in models {
        let marker = if model == DashScopeProvider::DEFAULT_MODEL {
            " (default)"
        } else {
            ""
        };
        println!("{}{}", model, marker);
    }
    Ok(())
}
