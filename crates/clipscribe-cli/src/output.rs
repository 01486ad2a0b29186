//! Terminal output formatting

use std::path::Path;

use anyhow::Result;
use clipscribe_lib::core::annotations::{
    AnnotationResult, PipelineEvent, PipelineStage, StoredAnnotation,
};
use clipscribe_lib::core::cost::{
    EncodingParameters, OptimizationResult, ParameterValidation, Preset, RecommendedPresets,
    SizeMode, TokenEstimate,
};
use clipscribe_lib::core::Resolution;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_estimate(fps: f64, resolution: Resolution, estimate: &TokenEstimate) {
    println!("Parameters:       {} fps @ {}", fps, resolution);
    println!("Frames:           {}", estimate.frame_count);
    println!("Tokens per frame: {}", estimate.tokens_per_frame);
    println!("Total tokens:     {}", estimate.total_tokens);
    println!("Status:           {}", estimate.status.label());
}

fn describe_parameters(params: &EncodingParameters) -> String {
    match params.mode {
        SizeMode::FixedDimensions => format!("{} fps @ {}", params.fps, params.resolution),
        SizeMode::PixelBudget {
            min_pixels,
            max_pixels,
            total_pixels,
        } => {
            let total = total_pixels
                .map(|t| format!(", total {}", t))
                .unwrap_or_default();
            format!(
                "{} fps, pixels {}..{}{} (estimated at {})",
                params.fps, min_pixels, max_pixels, total, params.resolution
            )
        }
    }
}

pub fn print_optimization(title: &str, result: &OptimizationResult) {
    println!(
        "{:<10} {:<28} {:>7} tokens  {:<16} [{:?}]",
        title,
        describe_parameters(&result.parameters),
        result.estimate.total_tokens,
        result.estimate.status.label(),
        result.tier
    );
}

pub fn print_presets(presets: &RecommendedPresets) {
    for preset in Preset::ALL {
        print_optimization(&preset.to_string(), presets.get(preset));
    }
}

pub fn print_validation(validation: &ParameterValidation) {
    if validation.is_valid {
        println!("Valid ({} tokens)", validation.estimate.total_tokens);
    } else {
        println!("Invalid ({} tokens)", validation.estimate.total_tokens);
    }
    for error in &validation.errors {
        println!("  error:   {}", error);
    }
    for warning in &validation.warnings {
        println!("  warning: {}", warning);
    }
}

pub fn print_plan(video: &str, model: &str, params: &EncodingParameters, note: Option<&str>) {
    println!("Video:      {}", video);
    println!("Model:      {}", model);
    match note {
        Some(note) => println!("Parameters: {} ({})", describe_parameters(params), note),
        None => println!("Parameters: {}", describe_parameters(params)),
    }
}

pub fn print_event(event: &PipelineEvent) {
    match event.stage {
        PipelineStage::Failed | PipelineStage::Cancelled => {
            eprintln!("[{:>3}%] {}: {}", event.progress, event.stage.label(), event.message)
        }
        _ => println!("[{:>3}%] {}", event.progress, event.message),
    }
}

pub fn print_result(result: &AnnotationResult, preview_chars: usize) {
    println!();
    println!(
        "Done in {:.1}s: {} tokens used, ~{} frames",
        result.processing_time_seconds, result.used_tokens, result.estimated_frames
    );
    println!("--- Annotation ---");

    let preview: String = result.content.chars().take(preview_chars).collect();
    println!("{}", preview);
    if result.content.chars().count() > preview_chars {
        println!("...");
    }
}

pub fn print_history(dir: &Path, entries: &[StoredAnnotation]) {
    if entries.is_empty() {
        println!("No saved annotations in {}", dir.display());
        return;
    }
    for entry in entries {
        let record = &entry.record;
        println!(
            "{}  {:<32} {:<20} {:>6.1}s  {}",
            record.timestamp,
            record.video,
            record.model,
            record.processing_time,
            entry.path.display()
        );
    }
}
