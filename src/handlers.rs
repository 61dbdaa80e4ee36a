// src/handlers.rs
use crate::{AppState, errors::PageGenError, models::*};
use crate::services::orchestrator::GenerationRequest;
use crate::services::progress::ProgressEstimate;
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::BytesMut;
use futures_util::TryStreamExt;
use log::info;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub analysis: ProductAnalysis,
    #[serde(default)]
    pub upload_id: Option<Uuid>,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
    #[serde(default)]
    pub color_options: Vec<ColorOption>,
    #[serde(default)]
    pub mode: GenerationMode,
    #[serde(default)]
    pub model_settings: Option<ModelSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewBody {
    pub section: Section,
    pub product_name: String,
    #[serde(default)]
    pub product_visual_description: Option<String>,
    #[serde(default)]
    pub upload_id: Option<Uuid>,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
    #[serde(default)]
    pub color_options: Vec<ColorOption>,
    #[serde(default)]
    pub mode: GenerationMode,
    #[serde(default)]
    pub model_settings: Option<ModelSettings>,
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "detail-forge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn upload_references(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut references = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .get_filename()
            .ok_or_else(|| PageGenError::Validation("No filename provided".to_string()))?
            .to_string();

        let mut image_data = BytesMut::new();
        while let Some(chunk) = field.try_next().await? {
            image_data.extend_from_slice(&chunk);
        }

        let reference = data.image_processor.to_reference_image(&image_data)?;
        info!("Accepted reference image {} ({})", filename, reference.mime_type);
        references.push(reference);
    }

    if references.is_empty() {
        return Err(PageGenError::Validation("No images uploaded".to_string()).into());
    }

    let upload_id = Uuid::new_v4();
    data.store.put_reference_images(&upload_id, &references).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "uploadId": upload_id,
        "count": references.len()
    })))
}

pub async fn start_generation(
    data: web::Data<AppState>,
    body: web::Json<GenerateBody>,
) -> Result<HttpResponse, Error> {
    let body = body.into_inner();
    validate_sections(&body.analysis.sections)?;

    let reference_images =
        collect_references(&data, body.upload_id.as_ref(), body.reference_images).await?;

    let (run_id, total) = data
        .runs
        .start(GenerationRequest {
            analysis: body.analysis,
            reference_images,
            color_options: body.color_options,
            mode: body.mode,
            model_settings: body.model_settings,
        })
        .await?;

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "runId": run_id,
        "total": total
    })))
}

pub async fn get_run(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let run_id = path.into_inner();
    let record = data.runs.get_run(&run_id).await?;

    Ok(HttpResponse::Ok().json(&record))
}

pub async fn get_progress(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let run_id = path.into_inner();
    let progress = data
        .runs
        .progress(&run_id)
        .await
        .ok_or_else(|| PageGenError::NotFound(format!("no live run {}", run_id)))?;
    let estimate = ProgressEstimate::from_snapshot(&progress, chrono::Utc::now());

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "runId": run_id,
        "progress": progress,
        "estimate": estimate
    })))
}

pub async fn cancel_run(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let run_id = path.into_inner();
    if !data.runs.cancel(&run_id).await {
        return Err(PageGenError::NotFound(format!("no live run {}", run_id)).into());
    }

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "runId": run_id,
        "cancelled": true
    })))
}

pub async fn preview_section(
    data: web::Data<AppState>,
    body: web::Json<PreviewBody>,
) -> Result<HttpResponse, Error> {
    let body = body.into_inner();
    validate_sections(std::slice::from_ref(&body.section))?;

    let reference_images =
        collect_references(&data, body.upload_id.as_ref(), body.reference_images).await?;
    let analysis = ProductAnalysis {
        product_name: body.product_name,
        features: Vec::new(),
        marketing_copy: String::new(),
        product_visual_description: body.product_visual_description,
        detected_category: None,
        sections: Vec::new(),
    };

    let section = data
        .orchestrator
        .preview_section(
            body.section,
            &analysis,
            &reference_images,
            &body.color_options,
            body.mode,
            body.model_settings.as_ref(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(&section))
}

/// Uploaded references first, then any sent inline.
async fn collect_references(
    data: &AppState,
    upload_id: Option<&Uuid>,
    inline: Vec<ReferenceImage>,
) -> Result<Vec<ReferenceImage>, PageGenError> {
    let mut references = match upload_id {
        Some(id) => data.store.get_reference_images(id).await?,
        None => Vec::new(),
    };
    references.extend(inline.into_iter().map(normalize_reference));
    Ok(references)
}

/// Accepts inline references sent as full data URLs as well as bare base64.
fn normalize_reference(image: ReferenceImage) -> ReferenceImage {
    if image.data.starts_with("data:") {
        if let Some(parsed) = ReferenceImage::from_data_url(&image.data) {
            return parsed;
        }
    }
    image
}

fn validate_sections(sections: &[Section]) -> Result<(), PageGenError> {
    let mut seen = HashSet::new();
    for section in sections {
        if section.id.trim().is_empty() {
            return Err(PageGenError::Validation("Section id must not be empty".to_string()));
        }
        if !seen.insert(section.id.as_str()) {
            return Err(PageGenError::Validation(format!(
                "Duplicate section id: {}",
                section.id
            )));
        }
    }
    Ok(())
}
