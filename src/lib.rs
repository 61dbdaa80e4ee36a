// src/lib.rs
//! AI image generation for e-commerce product detail pages.
//!
//! A [`models::ProductAnalysis`] describes a page as an ordered list of
//! sections. [`services::Orchestrator`] walks those sections, asks an
//! [`services::ImageSynthesizer`] for the images each one needs and reports
//! progress while doing so. The actix-web surface in [`handlers`] runs that
//! in the background and exposes progress, results and cancellation.

use actix_web::web;
use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;

use crate::config::Config;
use crate::services::{ImageProcessor, ImageSynthesizer, Orchestrator, RunManager, RunStore};

#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<RunManager>,
    pub store: Arc<dyn RunStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub image_processor: Arc<ImageProcessor>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn RunStore>,
        synthesizer: Arc<dyn ImageSynthesizer>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(synthesizer));
        let runs = Arc::new(RunManager::new(
            orchestrator.clone(),
            store.clone(),
            config.run_timeout(),
        ));

        Self {
            runs,
            store,
            orchestrator,
            image_processor: Arc::new(ImageProcessor::new(config.max_upload_dimension)),
        }
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/uploads", web::post().to(handlers::upload_references))
            .route("/generate", web::post().to(handlers::start_generation))
            .route("/preview", web::post().to(handlers::preview_section))
            .route("/runs/{run_id}", web::get().to(handlers::get_run))
            .route("/runs/{run_id}/progress", web::get().to(handlers::get_progress))
            .route("/runs/{run_id}/cancel", web::post().to(handlers::cancel_run)),
    )
    .route("/health", web::get().to(handlers::health_check));
}
