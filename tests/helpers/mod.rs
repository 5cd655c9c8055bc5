//! In-process harness: in-memory stores plus scripted generation collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use virtual_fitting::app_state::AppState;
use virtual_fitting::db::catalog::InMemoryCatalog;
use virtual_fitting::db::memory::InMemoryJobStore;
use virtual_fitting::db::store::JobStore;
use virtual_fitting::error::FittingError;
use virtual_fitting::models::fitting::{FittingAccepted, FittingItemRequest, FittingRequest};
use virtual_fitting::models::job::{Category, FittingJob};
use virtual_fitting::services::captions::CaptionBatcher;
use virtual_fitting::services::fitting::FittingService;
use virtual_fitting::services::generation::{Captioner, Compositor, GenerationError};
use virtual_fitting::services::images::{ImageData, ImageFetcher};
use virtual_fitting::services::pipeline::{FittingLimits, Pipeline};
use virtual_fitting::services::runner::JobRunner;
use virtual_fitting::services::storage::{InMemoryObjectStore, ObjectStore};

use crate::fixtures::{self, ALL_ITEMS, BROKEN, PHOTO_HEIGHT, PHOTO_KEY, PHOTO_WIDTH};

/// What the scripted compositor does on its next call.
pub enum Step {
    Succeed,
    Fail,
    Panic,
    /// Sleep, then succeed.
    Delay(Duration),
    /// Wait until notified, then succeed.
    Gate(Arc<Notify>),
}

/// One recorded compositing call.
#[derive(Debug, Clone)]
pub struct CompositeCall {
    pub category: Category,
    pub base: Vec<u8>,
    pub garment: Vec<u8>,
    pub canvas: Vec<u8>,
}

/// Compositor driven by a queue of steps. Unscripted calls succeed.
///
/// The output is the base bytes followed by the category name, so each
/// call's base shows exactly which earlier steps fed into it.
#[derive(Default)]
pub struct ScriptedCompositor {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<CompositeCall>>,
}

impl ScriptedCompositor {
    pub fn script(&self, steps: Vec<Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn calls(&self) -> Vec<CompositeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compositor for ScriptedCompositor {
    async fn composite(
        &self,
        base: &ImageData,
        garment: &ImageData,
        category: Category,
        canvas: &ImageData,
    ) -> Result<ImageData, GenerationError> {
        self.calls.lock().unwrap().push(CompositeCall {
            category,
            base: base.bytes.clone(),
            garment: garment.bytes.clone(),
            canvas: canvas.bytes.clone(),
        });

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => {}
            Step::Fail => return Err(GenerationError::NoImage),
            Step::Panic => panic!("compositor crashed on {}", category),
            Step::Delay(duration) => tokio::time::sleep(duration).await,
            Step::Gate(gate) => gate.notified().await,
        }

        let mut bytes = base.bytes.clone();
        bytes.extend_from_slice(category.as_str().as_bytes());
        Ok(ImageData::new(bytes, "image/png"))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CaptionMode {
    Reply(&'static str),
    Fail,
    Delay(Duration),
}

pub struct ScriptedCaptioner {
    mode: Mutex<CaptionMode>,
    calls: Mutex<usize>,
}

impl ScriptedCaptioner {
    pub fn new(mode: CaptionMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(0),
        }
    }

    pub fn set_mode(&self, mode: CaptionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Captioner for ScriptedCaptioner {
    async fn caption(&self, _image: &ImageData) -> Result<String, GenerationError> {
        *self.calls.lock().unwrap() += 1;
        let mode = *self.mode.lock().unwrap();
        match mode {
            CaptionMode::Reply(text) => Ok(text.to_string()),
            CaptionMode::Fail => Err(GenerationError::NoText),
            CaptionMode::Delay(duration) => {
                tokio::time::sleep(duration).await;
                Ok("Worth the wait".to_string())
            }
        }
    }
}

pub const CAPTION: &str = "Clean lines, good for the office";

/// Everything a test needs, wired the way `main` wires production.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub objects: Arc<InMemoryObjectStore>,
    pub compositor: Arc<ScriptedCompositor>,
    pub captioner: Arc<ScriptedCaptioner>,
    pub pipeline: Arc<Pipeline>,
    pub runner: Arc<JobRunner>,
    pub service: FittingService,
    pub captions: CaptionBatcher,
    pub owner: Uuid,
    pub limits: FittingLimits,
}

pub const RESULT_BASE_URL: &str = "https://cdn.test";

impl Harness {
    pub async fn new() -> Self {
        Self::with_limits(FittingLimits::default()).await
    }

    pub async fn with_limits(limits: FittingLimits) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let compositor = Arc::new(ScriptedCompositor::default());
        let captioner = Arc::new(ScriptedCaptioner::new(CaptionMode::Reply(CAPTION)));
        let owner = Uuid::new_v4();

        objects
            .put(PHOTO_KEY, &fixtures::png(PHOTO_WIDTH, PHOTO_HEIGHT), "image/png")
            .await
            .unwrap();
        catalog.set_photo(owner, PHOTO_KEY);

        for item in ALL_ITEMS {
            catalog.add_item(item.item_id, item.image_key);
            catalog.name_item(item.item_id, item.name());
            if item.item_id != BROKEN.item_id {
                objects
                    .put(item.image_key, &fixtures::png(8, 8), "image/png")
                    .await
                    .unwrap();
            }
        }

        let images = Arc::new(ImageFetcher::new(objects.clone(), Duration::from_secs(5)).unwrap());
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            images.clone(),
            compositor.clone(),
            captioner.clone(),
            objects.clone(),
            limits,
        ));
        let runner = Arc::new(JobRunner::new(pipeline.clone()));
        let service = FittingService::new(
            store.clone(),
            catalog.clone(),
            objects.clone(),
            runner.clone(),
            limits,
            RESULT_BASE_URL.to_string(),
        );
        let captions = CaptionBatcher::new(images, captioner.clone(), 4);

        Self {
            store,
            catalog,
            objects,
            compositor,
            captioner,
            pipeline,
            runner,
            service,
            captions,
            owner,
            limits,
        }
    }

    pub async fn submit(&self, items: &[fixtures::ItemFixture]) -> Result<FittingAccepted, FittingError> {
        self.submit_as(self.owner, items).await
    }

    pub async fn submit_as(
        &self,
        owner: Uuid,
        items: &[fixtures::ItemFixture],
    ) -> Result<FittingAccepted, FittingError> {
        self.service.start_fitting(owner, &request(items)).await
    }

    pub async fn job(&self, job_id: Uuid) -> FittingJob {
        self.store.get_job(job_id).await.unwrap().expect("job exists")
    }

    /// Poll the store until the job leaves `processing`.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> FittingJob {
        for _ in 0..20_000 {
            let job = self.job(job_id).await;
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    /// Poll until the given step is recorded as in flight.
    pub async fn wait_for_step(&self, job_id: Uuid, step: Category) {
        for _ in 0..20_000 {
            if self.compositor.calls().iter().any(|c| c.category == step)
                && self.job(job_id).await.current_step == Some(step)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never started step {}", job_id, step);
    }

    /// Wait for every dispatched run, including ones left behind by a timeout.
    pub async fn drain(&self) {
        self.runner.shutdown(Duration::from_secs(3_600)).await;
    }

    /// Router state sharing this harness's stores and runner. The database
    /// pool is lazy and never connects.
    pub fn app_state(&self, jwt_secret: &str) -> AppState {
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/virtual_fitting_test")
            .unwrap();
        let images = Arc::new(ImageFetcher::new(self.objects.clone(), Duration::from_secs(5)).unwrap());
        let service = FittingService::new(
            self.store.clone(),
            self.catalog.clone(),
            self.objects.clone(),
            self.runner.clone(),
            self.limits,
            RESULT_BASE_URL.to_string(),
        );
        let captions = CaptionBatcher::new(images, self.captioner.clone(), 4);
        AppState::new(db, service, captions, jwt_secret)
    }

    /// Number of fitting results written to object storage.
    pub fn stored_results(&self) -> usize {
        // Seeded objects: the photo plus every item except the broken one.
        self.objects.len() - ALL_ITEMS.len()
    }
}

pub fn request(items: &[fixtures::ItemFixture]) -> FittingRequest {
    FittingRequest {
        items: items
            .iter()
            .map(|item| FittingItemRequest {
                item_id: item.item_id,
                category: item.category.to_string(),
            })
            .collect(),
    }
}
