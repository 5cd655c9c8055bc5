use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{captions::CaptionBatcher, fitting::FittingService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub fittings: Arc<FittingService>,
    pub captions: Arc<CaptionBatcher>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        fittings: FittingService,
        captions: CaptionBatcher,
        jwt_secret: &str,
    ) -> Self {
        Self {
            db,
            fittings: Arc::new(fittings),
            captions: Arc::new(captions),
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}
