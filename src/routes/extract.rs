//! Extractors whose rejections answer with the `{error, code}` body.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::FittingError;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(FittingError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(FittingError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(FittingError))]
pub struct ApiQuery<T>(pub T);
