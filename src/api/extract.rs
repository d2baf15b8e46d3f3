//! Extractors whose rejections render as [`ApiError`] bodies

use axum::extract::{FromRequestParts, Path, Query};

use crate::api::ApiError;

/// [`Path`] with a JSON error body on malformed segments (e.g. an unknown scope)
#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// [`Query`] with a JSON error body on malformed parameters
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
