//! Success envelopes: `{"data": dict}` for one object, `{"data": [...], "meta": {"count": n}}`
//! for lists.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct Single {
    pub data: Value,
}

#[derive(Serialize)]
pub struct Listing {
    pub data: Vec<Value>,
    pub meta: ListingMeta,
}

#[derive(Serialize)]
pub struct ListingMeta {
    pub count: usize,
}

pub fn single(status: StatusCode, data: Value) -> Response {
    (status, Json(Single { data })).into_response()
}

pub fn listing(status: StatusCode, data: Vec<Value>) -> Response {
    let count = data.len();
    (status, Json(Listing { data, meta: ListingMeta { count } })).into_response()
}

/// Envelope mirroring the request body: one dict for an object body, a listing otherwise.
pub fn mirror(body: &Value, mut dicts: Vec<Value>, status: StatusCode) -> Response {
    if body.is_object() {
        single(status, dicts.pop().unwrap_or(Value::Null))
    } else {
        listing(status, dicts)
    }
}
