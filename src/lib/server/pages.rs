use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::*;

use crate::{
    server::error::{Error, Result},
    sink::prometheus_sink::SharedExposition,
};

#[derive(Debug, Serialize)]
pub struct Info {
    /// Name of the program
    pub name: String,
    /// Version/tag
    pub version: String,
    pub authors: String,
    /// Write counter of the newest sample reported
    pub end_counter: Option<u64>,
    /// Time of the newest stats, RFC 3339
    pub updated: Option<String>,
}

pub async fn info(exposition: web::Data<SharedExposition>) -> Result<HttpResponse> {
    let exposition = exposition
        .lock()
        .map_err(|error| Error::Internal(error.to_string()))?;

    Ok(HttpResponse::Ok().json(Info {
        name: env!("CARGO_PKG_NAME").into(),
        version: env!("CARGO_PKG_VERSION").into(),
        authors: env!("CARGO_PKG_AUTHORS").into(),
        end_counter: exposition.end_counter,
        updated: exposition.updated.map(|time| time.to_rfc3339()),
    }))
}

pub async fn metrics(exposition: web::Data<SharedExposition>) -> Result<HttpResponse> {
    let exposition = exposition
        .lock()
        .map_err(|error| Error::Internal(error.to_string()))?;

    let Some(text) = exposition.text.clone() else {
        debug!("Metrics requested before the first stats were computed");
        return Err(Error::Unavailable(
            "No stats were computed yet".to_string(),
        ));
    };

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(text))
}
