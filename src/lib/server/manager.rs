use std::net::TcpListener;

use actix_web::{dev::Server, web, App, HttpServer};
use tracing::*;
use tracing_actix_web::TracingLogger;

use super::pages;
use crate::sink::prometheus_sink::SharedExposition;

/// Bind the metrics server to `server_address`.
///
/// The returned [`Server`] does nothing until it is awaited, and it can be
/// spawned on the running tokio runtime. Signals are left to the poller.
pub fn run(server_address: &str, exposition: SharedExposition) -> std::io::Result<Server> {
    let listener = TcpListener::bind(server_address)?;
    run_with_listener(listener, exposition)
}

pub fn run_with_listener(
    listener: TcpListener,
    exposition: SharedExposition,
) -> std::io::Result<Server> {
    let exposition = web::Data::new(exposition);

    info!("Serving metrics at http://{}/metrics", listener.local_addr()?);

    Ok(HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(exposition.clone())
            .configure(configure_routes)
    })
    .disable_signals()
    .workers(1)
    .listen(listener)?
    .run())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(pages::metrics))
        .route("/info", web::get().to(pages::info));
}
