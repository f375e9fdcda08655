// src/api/routes.rs
use actix_web::web;
use super::handlers;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(handlers::health_check))
            .route("/history", web::get().to(handlers::get_history))
            .route("/ws", web::get().to(handlers::ws_handler))
            .service(
                web::scope("/tasks")
                    .route("", web::get().to(handlers::list_tasks))
                    .route("/{id}", web::get().to(handlers::get_task))
                    .route("/{id}/inputs", web::post().to(handlers::count_inputs))
                    .route("/{id}/run", web::post().to(handlers::run_code))
                    .route("/{id}/check", web::post().to(handlers::check_code))
                    .route("/{id}/save", web::post().to(handlers::save_code))
                    .route("/{id}/activity", web::post().to(handlers::record_activity))
            )
    );
}
