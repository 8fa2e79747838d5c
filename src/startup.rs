use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;

use crate::configuration::{JwtSettings, MediaSettings};
use crate::logger::RequestLogger;
use crate::media_client::MediaClient;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    change_password, get_current_user, health_check, login, logout, refresh, register,
    update_avatar, update_cover_image, update_profile,
};

pub fn run(
    listener: TcpListener,
    connection: PgPool,
    jwt_config: JwtSettings,
    media_settings: MediaSettings,
    media_client: MediaClient,
) -> Result<Server, std::io::Error> {
    let connection = web::Data::new(connection);
    let jwt_config_data = web::Data::new(jwt_config.clone());
    let media_settings_data = web::Data::new(media_settings);
    let media_client_data = web::Data::new(media_client);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            // Shared state
            .app_data(connection.clone())
            .app_data(jwt_config_data.clone())
            .app_data(media_settings_data.clone())
            .app_data(media_client_data.clone())
            // Public routes (no authentication required)
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            // Protected routes (require a valid access token)
            .service(
                web::scope("")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("/auth/logout", web::post().to(logout))
                    .route("/auth/change-password", web::post().to(change_password))
                    .route("/auth/me", web::get().to(get_current_user))
                    .route("/users/me", web::patch().to(update_profile))
                    .route("/users/me/avatar", web::patch().to(update_avatar))
                    .route("/users/me/cover-image", web::patch().to(update_cover_image)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
