use std::net::TcpListener;

use clipstream::configuration::{get_configuration, DatabaseSettings};
use clipstream::media_client::MediaClient;
use clipstream::startup::run;
use serde_json::{json, Value};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub media_server: MockServer,
}

async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    let connection_pool = configure_database(&configuration.database).await;

    let media_server = MockServer::start().await;
    mount_upload_success(&media_server, "https://media.test/assets/uploaded.png").await;

    configuration.media.base_url = media_server.uri();
    configuration.media.staging_dir = std::env::temp_dir()
        .join(format!("clipstream-staging-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();

    let media_client = MediaClient::new(
        configuration.media.base_url.clone(),
        configuration.media.api_key.clone(),
        reqwest::Client::new(),
    );

    let server = run(
        listener,
        connection_pool.clone(),
        configuration.jwt.clone(),
        configuration.media.clone(),
        media_client,
    )
    .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        db_pool: connection_pool,
        media_server,
    }
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn mount_upload_success(media_server: &MockServer, url: &str) {
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": url,
            "public_id": "uploaded"
        })))
        .mount(media_server)
        .await;
}

/// Registers and logs in an account, returning its access token.
async fn register_and_login(app: &TestApp, username: &str, email: &str) -> String {
    let form = reqwest::multipart::Form::new()
        .text("full_name", "John Doe")
        .text("username", username.to_string())
        .text("email", email.to_string())
        .text("password", "SecurePass123")
        .part(
            "avatar",
            reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G']).file_name("avatar.png"),
        );

    let client = reqwest::Client::new();
    let register = client
        .post(&format!("{}/auth/register", &app.address))
        .multipart(form)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, register.status().as_u16());

    let login = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "username": username, "password": "SecurePass123" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, login.status().as_u16());

    let body: Value = login.json().await.expect("Failed to parse response");
    body["data"]["access_token"].as_str().unwrap().to_string()
}

// --- Current account ---

#[tokio::test]
async fn get_me_returns_the_sanitized_account() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/auth/me", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["username"], "johndoe");
    assert_eq!(body["data"]["email"], "john@example.com");
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn get_me_accepts_the_access_token_cookie() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/auth/me", &app.address))
        .header("Cookie", format!("accessToken={}", access_token))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn protected_routes_return_401_without_token() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .get(&format!("{}/auth/me", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["code"], 401);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn protected_routes_return_401_with_invalid_token() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .get(&format!("{}/auth/me", &app.address))
        .header("Authorization", "Bearer invalid.token.here")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
}

// --- Password change ---

#[tokio::test]
async fn change_password_overwrites_the_stored_hash() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/auth/change-password", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .json(&json!({ "old_password": "SecurePass123", "new_password": "EvenSaferPass456" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    // Old password no longer works
    let old_login = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "username": "johndoe", "password": "SecurePass123" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, old_login.status().as_u16());

    // New password does
    let new_login = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "username": "johndoe", "password": "EvenSaferPass456" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, new_login.status().as_u16());
}

#[tokio::test]
async fn change_password_rejects_a_wrong_old_password() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/change-password", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .json(&json!({ "old_password": "WrongPass123", "new_password": "EvenSaferPass456" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn change_password_rejects_a_weak_new_password() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/change-password", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .json(&json!({ "old_password": "SecurePass123", "new_password": "weak" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
}

// --- Profile updates ---

#[tokio::test]
async fn update_profile_overwrites_name_and_email() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .patch(&format!("{}/users/me", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .json(&json!({ "full_name": "Johnny Doe", "email": "johnny@example.com" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["full_name"], "Johnny Doe");
    assert_eq!(body["data"]["email"], "johnny@example.com");

    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT full_name, email FROM users WHERE username = 'johndoe'",
    )
    .fetch_one(&app.db_pool)
    .await
    .expect("Failed to fetch updated user");
    assert_eq!(row.0, "Johnny Doe");
    assert_eq!(row.1, "johnny@example.com");
}

#[tokio::test]
async fn update_profile_rejects_a_taken_email() {
    let app = spawn_app().await;
    register_and_login(&app, "janedoe", "jane@example.com").await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let response = reqwest::Client::new()
        .patch(&format!("{}/users/me", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .json(&json!({ "full_name": "John Doe", "email": "jane@example.com" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(409, response.status().as_u16());
}

#[tokio::test]
async fn update_profile_rejects_invalid_fields() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let cases = vec![
        (json!({ "full_name": "", "email": "john@example.com" }), "empty name"),
        (json!({ "full_name": "John", "email": "notanemail" }), "bad email"),
    ];

    for (body, reason) in cases {
        let response = reqwest::Client::new()
            .patch(&format!("{}/users/me", &app.address))
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.");

        assert_eq!(400, response.status().as_u16(), "Should reject update: {}", reason);
    }
}

// --- Avatar and cover image updates ---

#[tokio::test]
async fn update_avatar_overwrites_the_stored_url() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    // The media service now stores to a different URL
    app.media_server.reset().await;
    mount_upload_success(&app.media_server, "https://media.test/assets/new-avatar.png").await;

    let form = reqwest::multipart::Form::new().part(
        "avatar",
        reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G']).file_name("new.png"),
    );

    let response = reqwest::Client::new()
        .patch(&format!("{}/users/me/avatar", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .multipart(form)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["avatar_url"], "https://media.test/assets/new-avatar.png");

    let stored = sqlx::query_scalar::<_, String>(
        "SELECT avatar_url FROM users WHERE username = 'johndoe'",
    )
    .fetch_one(&app.db_pool)
    .await
    .expect("Failed to fetch avatar url");
    assert_eq!(stored, "https://media.test/assets/new-avatar.png");
}

#[tokio::test]
async fn update_avatar_without_file_returns_400() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    let form = reqwest::multipart::Form::new().text("note", "no file here");

    let response = reqwest::Client::new()
        .patch(&format!("{}/users/me/avatar", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .multipart(form)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn failed_avatar_upload_leaves_the_stored_url_untouched() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    app.media_server.reset().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.media_server)
        .await;

    let form = reqwest::multipart::Form::new().part(
        "avatar",
        reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G']).file_name("new.png"),
    );

    let response = reqwest::Client::new()
        .patch(&format!("{}/users/me/avatar", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .multipart(form)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());

    let stored = sqlx::query_scalar::<_, String>(
        "SELECT avatar_url FROM users WHERE username = 'johndoe'",
    )
    .fetch_one(&app.db_pool)
    .await
    .expect("Failed to fetch avatar url");
    assert_eq!(stored, "https://media.test/assets/uploaded.png");
}

#[tokio::test]
async fn update_cover_image_sets_the_optional_column() {
    let app = spawn_app().await;
    let access_token = register_and_login(&app, "johndoe", "john@example.com").await;

    app.media_server.reset().await;
    mount_upload_success(&app.media_server, "https://media.test/assets/cover.png").await;

    let form = reqwest::multipart::Form::new().part(
        "cover_image",
        reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G']).file_name("cover.png"),
    );

    let response = reqwest::Client::new()
        .patch(&format!("{}/users/me/cover-image", &app.address))
        .header("Authorization", format!("Bearer {}", access_token))
        .multipart(form)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["cover_image_url"], "https://media.test/assets/cover.png");
}
