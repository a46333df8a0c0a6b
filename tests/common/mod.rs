#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use classroom_chat::{
    AppState, app,
    auth::{HmacTokenGate, SharedTokenGate},
    clock::ManualClock,
    config::Config,
    db::Role,
    users::UserDirectory,
};
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret-0123456789";

pub struct Harness {
    pub state: AppState,
    pub app: Router,
    pub gate: Arc<HmacTokenGate>,
    pub clock: Arc<ManualClock>,
    pub instructor: String,
    pub student: String,
    pub other_student: String,
}

pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(hour, minute, 0).unwrap()
}

pub async fn harness(db_pool: SqlitePool) -> Harness {
    let config = Config::from_lookup(|key| match key {
        "TOKEN_SECRET" => Some(SECRET.to_owned()),
        "CLOSE_CUTOFF_TIME" => Some("18:10".to_owned()),
        _ => None,
    })
    .unwrap();

    let users = UserDirectory::new(db_pool.clone());
    let instructor = users.create("Ada", Role::Instructor).await.unwrap();
    let student = users.create("Ben", Role::Student).await.unwrap();
    let other_student = users.create("Cy", Role::Student).await.unwrap();

    let gate = Arc::new(HmacTokenGate::new(SECRET).unwrap());
    let clock = Arc::new(ManualClock::new(at(9, 0)));
    let tokens: SharedTokenGate = gate.clone();
    let state = AppState::new(db_pool, &config, tokens, clock.clone());

    Harness {
        app: app(state.clone()),
        state,
        instructor: gate.mint(instructor.id, Role::Instructor, Duration::hours(1)),
        student: gate.mint(student.id, Role::Student, Duration::hours(1)),
        other_student: gate.mint(other_student.id, Role::Student, Duration::hours(1)),
        gate,
        clock,
    }
}

pub async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}
