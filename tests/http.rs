mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use sqlx::SqlitePool;

use common::{at, call, harness};

#[sqlx::test]
async fn classroom_day_over_rest(db_pool: SqlitePool) {
    let h = harness(db_pool).await;

    let (status, room) = call(&h.app, Method::POST, "/rooms", Some(&h.instructor), Some(json!({"title": "Algorithms"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let code = room["code"].as_str().unwrap().to_owned();

    let (status, _) = call(&h.app, Method::POST, "/rooms", Some(&h.student), Some(json!({"title": "Mine"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let enroll = format!("/rooms/{code}/enrollment");
    assert_eq!(call(&h.app, Method::POST, &enroll, Some(&h.student), None).await.0, StatusCode::CREATED);
    let (status, body) = call(&h.app, Method::POST, &enroll, Some(&h.student), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::CONFLICT, Some("ALREADY_ENROLLED")));

    let active = format!("/rooms/{code}/sessions/active");
    let (status, body) = call(&h.app, Method::GET, &active, Some(&h.student), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::FORBIDDEN, Some("SESSION_NOT_STARTED")));
    assert_eq!(call(&h.app, Method::GET, &active, Some(&h.instructor), None).await.0, StatusCode::NO_CONTENT);

    let start = format!("/rooms/{code}/sessions/start");
    assert_eq!(call(&h.app, Method::POST, &start, Some(&h.student), None).await.0, StatusCode::FORBIDDEN);
    let (status, session) = call(&h.app, Method::POST, &start, Some(&h.instructor), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["status"], "OPEN");
    let session_id = session["id"].as_i64().unwrap();
    let (status, body) = call(&h.app, Method::POST, &start, Some(&h.instructor), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::CONFLICT, Some("ALREADY_ACTIVE_SESSION")));

    let (status, body) = call(&h.app, Method::GET, &active, Some(&h.student), None).await;
    assert_eq!((status, body["id"].as_i64()), (StatusCode::OK, Some(session_id)));

    let messages = format!("/messages/sessions/{session_id}");
    let (status, sent) = call(&h.app, Method::POST, &messages, Some(&h.student), Some(json!({"content": "hello"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = sent["id"].as_i64().unwrap();
    let (status, body) = call(
        &h.app,
        Method::POST,
        &messages,
        Some(&h.student),
        Some(json!({"content": "print(1)", "messageType": "CODE"})),
    )
    .await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::BAD_REQUEST, Some("VALIDATION_ERROR")));
    assert_eq!(
        call(&h.app, Method::POST, &messages, Some(&h.other_student), Some(json!({"content": "let me in"}))).await.0,
        StatusCode::FORBIDDEN
    );

    let (status, page) = call(&h.app, Method::GET, &format!("{messages}?size=5"), Some(&h.instructor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["hasNext"], false);
    assert_eq!(page["messages"][0]["senderName"], "Ben");

    let message = format!("/messages/{message_id}");
    let (status, _) = call(&h.app, Method::PATCH, &message, Some(&h.instructor), Some(json!({"content": "nope"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, edited) = call(&h.app, Method::PATCH, &message, Some(&h.student), Some(json!({"content": "hello all"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((edited["edited"].as_bool(), edited["content"].as_str()), (Some(true), Some("hello all")));

    h.clock.set(at(18, 0));
    let (status, closed) = call(&h.app, Method::POST, &format!("/rooms/{code}/sessions/{session_id}/close"), Some(&h.instructor), None).await;
    assert_eq!((status, closed["status"].as_str()), (StatusCode::OK, Some("CLOSED")));

    let (status, body) = call(&h.app, Method::DELETE, &message, Some(&h.student), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::LOCKED, Some("SESSION_CLOSED")));

    let (status, body) = call(&h.app, Method::GET, &format!("/rooms/{code}/sessions/{session_id}"), Some(&h.student), None).await;
    assert_eq!((status, body["id"].as_i64()), (StatusCode::OK, Some(session_id)));
    let (status, archive) = call(&h.app, Method::GET, &format!("/rooms/{code}/sessions/archive"), Some(&h.student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(archive.as_array().unwrap().len(), 1);

    h.clock.set(at(18, 15));
    let (status, body) = call(&h.app, Method::POST, &start, Some(&h.instructor), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::FORBIDDEN, Some("CUTOFF_EXCEEDED")));
}

#[sqlx::test]
async fn requests_without_a_valid_token_are_rejected(db_pool: SqlitePool) {
    let h = harness(db_pool).await;

    let (status, body) = call(&h.app, Method::GET, "/rooms/ABCD1234", None, None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::FORBIDDEN, Some("UNAUTHORIZED")));
    assert_eq!(call(&h.app, Method::GET, "/rooms/ABCD1234", Some("junk.token"), None).await.0, StatusCode::FORBIDDEN);

    let (status, body) = call(&h.app, Method::GET, "/rooms/ABCD1234", Some(&h.student), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::NOT_FOUND, Some("ROOM_NOT_FOUND")));

    let (status, body) = call(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!((status, body["status"].as_str()), (StatusCode::OK, Some("ok")));
}

#[sqlx::test]
async fn open_sessions_are_not_served_by_id(db_pool: SqlitePool) {
    let h = harness(db_pool).await;
    let (_, room) = call(&h.app, Method::POST, "/rooms", Some(&h.instructor), Some(json!({"title": "Networks"}))).await;
    let code = room["code"].as_str().unwrap();
    let (_, session) = call(&h.app, Method::POST, &format!("/rooms/{code}/sessions/start"), Some(&h.instructor), None).await;

    let uri = format!("/rooms/{code}/sessions/{}", session["id"]);
    let (status, body) = call(&h.app, Method::GET, &uri, Some(&h.instructor), None).await;
    assert_eq!((status, body["code"].as_str()), (StatusCode::NOT_FOUND, Some("SESSION_NOT_FOUND")));
}
