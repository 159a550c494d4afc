mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{ScriptedProvider, build_context};
use mockito::Matcher;
use reqwest::StatusCode;
use serde_json::json;
use sessiongate::api::{CheckoutRequest, ClientSyncRequest, RedirectUrl, RequestOptions};
use sessiongate::error::SessionError;
use sessiongate::navigation::NavigationMode;
use sessiongate::storage::keys;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn checkout() -> CheckoutRequest {
    CheckoutRequest {
        price_id: "price_basic".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn unauthorized_response_clears_tokens_and_reloads_login_once() {
    let mut server = mockito::Server::new_async().await;
    let stats = server
        .mock("GET", "/client/dashboard/stats")
        .with_status(401)
        .with_body(r#"{"error":"token expired"}"#)
        .expect(1)
        .create_async()
        .await;

    let (context, navigator) = build_context(ScriptedProvider::signed_out(), &server.url());
    context.tokens.set_bearer("abc").unwrap();
    context.tokens.set_csrf("stale").unwrap();

    let result = context.api.dashboard_stats("a@example.com").await;

    assert!(matches!(result, Err(SessionError::SessionExpired)));
    assert_eq!(context.tokens.get_bearer(), None);
    assert_eq!(context.tokens.get_csrf(), None);
    assert_eq!(
        navigator.visits(),
        vec![("/admin/login".to_string(), NavigationMode::FullReload)]
    );
    stats.assert_async().await;
}

#[tokio::test]
async fn every_checkout_carries_its_own_csrf_token() {
    let mut server = mockito::Server::new_async().await;
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&issued);
    let csrf = server
        .mock("GET", "/csrf-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!(r#"{{"csrfToken":"token-{n}"}}"#).into_bytes()
        })
        .expect(2)
        .create_async()
        .await;

    let mut checkouts = Vec::new();
    for n in 1..=2 {
        let checkout_mock = server
            .mock("POST", "/billing/checkout")
            .match_header("x-csrf-token", format!("token-{n}").as_str())
            .match_header("x-client-email", "a@example.com")
            .match_body(Matcher::PartialJson(json!({"priceId": "price_basic"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"url":"https://billing.example.com/session/{n}"}}"#))
            .expect(1)
            .create_async()
            .await;
        checkouts.push(checkout_mock);
    }

    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &server.url());

    for n in 1..=2 {
        let redirect = context
            .api
            .billing_checkout("a@example.com", &checkout())
            .await
            .unwrap();
        assert_eq!(
            redirect,
            RedirectUrl {
                url: format!("https://billing.example.com/session/{n}")
            }
        );
        assert_eq!(context.tokens.get_csrf(), None);
    }

    assert_eq!(issued.load(Ordering::SeqCst), 2);
    csrf.assert_async().await;
    for checkout_mock in checkouts {
        checkout_mock.assert_async().await;
    }
}

#[tokio::test]
async fn safe_requests_reuse_the_cached_csrf_token_unless_skipped() {
    let mut server = mockito::Server::new_async().await;
    let csrf = server
        .mock("GET", "/csrf-token")
        .expect(0)
        .create_async()
        .await;
    let with_token = server
        .mock("GET", "/client/activities")
        .match_header("x-csrf-token", "cached")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;
    let without_token = server
        .mock("GET", "/health")
        .match_header("x-csrf-token", Matcher::Missing)
        .with_status(200)
        .create_async()
        .await;

    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &server.url());
    context.tokens.set_csrf("cached").unwrap();

    context.api.activities("a@example.com").await.unwrap();
    context
        .api
        .request("/health", RequestOptions::get(), true)
        .await
        .unwrap();

    assert_eq!(context.tokens.get_csrf().as_deref(), Some("cached"));
    csrf.assert_async().await;
    with_token.assert_async().await;
    without_token.assert_async().await;
}

#[tokio::test]
async fn unauthorized_csrf_fetch_clears_tokens_and_reloads_login_once() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/csrf-token")
        .with_status(401)
        .create_async()
        .await;
    let campaign = server
        .mock("POST", "/client/campaigns")
        .expect(0)
        .create_async()
        .await;

    let (context, navigator) = build_context(ScriptedProvider::signed_out(), &server.url());
    context.tokens.set_bearer("abc").unwrap();
    context.tokens.set_csrf("stale").unwrap();

    let result = context
        .api
        .create_campaign("a@example.com", &json!({"name": "Spring"}))
        .await;

    assert!(matches!(result, Err(SessionError::SessionExpired)));
    assert_eq!(context.tokens.get_bearer(), None);
    assert_eq!(context.tokens.get_csrf(), None);
    assert_eq!(
        navigator.visits(),
        vec![("/admin/login".to_string(), NavigationMode::FullReload)]
    );
    campaign.assert_async().await;
}

/// A backend that hands out CSRF tokens and then drops every other
/// connection without answering.
async fn backend_that_hangs_up() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                if request.starts_with(b"GET /csrf-token") {
                    let body = r#"{"csrfToken":"spent-token"}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn csrf_token_is_spent_even_when_the_send_fails() {
    let backend = backend_that_hangs_up().await;
    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &backend);

    let error = context
        .api
        .update_campaign("a@example.com", "c1", &json!({"name": "Renamed"}))
        .await
        .unwrap_err();

    assert!(matches!(error, SessionError::ServiceUnavailable { .. }));
    assert_eq!(context.tokens.get_csrf(), None);
    assert_eq!(context.storage.get_item(keys::CSRF).unwrap(), None);
}

#[tokio::test]
async fn cookies_set_by_the_backend_are_sent_back() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/csrf-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "sid=session-1; Path=/")
        .with_body(r#"{"csrfToken":"t1"}"#)
        .create_async()
        .await;
    let portal = server
        .mock("POST", "/billing/portal")
        .match_header("cookie", Matcher::Regex("sid=session-1".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"url":"https://billing.example.com/portal"}"#)
        .create_async()
        .await;

    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &server.url());

    context.api.billing_portal("a@example.com").await.unwrap();
    portal.assert_async().await;
}

#[tokio::test]
async fn bearer_and_client_email_are_attached() {
    let mut server = mockito::Server::new_async().await;
    let campaigns = server
        .mock("GET", "/client/campaigns")
        .match_header("authorization", "Bearer abc")
        .match_header("x-client-email", "a@example.com")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"c1"}]"#)
        .create_async()
        .await;

    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &server.url());
    context.tokens.set_bearer("abc").unwrap();

    let body = context.api.campaigns("a@example.com").await.unwrap();
    assert_eq!(body, json!([{"id": "c1"}]));
    campaigns.assert_async().await;
}

#[tokio::test]
async fn client_sync_is_sent_without_csrf() {
    let mut server = mockito::Server::new_async().await;
    let csrf = server
        .mock("GET", "/csrf-token")
        .expect(0)
        .create_async()
        .await;
    let sync = server
        .mock("POST", "/clients/sync")
        .match_header("x-csrf-token", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({
            "externalId": "u1",
            "email": "a@example.com"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok":true}"#)
        .create_async()
        .await;

    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &server.url());
    let request = ClientSyncRequest {
        external_id: "u1".to_string(),
        email: "a@example.com".to_string(),
        ..Default::default()
    };

    context.api.sync_client(&request).await.unwrap();
    csrf.assert_async().await;
    sync.assert_async().await;
}

#[tokio::test]
async fn backend_error_message_is_surfaced() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/client/meetings")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"database offline"}"#)
        .create_async()
        .await;

    let (context, navigator) = build_context(ScriptedProvider::signed_out(), &server.url());
    context.tokens.set_bearer("abc").unwrap();

    match context.api.meetings("a@example.com").await {
        Err(SessionError::Http { status, message }) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(message, "database offline");
        }
        other => panic!("expected an HTTP error, got {:?}", other),
    }
    assert_eq!(context.tokens.get_bearer().as_deref(), Some("abc"));
    assert!(navigator.visits().is_empty());
}

#[tokio::test]
async fn unreachable_backend_names_the_base_url() {
    let (context, _navigator) =
        build_context(ScriptedProvider::signed_out(), "http://127.0.0.1:1");

    let error = context.api.prospects("a@example.com").await.unwrap_err();

    assert!(matches!(error, SessionError::ServiceUnavailable { .. }));
    assert!(error.to_string().contains("http://127.0.0.1:1"));
}

#[tokio::test]
async fn failed_csrf_fetch_stops_the_request() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/csrf-token")
        .with_status(503)
        .create_async()
        .await;
    let portal = server
        .mock("POST", "/billing/portal")
        .expect(0)
        .create_async()
        .await;

    let (context, _navigator) = build_context(ScriptedProvider::signed_out(), &server.url());

    let result = context.api.billing_portal("a@example.com").await;
    assert!(matches!(
        result,
        Err(SessionError::Http { status, .. }) if status == StatusCode::SERVICE_UNAVAILABLE
    ));
    portal.assert_async().await;
}
