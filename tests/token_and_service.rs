// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Session tokens, signed service requests and tenant resolution over HTTP.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::Utc;
use common::*;
use stoa_auth_gateway::auth::SignedRequest;
use stoa_auth_gateway::keystore::KeyAlias;

fn register_account(gw: &Gateway, account: &str) -> ed25519_dalek::SigningKey {
    gw.keys.generate_key_pair(KeyAlias::from(account)).unwrap();
    gw.keys.signing_key(&KeyAlias::from(account)).unwrap()
}

#[tokio::test]
async fn test_service_request_issues_session() {
    let gw = gateway(TENANTS);
    let key = register_account(&gw, "billing");
    let signed = SignedRequest::sign_now(&key, "billing");

    let response = gw
        .send(get(&format!("/auth/robots/service?{}", signed.to_query())))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie_pair(&response);
    let body = read_json(response).await;
    assert_eq!(body["user"], "billing");
    assert!(body["validFrom"].is_string());
    assert!(body["validTo"].is_string());

    // The cookie authenticates later requests without re-signing.
    let response = gw.send(get_with_cookie("/auth/robots/token", &cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["user"], "billing");
}

#[tokio::test]
async fn test_signed_request_authenticates_guarded_route_directly() {
    let gw = gateway(TENANTS);
    let key = register_account(&gw, "billing");
    let signed = SignedRequest::sign_now(&key, "billing");

    let response = gw
        .send(get(&format!("/auth/robots/token?{}", signed.to_query())))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["user"], "billing");
}

#[tokio::test]
async fn test_stale_service_request_is_403() {
    let gw = gateway(TENANTS);
    let key = register_account(&gw, "billing");
    let stale = SignedRequest::sign(&key, "billing", Utc::now().timestamp_millis() - 120_000);

    let response = gw
        .send(get(&format!("/auth/robots/service?{}", stale.to_query())))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(read_json(response).await["type"], "AUTHENTICATION_REJECTED");
}

#[tokio::test]
async fn test_service_request_for_unknown_account_is_403() {
    let gw = gateway(TENANTS);
    let key = register_account(&gw, "billing");
    let signed = SignedRequest::sign_now(&key, "payroll");

    let response = gw
        .send(get(&format!("/auth/robots/service?{}", signed.to_query())))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_service_request_is_406() {
    let gw = gateway(TENANTS);

    let response = gw.send(get("/auth/robots/service?request=%21%21&signature=abc")).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(read_json(response).await["type"], "INVALID_REQUEST");

    let response = gw.send(get("/auth/robots/service?request=abc")).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_service_endpoint_on_token_tenant_is_unsupported() {
    let gw = gateway(TENANTS);
    let response = gw.send(get("/auth/docs/service?request=a&signature=b")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["type"], "UNSUPPORTED_SCHEME");
    assert_eq!(body["service"], "docs");
}

#[tokio::test]
async fn test_token_endpoint() {
    let gw = gateway(TENANTS);
    let tokens = gw.state.registry.get_config("docs").unwrap().tokens.clone();
    let issued = tokens.issue("alice").unwrap();

    let response = gw
        .send(
            Request::get("/auth/docs/token")
                .header(header::AUTHORIZATION, format!("Bearer {}", issued.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["user"], "alice");
    assert_eq!(
        body["validTo"],
        issued.expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    let response = gw.send(get("/auth/docs/token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["type"], "NOT_AUTHENTICATED");
}

#[tokio::test]
async fn test_session_cookie_is_bound_to_issuing_tenant() {
    let gw = gateway(TENANTS);
    let key = register_account(&gw, "billing");
    let signed = SignedRequest::sign_now(&key, "billing");
    let response = gw
        .send(get(&format!("/auth/robots/service?{}", signed.to_query())))
        .await;
    let cookie = cookie_pair(&response);

    let response = gw.send(get_with_cookie("/auth/robots/token", &cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Both tenants sign with the default key; the audience still differs.
    let response = gw.send(get_with_cookie("/auth/docs/token", &cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["type"], "NOT_AUTHENTICATED");

    let response = gw.send(get_with_cookie("/auth/acme/token", &cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_logout_expires_cookie() {
    let gw = gateway(TENANTS);
    let response = gw
        .send(Request::post("/auth/docs/logout").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("stoa_session=;"));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_unknown_tenant_is_404_on_every_endpoint() {
    let gw = gateway(TENANTS);
    let requests = vec![
        get("/auth/bogus/token"),
        get("/auth/bogus/signon?relayState=https%3A%2F%2Fapp%2Fx"),
        post_form("/auth/bogus/saml", &[("SAMLResponse", "PHg+"), ("RelayState", "/")]),
        get("/auth/bogus/service?request=a&signature=b"),
        Request::post("/auth/bogus/logout").body(Body::empty()).unwrap(),
    ];

    for request in requests {
        let uri = request.uri().to_string();
        let response = gw.send(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        let body = read_json(response).await;
        assert_eq!(body["type"], "INVALID_SERVICE", "{}", uri);
        assert_eq!(body["service"], "bogus", "{}", uri);
    }
}

#[tokio::test]
async fn test_unknown_tenant_acs_without_form_body_is_404() {
    let gw = gateway(TENANTS);
    let response = gw
        .send(
            Request::post("/auth/bogus/saml")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["type"], "INVALID_SERVICE");

    let response = gw
        .send(Request::post("/auth/bogus/saml").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let gw = gateway(TENANTS);
    for uri in ["/health/live", "/health/ready", "/health/startup", "/metrics"] {
        assert_eq!(gw.send(get(uri)).await.status(), StatusCode::OK, "{}", uri);
    }

    gw.state.health.mark_shutting_down();
    assert_eq!(
        gw.send(get("/health/ready")).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}
