use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use log::{debug, info};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use super::{create_test_app, set_test_env};
use crate::routes::{create_router_with_state, AppState};
use parentlink_shared::auth::create_test_request;
use parentlink_shared::config::Branding;
use parentlink_shared::dispatch::{DispatchOutcome, MessageRenderer};
use parentlink_shared::models::ParentRef;
use parentlink_shared::runner::RetryRunner;
use parentlink_shared::store::dynamo::{DynamoDeliveryLog, DynamoInvitationStore};
use parentlink_shared::store::{DeliveryLog, InvitationStore};
use parentlink_shared::test_utils::dynamo_test_utils::{
    clear_dynamo_table, create_delivery_table, create_dynamo_client, create_invitation_table,
    use_dynamodb,
};
use parentlink_shared::test_utils::fixtures::seed_attempt;
use parentlink_shared::test_utils::http_test_utils::response_to_json;
use parentlink_shared::test_utils::mock_gateway::ScriptedGateway;

const PARENT_ID: &str = "parent-1";

fn parent() -> ParentRef {
    // create_test_request signs tokens with `<user_id>@example.com`
    ParentRef::new(PARENT_ID, format!("{}@example.com", PARENT_ID))
}

#[tokio::test]
async fn test_create_invitation() {
    let t = create_test_app();

    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            "/invitations",
            PARENT_ID,
            Some(json!({ "childEmail": " Kid@School.org ", "childName": "Sam" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json_resp = response_to_json(response).await;
    let invitation = &json_resp["invitation"];
    assert_eq!(invitation["childEmail"], "kid@school.org");
    assert_eq!(invitation["childName"], "Sam");
    assert_eq!(invitation["isAccepted"], false);
    assert!(invitation.get("token").is_none());

    let id = invitation["id"].as_str().unwrap();
    let stored = t.store.get_invitation(id).await.unwrap();
    assert_eq!(stored.parent_id, PARENT_ID);
    assert_eq!(stored.parent_email, "parent-1@example.com");

    // Initial send belongs to the notification service
    assert!(t.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_create_invitation_rejects_bad_email() {
    let t = create_test_app();

    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            "/invitations",
            PARENT_ID,
            Some(json!({ "childEmail": "not-an-email" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(t.store.list_invitations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_invitation_for_linked_child_conflicts() {
    let t = create_test_app();
    let existing = t
        .store
        .create_invitation(&parent(), "kid@school.org", None)
        .await
        .unwrap();
    t.store.accept(&existing.token).await.unwrap();

    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            "/invitations",
            PARENT_ID,
            Some(json!({ "childEmail": "KID@school.org" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let t = create_test_app();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/invitations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_invitations_with_delivery_counts() {
    let t = create_test_app();
    let now = Utc::now();

    let older = t
        .store
        .create_invitation(&parent(), "first@school.org", None)
        .await
        .unwrap();
    let newer = t
        .store
        .create_invitation(&parent(), "second@school.org", None)
        .await
        .unwrap();
    t.store
        .create_invitation(&ParentRef::new("someone-else", "x@example.com"), "other@school.org", None)
        .await
        .unwrap();

    seed_attempt(t.log.as_ref(), &older, false, now - Duration::hours(3)).await;
    seed_attempt(t.log.as_ref(), &older, true, now - Duration::hours(1)).await;

    let response = t
        .app
        .clone()
        .oneshot(create_test_request("GET", "/invitations", PARENT_ID, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json_resp = response_to_json(response).await;
    let list = json_resp["invitations"].as_array().unwrap();
    assert_eq!(list.len(), 2);

    let first = list.iter().find(|i| i["id"] == older.id.as_str()).unwrap();
    assert_eq!(first["deliveries"]["sent"], 2);
    assert_eq!(first["deliveries"]["failed"], 1);
    assert_eq!(first["lastAttempt"]["success"], true);

    let second = list.iter().find(|i| i["id"] == newer.id.as_str()).unwrap();
    assert_eq!(second["deliveries"]["sent"], 0);
    assert!(second["lastAttempt"].is_null());
}

#[tokio::test]
async fn test_accept_invitation() {
    let t = create_test_app();
    let invitation = t
        .store
        .create_invitation(&parent(), "kid@school.org", None)
        .await
        .unwrap();
    let path = format!("/invitations/accept/{}", invitation.token);

    let response = t
        .app
        .clone()
        .oneshot(create_test_request("POST", &path, "child-user", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json_resp = response_to_json(response).await;
    assert_eq!(json_resp["invitation"]["isAccepted"], true);
    assert!(t.store.get_invitation(&invitation.id).await.unwrap().is_accepted);

    // Second use of the same token
    let response = t
        .app
        .clone()
        .oneshot(create_test_request("POST", &path, "child-user", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            "/invitations/accept/not-a-real-token",
            "child-user",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resend_invitation() {
    let t = create_test_app();
    let invitation = t
        .store
        .create_invitation(&parent(), "kid@school.org", None)
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            &format!("/invitations/{}/resend", invitation.id),
            PARENT_ID,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json_resp = response_to_json(response).await;
    assert_eq!(json_resp["attempt"]["success"], true);
    assert_eq!(
        json_resp["attempt"]["subject"],
        "EduVanta Parent Invite (Resend)"
    );

    let sent = t.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["kid@school.org".to_string()]);
    assert!(sent[0].html_body.contains(&invitation.token));
    assert_eq!(t.log.attempts_for(&invitation.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resend_failure_is_recorded_and_reported() {
    let t = create_test_app();
    t.gateway
        .set_default(DispatchOutcome::failed("550 mailbox unavailable"));
    let invitation = t
        .store
        .create_invitation(&parent(), "kid@school.org", None)
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            &format!("/invitations/{}/resend", invitation.id),
            PARENT_ID,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json_resp = response_to_json(response).await;
    assert!(json_resp["error"]
        .as_str()
        .unwrap()
        .contains("550 mailbox unavailable"));

    let attempts = t.log.attempts_for(&invitation.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].error_text, "550 mailbox unavailable");
}

#[tokio::test]
async fn test_resend_guards() {
    let t = create_test_app();
    let invitation = t
        .store
        .create_invitation(&parent(), "kid@school.org", None)
        .await
        .unwrap();
    let path = format!("/invitations/{}/resend", invitation.id);

    // Not the owner
    let response = t
        .app
        .clone()
        .oneshot(create_test_request("POST", &path, "parent-2", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Unknown invitation
    let response = t
        .app
        .clone()
        .oneshot(create_test_request(
            "POST",
            "/invitations/does-not-exist/resend",
            PARENT_ID,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Already accepted
    t.store.accept(&invitation.token).await.unwrap();
    let response = t
        .app
        .clone()
        .oneshot(create_test_request("POST", &path, PARENT_ID, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    assert!(t.gateway.sent().is_empty());
    assert!(t.log.attempts_for(&invitation.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let t = create_test_app();

    let response = t
        .app
        .clone()
        .oneshot(create_test_request("GET", "/nope", PARENT_ID, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

const TEST_INVITATIONS_TABLE: &str = "invitation-service-invitations-test";
const TEST_DELIVERIES_TABLE: &str = "invitation-service-deliveries-test";

#[tokio::test]
async fn test_create_and_list_with_dynamodb() {
    if !use_dynamodb() {
        debug!("Skipping DynamoDB test, USE_DYNAMODB is not set");
        return;
    }
    set_test_env();
    info!("Using DynamoDB for invitation handler tests");

    let client = create_dynamo_client().await;
    if let Err(e) = create_invitation_table(&client, TEST_INVITATIONS_TABLE).await {
        info!("Invitation table not created (may already exist): {}", e);
    }
    if let Err(e) = create_delivery_table(&client, TEST_DELIVERIES_TABLE).await {
        info!("Delivery table not created (may already exist): {}", e);
    }
    clear_dynamo_table(&client, TEST_INVITATIONS_TABLE, "token")
        .await
        .unwrap();
    clear_dynamo_table(&client, TEST_DELIVERIES_TABLE, "id")
        .await
        .unwrap();

    let gateway = ScriptedGateway::always_ok();
    let runner = RetryRunner::new(
        Arc::new(DynamoInvitationStore::with_client_and_table(
            client.clone(),
            TEST_INVITATIONS_TABLE.to_string(),
        )),
        Arc::new(DynamoDeliveryLog::with_client_and_table(
            client,
            TEST_DELIVERIES_TABLE.to_string(),
        )),
        Arc::new(gateway.clone()),
        MessageRenderer::new(Branding::default()),
    );
    let app = create_router_with_state(Arc::new(AppState::new(runner)), "");

    let response = app
        .clone()
        .oneshot(create_test_request(
            "POST",
            "/invitations",
            PARENT_ID,
            Some(json!({ "childEmail": "kid@school.org" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = response_to_json(response).await["invitation"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // GSI reads are eventually consistent
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    let response = app
        .clone()
        .oneshot(create_test_request(
            "POST",
            &format!("/invitations/{}/resend", id),
            PARENT_ID,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(create_test_request("GET", "/invitations", PARENT_ID, None))
        .await
        .unwrap();
    let json_resp = response_to_json(response).await;
    assert_eq!(json_resp["invitations"][0]["deliveries"]["sent"], 1);
    assert_eq!(gateway.sent().len(), 1);
}
