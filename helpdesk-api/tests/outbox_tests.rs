//! End-to-end test of the email outbox: the API queues, the worker sends
//!
//! These tests require a running PostgreSQL database (see common/mod.rs).

mod common;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::TestContext;
use helpdesk_shared::models::email_job::{EmailJob, EmailJobStatus};
use helpdesk_worker::mailer::{EmailError, EmailProvider, OutgoingEmail};
use helpdesk_worker::orchestrator::{OrchestratorConfig, WorkerOrchestrator};
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Outbox {
    delivered: Mutex<Vec<OutgoingEmail>>,
}

impl Outbox {
    fn to(&self, recipient: &str) -> Vec<OutgoingEmail> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.to == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EmailProvider for Outbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        self.delivered.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn reset_token(body: &str) -> String {
    let start = body.find("token=").expect("reset link missing") + "token=".len();
    body[start..]
        .split_whitespace()
        .next()
        .expect("empty token")
        .to_string()
}

#[tokio::test]
async fn test_password_reset_email_is_delivered() {
    let ctx = TestContext::new().await.unwrap();
    let email = format!("{}@reset.test", Uuid::new_v4().simple());
    let username = format!("u{}", &Uuid::new_v4().simple().to_string()[..10]);

    let (status, _) = ctx
        .request(
            Method::POST,
            "/v1/auth/register",
            None,
            Some(json!({ "username": username, "email": email, "password": "Printer-jam-42" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = ctx
        .request(
            Method::POST,
            "/v1/auth/forgot-password",
            None,
            Some(json!({ "email": email })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        body["message"],
        "Check your email for the instructions to reset your password"
    );

    // Unknown addresses get the same answer and no email
    let stranger = format!("{}@reset.test", Uuid::new_v4().simple());
    let (status, _) = ctx
        .request(
            Method::POST,
            "/v1/auth/forgot-password",
            None,
            Some(json!({ "email": stranger })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(EmailJob::list_for_recipient(&ctx.db, &stranger)
        .await
        .unwrap()
        .is_empty());

    let queued = EmailJob::list_for_recipient(&ctx.db, &email).await.unwrap();
    assert_eq!(queued.len(), 1);
    let job_id = queued[0].id;

    let outbox = Arc::new(Outbox::default());
    let worker = WorkerOrchestrator::with_config(
        ctx.db.clone(),
        outbox.clone(),
        OrchestratorConfig {
            batch_size: 50,
            ..OrchestratorConfig::default()
        },
    );

    let mut job = EmailJob::find_by_id(&ctx.db, job_id).await.unwrap().unwrap();
    for _ in 0..50 {
        if job.status == EmailJobStatus::Sent {
            break;
        }
        worker.deliver_batch().await.unwrap();
        job = EmailJob::find_by_id(&ctx.db, job_id).await.unwrap().unwrap();
    }
    assert_eq!(job.status, EmailJobStatus::Sent);

    let delivered = outbox.to(&email);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].subject, "Reset Your Password");

    let token = reset_token(&delivered[0].text_body);
    let (status, _) = ctx
        .request(
            Method::POST,
            "/v1/auth/reset-password",
            None,
            Some(json!({ "token": token, "new_password": "Fresh-toner-77" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx
        .request(
            Method::POST,
            "/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": "Fresh-toner-77" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The link stops working once the password has changed
    let (status, _) = ctx
        .request(
            Method::POST,
            "/v1/auth/reset-password",
            None,
            Some(json!({ "token": token, "new_password": "Another-pass-99" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
