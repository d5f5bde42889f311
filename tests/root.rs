mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

const JWT_SECRET: &str = "ledger-test-secret";

fn token(user_id: Uuid, role: &str) -> String {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    let claims = json!({
        "sub": user_id,
        "email": format!("{role}@example.com"),
        "role": role,
        "exp": 9999999999u64,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_responds_ok() {
    let app = coach_ledger::app(support::harness().engine);
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, "Coach Ledger API".as_bytes());
}

#[tokio::test]
async fn protected_routes_need_a_token_and_admin_routes_an_admin() {
    let app = coach_ledger::app(support::harness().engine);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/earnings/me", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let client = token(Uuid::new_v4(), "client");
    let response = app
        .oneshot(request(
            "GET",
            "/api/admin/earnings/platform",
            Some(&client),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["kind"], "forbidden");
}

#[tokio::test]
async fn manual_payment_flow_over_http() {
    let app = coach_ledger::app(support::harness().engine);
    let (client_id, trainer_id) = (Uuid::new_v4(), Uuid::new_v4());
    let client = token(client_id, "client");
    let trainer = token(trainer_id, "trainer");
    let admin = token(Uuid::new_v4(), "admin");

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/manual-payments",
            Some(&client),
            Some(json!({
                "trainer_id": trainer_id,
                "amount": 5000,
                "receipt_ref": "receipts/0042.jpg",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let payment = json_body(response).await;
    assert_eq!(payment["status"], "PENDING");
    let payment_id = payment["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/admin/manual-payments/{payment_id}/approve"),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let approved = json_body(response).await;
    assert_eq!(approved["split"]["trainerShare"], 4500);
    assert_eq!(approved["payout"]["amount"], 4500);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/admin/manual-payments/{payment_id}/reject"),
            Some(&admin),
            Some(json!({ "reason": "too late" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let conflict = json_body(response).await;
    assert_eq!(conflict["kind"], "conflict");
    assert_eq!(conflict["context"]["status"], "APPROVED");

    let response = app
        .oneshot(request("GET", "/api/earnings/me", Some(&trainer), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = json_body(response).await;
    assert_eq!(summary["grossIncome"], 5000);
    assert_eq!(summary["pendingPayouts"], 4500);
    assert_eq!(summary["amountOwed"], 0);
}

#[tokio::test]
async fn webhook_acknowledges_signed_events_and_refuses_forged_ones() {
    let app = coach_ledger::app(support::harness().engine);
    let payload = support::event("evt_http", "invoice.created", json!({ "id": "in_1" }));

    let signed = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header("Stripe-Signature", support::sign(&payload))
        .body(Body::from(payload.clone()))
        .unwrap();
    let response = app.clone().oneshot(signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"]["outcome"], "ignored");

    let forged = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header("Stripe-Signature", "t=1,v1=deadbeef")
        .body(Body::from(payload))
        .unwrap();
    let response = app.oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["received"], false);
}

#[tokio::test]
async fn trainer_plans_are_listed_publicly() {
    let app = coach_ledger::app(support::harness().engine);
    let trainer_id = Uuid::new_v4();
    let trainer = token(trainer_id, "trainer");

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/payments/plans",
            Some(&trainer),
            Some(json!({
                "name": "Monthly coaching",
                "price": 8000,
                "currency": "usd",
                "interval": "month",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(request(
            "GET",
            &format!("/api/payments/plans/trainer/{trainer_id}"),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let plans = json_body(response).await;
    assert_eq!(plans.as_array().unwrap().len(), 1);
    assert_eq!(plans[0]["price"], 8000);
}

#[tokio::test]
async fn admin_payout_defaults_to_the_configured_manual_currency() {
    let h = support::harness_with(coach_ledger::earnings::EarningsSettings {
        manual_currency: "kes".into(),
        ..Default::default()
    });
    let app = coach_ledger::app(h.engine);
    let admin = token(Uuid::new_v4(), "admin");

    let response = app
        .oneshot(request(
            "POST",
            "/api/admin/payouts",
            Some(&admin),
            Some(json!({ "trainer_id": Uuid::new_v4(), "amount": 2500 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let payout = json_body(response).await;
    assert_eq!(payout["currency"], "kes");
}
