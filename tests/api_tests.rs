// tests/api_tests.rs
mod common;

use actix_web::{test, web, App};
use coderun::api::handlers::WsBroker;
use coderun::api::{configure_routes, AppState};
use coderun::config::{AppConfig, TaskFile};
use coderun::database;
use coderun::models::TestCase;
use common::{classroom_script, ScriptedFactory};
use serde_json::{json, Value};

const SUM: &str = "a = int(input())\nb = int(input())\nprint(a + b)";

fn sum_task() -> TaskFile {
    TaskFile {
        slug: "sum".into(),
        title: "Sum".into(),
        description: None,
        default_code: None,
        tests: vec![
            TestCase { input: Some("3\n4".into()), output: Some("7".into()), hidden: false },
            TestCase { input: Some("10\n-2".into()), output: Some("8".into()), hidden: true },
        ],
    }
}

async fn state(timeout_ms: &str) -> AppState {
    let pool = database::init_db("sqlite::memory:").await.unwrap();
    database::seed_tasks(&pool, &[sum_task()]).await.unwrap();
    let timeout_ms = timeout_ms.to_string();
    let config = AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "EXECUTION_TIMEOUT_MS" => Some(timeout_ms.clone()),
        _ => None,
    })
    .unwrap();
    AppState::with_factory(config, pool, ScriptedFactory::new(classroom_script))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .app_data(web::Data::new(WsBroker::new()))
                .configure(configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health() {
    let app = app!(state("5000").await);
    let resp: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/v1/health").to_request()).await;
    assert_eq!(resp["status"], "healthy");
}

#[actix_web::test]
async fn test_task_view_redacts_hidden_cases() {
    let app = app!(state("5000").await);
    let req = test::TestRequest::get().uri("/api/v1/tasks/1?student=ann").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp["task"]["slug"], "sum");
    assert_eq!(resp["tests"][0]["output"], "7");
    assert_eq!(resp["tests"][1]["hidden"], true);
    assert!(resp["tests"][1]["input"].is_null());
    assert!(resp["tests"][1]["output"].is_null());
    assert!(resp["progress"].is_null());

    let missing = test::call_service(&app, test::TestRequest::get().uri("/api/v1/tasks/99").to_request()).await;
    assert_eq!(missing.status(), 404);
}

#[actix_web::test]
async fn test_run_asks_for_inputs_then_executes() {
    let app = app!(state("5000").await);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/run")
        .set_json(json!({ "student": "ann", "code": SUM }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "awaiting_input");
    assert_eq!(resp["count"], 2);
    assert_eq!(resp["prompts"], json!(["Input 1/2:", "Input 2/2:"]));

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/run")
        .set_json(json!({ "student": "ann", "code": SUM, "inputs": ["3", "4"] }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "completed");
    assert_eq!(resp["output"], "3\n4\n7");
    assert!(resp["id"].is_string());
}

#[actix_web::test]
async fn test_run_with_too_few_inputs_is_rejected() {
    let app = app!(state("5000").await);
    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/run")
        .set_json(json!({ "student": "ann", "code": SUM, "inputs": ["3"] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_passing_check_completes_and_locks_task() {
    let app = app!(state("5000").await);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/check")
        .set_json(json!({ "student": "ann", "code": SUM }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["all_passed"], true);
    assert_eq!(resp["passed_count"], 2);
    assert_eq!(resp["completed"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/save")
        .set_json(json!({ "student": "ann", "code": "print(1)" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    let req = test::TestRequest::get().uri("/api/v1/tasks/1?student=ann").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["progress"]["is_completed"], true);
    assert_eq!(resp["progress"]["code"], SUM);

    let req = test::TestRequest::get().uri("/api/v1/history").to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["results"][0]["kind"], "check");
    assert_eq!(resp["results"][0]["status"], "passed");
}

#[actix_web::test]
async fn test_failing_check_reports_first_visible_mismatch() {
    let app = app!(state("5000").await);
    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/check")
        .set_json(json!({ "student": "ann", "code": "a = int(input())\nb = int(input())\nprint(a - b)" }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp["all_passed"], false);
    assert_eq!(resp["completed"], false);
    assert_eq!(resp["first_failure"]["index"], 0);
    assert_eq!(resp["first_failure"]["diagnostic"], "Expected: 7\nGot: -7");
}

#[actix_web::test]
async fn test_paste_marks_matching_submission_as_copied() {
    let app = app!(state("5000").await);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/activity")
        .set_json(json!({ "student": "ann", "event_type": "paste", "text": SUM }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["recorded"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/check")
        .set_json(json!({ "student": "ann", "code": format!("{}\n", SUM) }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["copied"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/activity")
        .set_json(json!({ "student": "ann", "event_type": "scroll" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_short_paste_is_not_remembered() {
    let app = app!(state("5000").await);
    let code = "print(\"hi\")";
    assert!(code.len() < 15);

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/activity")
        .set_json(json!({ "student": "bob", "event_type": "paste", "text": code }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/check")
        .set_json(json!({ "student": "bob", "code": code }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["copied"], false);
}

#[actix_web::test]
async fn test_hung_program_times_out() {
    let app = app!(state("50").await);
    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/run")
        .set_json(json!({ "student": "ann", "code": "while True:\n    pass" }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp["status"], "timed_out");
    assert!(resp["message"].as_str().unwrap().starts_with("Execution time limit exceeded (50ms)"));
}

#[actix_web::test]
async fn test_count_inputs() {
    let app = app!(state("5000").await);
    let req = test::TestRequest::post()
        .uri("/api/v1/tasks/1/inputs")
        .set_json(json!({ "code": "x = input()  # input()" }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["count"], 1);
}
