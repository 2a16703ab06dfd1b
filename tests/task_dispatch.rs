//! Integration tests driving task backends through the public dispatcher.

use std::sync::Arc;

use rstest::rstest;
use tpi::common::{
    Cloud, Credentials, Identifier, KubernetesCredentials, Provider, Region, ResourceError,
    Settings, Task, parse_identifier,
};
use tpi::task::{self, TaskBackend};
use tpi::test_support::ScriptedRunner;

const LONG: &str = "tpi-test-3z4xlzwq-3u0vweb4";

fn kubernetes() -> Cloud {
    Cloud::new(
        Provider::Kubernetes,
        Region::from("us-east"),
        Credentials {
            kubernetes: Some(KubernetesCredentials {
                config: String::from("apiVersion: v1\nkind: Config\n"),
            }),
            ..Credentials::default()
        },
    )
    .expect("cloud should validate")
}

fn backend(runner: &ScriptedRunner) -> Box<dyn TaskBackend> {
    task::new(
        &kubernetes(),
        Identifier::new("test"),
        Task::default(),
        Arc::new(runner.clone()),
        Settings::default(),
    )
    .expect("backend")
}

#[test]
fn identifier_forms_are_stable() {
    let identifier = Identifier::new("test");
    assert_eq!(identifier.long(), LONG);
    assert_eq!(identifier.short(), "3z4xlzwq3u0vweb4");
    assert_eq!(parse_identifier(LONG), Ok(identifier));
}

#[rstest]
#[case("tpi-test-3z4xlzwq-00000000")]
#[case("not-an-identifier")]
fn parse_identifier_rejects_non_canonical(#[case] raw: &str) {
    assert!(matches!(
        parse_identifier(raw),
        Err(ResourceError::Invalid { .. })
    ));
}

#[tokio::test]
async fn read_refreshes_every_object_and_exposes_state() {
    let runner = ScriptedRunner::new();
    runner.push_stdout(format!(r#"{{"metadata":{{"name":"{LONG}"}}}}"#));
    runner.push_stdout(format!(r#"{{"metadata":{{"name":"{LONG}"}}}}"#));
    runner.push_stdout(r#"{"spec":{"parallelism":1},"status":{"active":1}}"#);
    runner.push_stdout(
        r#"{"items":[{"metadata":{"name":"pod-a"},"status":{"podIP":"10.1.0.7"}}]}"#,
    );
    runner.push_stdout(
        r#"{"items":[{"lastTimestamp":"2026-10-19T08:00:00Z","reason":"SuccessfulCreate","message":"Created pod: pod-a"}]}"#,
    );
    let backend = backend(&runner);

    backend.read().await.expect("read");

    assert_eq!(backend.addresses(), vec![String::from("10.1.0.7")]);
    let events = backend.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events.first().map(|event| event.code.as_str()), Some("SuccessfulCreate"));
    assert!(runner
        .invocations()
        .iter()
        .all(|invocation| invocation.env.contains_key("KUBECONFIG")));
}

#[tokio::test]
async fn read_of_missing_task_reports_not_found() {
    let runner = ScriptedRunner::new();
    runner.push_failure(
        1,
        format!(r#"Error from server (NotFound): configmaps "{LONG}" not found"#),
    );
    let backend = backend(&runner);

    assert_eq!(backend.read().await, Err(ResourceError::NotFound));
    assert_eq!(runner.remaining(), 0);
}

#[tokio::test]
async fn kubernetes_cannot_be_paused() {
    let runner = ScriptedRunner::new();
    let backend = backend(&runner);

    assert_eq!(backend.stop().await, Err(ResourceError::NotImplemented));
    assert_eq!(backend.start().await, Err(ResourceError::NotImplemented));
}

#[test]
fn credentials_must_match_provider() {
    let credentials = Credentials {
        kubernetes: Some(KubernetesCredentials::default()),
        ..Credentials::default()
    };
    let result = Cloud::new(Provider::Gcp, Region::from("us-east"), credentials);
    assert!(matches!(result, Err(ResourceError::Credentials(_))));
}
