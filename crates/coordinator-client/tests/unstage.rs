use coordinator_client::{CoordinatorClient, CoordinatorError, TlsIdentity};

#[tokio::test]
async fn unstage_success_returns_record() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/migrations/unstage")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 42, "status": 0, "run_type": 1, "mode": 0, "action": 2}"#)
        .create_async()
        .await;

    let client = CoordinatorClient::new(server.url(), &TlsIdentity::default()).unwrap();
    let record = client.unstage(42).await.unwrap();
    assert_eq!(record.id, Some(42));
}

#[tokio::test]
async fn unstage_without_id_is_stolen() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/migrations/unstage")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{}"#)
        .create_async()
        .await;

    let client = CoordinatorClient::new(server.url(), &TlsIdentity::default()).unwrap();
    let err = client.unstage(42).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Stolen(42)));
}

#[tokio::test]
async fn staged_returns_empty_list() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/migrations/staged")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[]"#)
        .create_async()
        .await;

    let client = CoordinatorClient::new(server.url(), &TlsIdentity::default()).unwrap();
    let records = client.staged().await.unwrap();
    assert!(records.is_empty());
}
