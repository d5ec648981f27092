//! Azure Blob sink tests against a mock server

use std::time::Duration;

use httpmock::prelude::*;

use fhirlink::{AzureBlobConfig, AzureBlobSink, BlobSink, SinkError};

fn sink(server: &MockServer) -> AzureBlobSink {
    AzureBlobSink::new(AzureBlobConfig {
        account_url: server.base_url(),
        sas_token: Some("?sv=2021-08-06&sig=testsig".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_ensure_container_created() {
    let server = MockServer::start_async().await;

    let create = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/merged-patients")
                .query_param("restype", "container")
                .query_param("sig", "testsig")
                .header("x-ms-version", "2021-08-06");
            then.status(201);
        })
        .await;

    sink(&server).ensure_container("merged-patients").await.unwrap();

    create.assert_async().await;
}

#[tokio::test]
async fn test_ensure_container_already_exists() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(PUT).path("/merged-patients");
            then.status(409).body("ContainerAlreadyExists");
        })
        .await;

    assert!(sink(&server).ensure_container("merged-patients").await.is_ok());
}

#[tokio::test]
async fn test_ensure_container_forbidden() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(PUT).path("/merged-patients");
            then.status(403).body("AuthenticationFailed");
        })
        .await;

    let err = sink(&server)
        .ensure_container("merged-patients")
        .await
        .unwrap_err();

    match err {
        SinkError::Status { status, url, .. } => {
            assert_eq!(status, 403);
            assert!(!url.contains("testsig"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_commit_puts_block_blob() {
    let server = MockServer::start_async().await;
    let document = "Entity1,Entity1Key,Entity2,Entity2Key\nAzureAPIforFHIR_Patient,A,AzureAPIforFHIR_Patient,B\n";

    let upload = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/merged-patients/merged_patients_20240101_000000.csv")
                .header("x-ms-blob-type", "BlockBlob")
                .header("if-none-match", "*")
                .header("content-type", "text/csv")
                .body(document);
            then.status(201);
        })
        .await;

    let location = sink(&server)
        .commit(
            "merged-patients",
            "merged_patients_20240101_000000.csv",
            document.as_bytes().to_vec(),
        )
        .await
        .unwrap();

    upload.assert_async().await;
    assert!(location.ends_with("/merged-patients/merged_patients_20240101_000000.csv"));
    assert!(!location.contains("testsig"));
}

#[tokio::test]
async fn test_commit_existing_blob_rejected() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(PUT).path("/merged-patients/out.csv");
            then.status(409).body("BlobAlreadyExists");
        })
        .await;

    let err = sink(&server)
        .commit("merged-patients", "out.csv", b"x\n".to_vec())
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::AlreadyExists(_)));
}
