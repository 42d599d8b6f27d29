//! S3 adapter against a mocked S3 endpoint

use std::sync::Arc;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use backup_inventory::storage::S3Backend;
use backup_inventory::{BackupLocation, BackupLocator, BackupPurger, InventoryError};
use mockito::{Matcher, Server};

const LIST_FOLDERS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>velero</Name>
  <Prefix>backups/</Prefix>
  <Delimiter>/</Delimiter>
  <MaxKeys>1000</MaxKeys>
  <KeyCount>2</KeyCount>
  <IsTruncated>false</IsTruncated>
  <CommonPrefixes><Prefix>backups/alpha-1/</Prefix></CommonPrefixes>
  <CommonPrefixes><Prefix>backups/beta-2/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

const LIST_OBJECTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>velero</Name>
  <Prefix>backups/alpha-1/</Prefix>
  <MaxKeys>1000</MaxKeys>
  <KeyCount>2</KeyCount>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>backups/alpha-1/a.json</Key><Size>10</Size></Contents>
  <Contents><Key>backups/alpha-1/b.json</Key><Size>10</Size></Contents>
</ListBucketResult>"#;

const ACCESS_DENIED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>1</RequestId></Error>"#;

const DELETE_PARTIAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DeleteResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Error><Key>backups/alpha-1/b.json</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>
</DeleteResult>"#;

fn backend(server: &Server) -> Arc<S3Backend> {
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
        .endpoint_url(server.url())
        .force_path_style(true)
        .build();
    Arc::new(S3Backend::with_client(aws_sdk_s3::Client::from_conf(config)))
}

#[tokio::test]
async fn test_exists_reads_common_prefixes() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", Matcher::Regex("^/velero".to_string()))
        .match_query(Matcher::UrlEncoded("delimiter".into(), "/".into()))
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(LIST_FOLDERS)
        .create_async()
        .await;

    let locator = BackupLocator::new(backend(&server));
    let found = locator
        .exists(&BackupLocation::new("velero", "backups"), "alpha")
        .await
        .unwrap();

    assert!(found);
    list.assert_async().await;
}

#[tokio::test]
async fn test_access_denied_is_a_listing_error() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", Matcher::Regex("^/velero".to_string()))
        .with_status(403)
        .with_header("content-type", "application/xml")
        .with_body(ACCESS_DENIED)
        .create_async()
        .await;

    let result = BackupLocator::new(backend(&server))
        .exists(&BackupLocation::new("velero", "backups"), "alpha")
        .await;

    match result {
        Err(InventoryError::List { bucket, prefix, .. }) => {
            assert_eq!(bucket, "velero");
            assert_eq!(prefix, "backups/");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_per_key_delete_errors_fail_the_purge() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", Matcher::Regex("^/velero".to_string()))
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(LIST_OBJECTS)
        .create_async()
        .await;
    let delete = server
        .mock("POST", Matcher::Regex("^/velero".to_string()))
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(DELETE_PARTIAL)
        .expect(1)
        .create_async()
        .await;

    let result = BackupPurger::new(backend(&server))
        .purge(&BackupLocation::new("velero", "backups"), "alpha-1")
        .await;

    match result {
        Err(InventoryError::Delete { deleted, .. }) => assert_eq!(deleted, 1),
        other => panic!("unexpected result: {other:?}"),
    }
    delete.assert_async().await;
}

const FOLDERS_PAGE_ONE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>velero</Name>
  <Prefix>backups/</Prefix>
  <Delimiter>/</Delimiter>
  <MaxKeys>1</MaxKeys>
  <KeyCount>1</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>folders-2</NextContinuationToken>
  <CommonPrefixes><Prefix>backups/beta-2/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

const FOLDERS_PAGE_TWO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>velero</Name>
  <Prefix>backups/</Prefix>
  <Delimiter>/</Delimiter>
  <MaxKeys>1</MaxKeys>
  <KeyCount>1</KeyCount>
  <IsTruncated>false</IsTruncated>
  <ContinuationToken>folders-2</ContinuationToken>
  <CommonPrefixes><Prefix>backups/alpha-1/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

const OBJECTS_PAGE_ONE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>velero</Name>
  <Prefix>backups/alpha-1/</Prefix>
  <MaxKeys>1</MaxKeys>
  <KeyCount>1</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>objects-2</NextContinuationToken>
  <Contents><Key>backups/alpha-1/a.json</Key><Size>10</Size></Contents>
</ListBucketResult>"#;

const OBJECTS_PAGE_TWO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>velero</Name>
  <Prefix>backups/alpha-1/</Prefix>
  <MaxKeys>1</MaxKeys>
  <KeyCount>1</KeyCount>
  <IsTruncated>false</IsTruncated>
  <ContinuationToken>objects-2</ContinuationToken>
  <Contents><Key>backups/alpha-1/b.json</Key><Size>10</Size></Contents>
</ListBucketResult>"#;

const DELETE_ALL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DeleteResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"></DeleteResult>"#;

/// Serve `first` once, then `second` for the request carrying `token`
async fn two_pages(
    server: &mut Server,
    first: &str,
    token: &str,
    second: &str,
) -> (mockito::Mock, mockito::Mock) {
    let page_one = server
        .mock("GET", Matcher::Regex("^/velero".to_string()))
        .match_query(Matcher::UrlEncoded("list-type".into(), "2".into()))
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(first)
        .expect(1)
        .create_async()
        .await;
    let page_two = server
        .mock("GET", Matcher::Regex("^/velero".to_string()))
        .match_query(Matcher::UrlEncoded("continuation-token".into(), token.into()))
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(second)
        .expect(1)
        .create_async()
        .await;
    (page_one, page_two)
}

#[tokio::test]
async fn test_exists_follows_continuation_token() {
    let mut server = Server::new_async().await;
    let (page_one, page_two) =
        two_pages(&mut server, FOLDERS_PAGE_ONE, "folders-2", FOLDERS_PAGE_TWO).await;

    let found = BackupLocator::new(backend(&server))
        .exists(&BackupLocation::new("velero", "backups"), "alpha")
        .await
        .unwrap();

    assert!(found);
    page_one.assert_async().await;
    page_two.assert_async().await;
}

#[tokio::test]
async fn test_purge_deletes_objects_from_every_page() {
    let mut server = Server::new_async().await;
    let (page_one, page_two) =
        two_pages(&mut server, OBJECTS_PAGE_ONE, "objects-2", OBJECTS_PAGE_TWO).await;
    let delete = server
        .mock("POST", Matcher::Regex("^/velero".to_string()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("backups/alpha-1/a.json".to_string()),
            Matcher::Regex("backups/alpha-1/b.json".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(DELETE_ALL)
        .expect(1)
        .create_async()
        .await;

    let report = BackupPurger::new(backend(&server))
        .purge(&BackupLocation::new("velero", "backups"), "alpha-1")
        .await
        .unwrap();

    assert_eq!(report.matched, 2);
    assert_eq!(report.deleted, 2);
    page_one.assert_async().await;
    page_two.assert_async().await;
    delete.assert_async().await;
}
