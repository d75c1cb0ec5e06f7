use bluemigrate_core::{BlueskyApiError, FormattedPost, ReplyRef, StrongRef};
use bluesky_client::{DestinationPlatform, PostRecord, Session, XrpcClient};
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session() -> Session {
    Session {
        did: "did:plc:abc".to_string(),
        handle: "jack.bsky.social".to_string(),
        access_jwt: "token-123".to_string(),
    }
}

fn record() -> PostRecord {
    let post = FormattedPost {
        id: "1".to_string(),
        created_at: Utc.with_ymd_and_hms(2020, 2, 3, 4, 5, 6).unwrap(),
        text: "hello".to_string(),
        facets: vec![],
        media_urls: vec![],
        reply_to_id: None,
        depth: 0,
    };
    let parent = StrongRef {
        uri: "at://did:plc:abc/app.bsky.feed.post/root".to_string(),
        cid: "bafyroot".to_string(),
    };
    PostRecord::from_post(
        &post,
        vec![],
        Some(ReplyRef {
            root: parent.clone(),
            parent,
        }),
    )
}

async fn client(server: &MockServer) -> XrpcClient {
    XrpcClient::new(&server.uri()).unwrap()
}

#[tokio::test]
async fn test_login_creates_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .and(body_partial_json(json!({
            "identifier": "jack.bsky.social",
            "password": "app-password"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "did": "did:plc:abc",
            "handle": "jack.bsky.social",
            "accessJwt": "token-123",
            "refreshJwt": "refresh-456"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client(&server)
        .await
        .login("jack.bsky.social", "app-password")
        .await
        .unwrap();
    assert_eq!(session.did, "did:plc:abc");
    assert_eq!(session.access_jwt, "token-123");
}

#[tokio::test]
async fn test_resolve_handle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/xrpc/com.atproto.identity.resolveHandle"))
        .and(query_param("handle", "jack.bsky.social"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"did": "did:plc:abc"})))
        .mount(&server)
        .await;

    let did = client(&server)
        .await
        .resolve_handle("jack.bsky.social")
        .await
        .unwrap();
    assert_eq!(did, "did:plc:abc");
}

#[tokio::test]
async fn test_upload_blob_sends_bytes_with_mime_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.uploadBlob"))
        .and(header("authorization", "Bearer token-123"))
        .and(header("content-type", "image/png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "blob": {
                "$type": "blob",
                "ref": {"$link": "bafyblob"},
                "mimeType": "image/png",
                "size": 4
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let blob = client(&server)
        .await
        .upload_media(&session(), vec![1, 2, 3, 4], "image/png")
        .await
        .unwrap();
    assert_eq!(blob.link.link, "bafyblob");
    assert_eq!(blob.size, 4);
}

#[tokio::test]
async fn test_create_record_posts_to_feed_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.createRecord"))
        .and(body_partial_json(json!({
            "repo": "did:plc:abc",
            "collection": "app.bsky.feed.post",
            "record": {
                "$type": "app.bsky.feed.post",
                "text": "hello",
                "createdAt": "2020-02-03T04:05:06.000Z",
                "reply": {"parent": {"cid": "bafyroot"}}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uri": "at://did:plc:abc/app.bsky.feed.post/3k",
            "cid": "bafypost"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let published = client(&server)
        .await
        .publish_post(&session(), &record())
        .await
        .unwrap();
    assert_eq!(published.cid, "bafypost");
}

async fn publish_with_status(template: ResponseTemplate) -> BlueskyApiError {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.repo.createRecord"))
        .respond_with(template)
        .mount(&server)
        .await;

    client(&server)
        .await
        .publish_post(&session(), &record())
        .await
        .unwrap_err()
}

#[tokio::test]
async fn test_status_mapping() {
    let rate_limited =
        publish_with_status(ResponseTemplate::new(429).insert_header("retry-after", "17")).await;
    assert!(matches!(
        rate_limited,
        BlueskyApiError::RateLimited { retry_after: 17 }
    ));

    let default_retry = publish_with_status(ResponseTemplate::new(429)).await;
    assert!(matches!(
        default_retry,
        BlueskyApiError::RateLimited { retry_after: 60 }
    ));

    let unauthorized = publish_with_status(ResponseTemplate::new(401)).await;
    assert!(matches!(unauthorized, BlueskyApiError::AuthExpired { .. }));

    let forbidden = publish_with_status(ResponseTemplate::new(403)).await;
    assert!(matches!(forbidden, BlueskyApiError::AuthExpired { .. }));

    let not_found = publish_with_status(ResponseTemplate::new(404)).await;
    assert!(matches!(not_found, BlueskyApiError::NotFound { .. }));

    let too_large = publish_with_status(ResponseTemplate::new(413)).await;
    assert!(matches!(too_large, BlueskyApiError::PayloadTooLarge));

    let server_error = publish_with_status(ResponseTemplate::new(502)).await;
    assert!(matches!(
        server_error,
        BlueskyApiError::ServerError { status_code: 502 }
    ));
}

#[tokio::test]
async fn test_bad_request_details_and_expired_token() {
    let bad_request = publish_with_status(ResponseTemplate::new(400).set_body_json(json!({
        "error": "InvalidRequest",
        "message": "Record/text must not be longer than 300 graphemes"
    })))
    .await;
    match bad_request {
        BlueskyApiError::BadRequest { details } => assert!(details.contains("300 graphemes")),
        other => panic!("expected BadRequest, got {:?}", other),
    }

    let expired = publish_with_status(ResponseTemplate::new(400).set_body_json(json!({
        "error": "ExpiredToken",
        "message": "Token has expired"
    })))
    .await;
    assert!(matches!(expired, BlueskyApiError::AuthExpired { .. }));
}
