//! Integration tests for page fetching and attachment classification.

use harvester_core::classify::MatchReason;
use harvester_core::{
    AttachmentClassifier, ClassifyError, FailureKind, HarvestConfig, HttpClient, NetworkFailure,
    OrdinalLedger, SourceRecord,
};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOTICE_PAGE: &str = r#"<html><body>
<h1>Notice</h1>
<a href="/files/budget.pdf">Budget</a>
<a href="files/annex.DOCX">Annex</a>
<a href="/getfile?id=3">点击下载</a>
<a href="/blob/42" download>Raw data</a>
<a href="/about">About us</a>
<a href="mailto:office@example.com">Mail</a>
</body></html>"#;

fn client() -> HttpClient {
    HttpClient::from_config(&HarvestConfig::default()).unwrap()
}

fn classifier() -> AttachmentClassifier {
    AttachmentClassifier::from_config(&HarvestConfig::default())
}

#[tokio::test]
async fn test_classify_source_finds_attachments_on_live_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news/notice.html"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(NOTICE_PAGE))
        .mount(&server)
        .await;

    let record = SourceRecord::new(1, format!("{}/news/notice.html", server.uri()), "Notice");
    let page = classifier()
        .classify_source(&client(), &record)
        .await
        .unwrap();

    let urls: Vec<_> = page.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/files/budget.pdf", server.uri()),
            format!("{}/news/files/annex.DOCX", server.uri()),
            format!("{}/getfile?id=3", server.uri()),
            format!("{}/blob/42", server.uri()),
        ]
    );
    let reasons: Vec<_> = page.links.iter().map(|l| l.reason).collect();
    assert_eq!(
        reasons,
        vec![
            MatchReason::Extension,
            MatchReason::Extension,
            MatchReason::Keyword,
            MatchReason::DownloadAttribute,
        ]
    );
    assert!(page.discarded >= 1);
}

#[tokio::test]
async fn test_gbk_page_declared_in_meta_matches_keywords() {
    let server = MockServer::start().await;
    let mut body = br#"<html><head><meta charset="gbk"></head><body><a href="/getfile?id=9">"#
        .to_vec();
    body.extend_from_slice(&encoding_rs::GBK.encode("下载").0);
    body.extend_from_slice(b"</a></body></html>");
    Mock::given(method("GET"))
        .and(path("/gbk"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(&server)
        .await;

    let record = SourceRecord::new(1, format!("{}/gbk", server.uri()), "GBK");
    let page = classifier()
        .classify_source(&client(), &record)
        .await
        .unwrap();

    assert_eq!(page.links.len(), 1);
    assert_eq!(page.links[0].reason, MatchReason::Keyword);
    assert_eq!(page.links[0].filename_hint, "下载");
    assert_eq!(page.discarded, 0);
}

#[tokio::test]
async fn test_relative_links_resolve_against_redirect_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/moved/index.html", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/moved/index.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="report.pdf">Report</a>"#),
        )
        .mount(&server)
        .await;

    let record = SourceRecord::new(1, format!("{}/old", server.uri()), "Moved");
    let page = classifier()
        .classify_source(&client(), &record)
        .await
        .unwrap();

    assert_eq!(page.links.len(), 1);
    assert_eq!(
        page.links[0].url,
        format!("{}/moved/report.pdf", server.uri())
    );
}

#[tokio::test]
async fn test_error_status_is_parse_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let record = SourceRecord::new(1, format!("{}/broken", server.uri()), "Broken");
    let err = classifier()
        .classify_source(&client(), &record)
        .await
        .unwrap_err();

    assert!(matches!(err, ClassifyError::Fetch(_)));
    assert_eq!(err.kind(), FailureKind::Parse);
}

#[tokio::test]
async fn test_unreachable_host_is_connection_error() {
    let server = MockServer::builder().start().await;
    let uri = server.uri();
    drop(server);

    let record = SourceRecord::new(1, format!("{uri}/gone"), "Gone");
    let err = classifier()
        .classify_source(&client(), &record)
        .await
        .unwrap_err();

    assert_eq!(
        err.kind(),
        FailureKind::Network(NetworkFailure::ConnectionError)
    );
}

#[tokio::test]
async fn test_ledger_numbers_pages_sharing_a_title_contiguously() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/a.pdf">A</a><a href="/b.pdf">B</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/c.pdf">C</a>"#))
        .mount(&server)
        .await;

    let client = client();
    let classifier = classifier();
    let mut ledger = OrdinalLedger::new();
    let mut candidates = Vec::new();
    for (index, route) in [(1, "/p1"), (2, "/p2")] {
        let record = SourceRecord::new(index, format!("{}{route}", server.uri()), "Shared");
        let page = classifier.classify_source(&client, &record).await.unwrap();
        candidates.extend(ledger.stamp(&record, page.links));
    }

    let ordinals: Vec<_> = candidates.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert_eq!(candidates[2].source_index, 2);
    assert_eq!(ledger.issued("Shared"), 3);
}
