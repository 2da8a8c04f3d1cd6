use chrono::{TimeZone, Utc};
use serde_json::json;

use ghblock::github::models::extract_org;
use ghblock::github::search::{SearchHit, merge_search_results, parse_search_hit};
use ghblock::github::{ApiError, Direction, ErrorKind};
use ghblock::retry::Retryable;

fn hit(url_suffix: u32, author: &str, title: &str) -> SearchHit {
    SearchHit {
        url: format!("https://github.com/acme/api/pull/{url_suffix}"),
        repository: "acme/api".to_string(),
        number: url_suffix,
        title: title.to_string(),
        author: author.to_string(),
        updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        is_draft: false,
    }
}

#[test]
fn test_parse_search_hit() {
    let node = json!({
        "html_url": "https://github.com/acme/api/pull/42",
        "repository_url": "https://api.github.com/repos/acme/api",
        "number": 42,
        "title": "Add retries",
        "user": { "login": "alice" },
        "updated_at": "2024-05-01T12:00:00Z",
        "draft": true,
        "pull_request": { "url": "https://api.github.com/repos/acme/api/pulls/42" }
    });

    let hit = parse_search_hit(&node).unwrap();
    assert_eq!(hit.url, "https://github.com/acme/api/pull/42");
    assert_eq!(hit.repository, "acme/api");
    assert_eq!(hit.number, 42);
    assert_eq!(hit.title, "Add retries");
    assert_eq!(hit.author, "alice");
    assert!(hit.is_draft);
    assert_eq!(
        hit.updated_at,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    );
}

#[test]
fn test_parse_search_hit_skips_plain_issues() {
    let node = json!({
        "html_url": "https://github.com/acme/api/issues/7",
        "repository_url": "https://api.github.com/repos/acme/api",
        "number": 7,
        "title": "Bug",
        "user": { "login": "alice" },
        "updated_at": "2024-05-01T12:00:00Z"
    });
    assert!(parse_search_hit(&node).is_none());
}

#[test]
fn test_parse_search_hit_missing_author() {
    let node = json!({
        "html_url": "https://github.com/acme/api/pull/9",
        "repository_url": "https://api.github.com/repos/acme/api",
        "number": 9,
        "title": "Orphaned",
        "user": null,
        "updated_at": "2024-05-01T12:00:00Z",
        "pull_request": {}
    });
    let hit = parse_search_hit(&node).unwrap();
    assert_eq!(hit.author, "ghost");
    assert!(!hit.is_draft);
}

#[test]
fn test_merge_splits_by_author() {
    let snapshot = merge_search_results(
        "octocat",
        [vec![hit(1, "alice", "theirs"), hit(2, "octocat", "mine")]],
        200,
    );

    assert_eq!(snapshot.incoming.len(), 1);
    assert_eq!(snapshot.outgoing.len(), 1);
    assert_eq!(snapshot.incoming[0].direction, Direction::Incoming);
    assert_eq!(snapshot.outgoing[0].direction, Direction::Outgoing);
    assert!(!snapshot.outgoing[0].flags.needs_review);
}

#[test]
fn test_merge_later_batch_wins() {
    let snapshot = merge_search_results(
        "octocat",
        [
            vec![hit(1, "alice", "old title"), hit(2, "bob", "second")],
            vec![hit(1, "alice", "new title")],
        ],
        200,
    );

    assert_eq!(snapshot.len(), 2);
    // Position of first sighting is kept.
    assert_eq!(snapshot.incoming[0].number, 1);
    assert_eq!(snapshot.incoming[0].title, "new title");
    assert_eq!(snapshot.incoming[1].number, 2);
}

#[test]
fn test_merge_truncates_to_limit() {
    let hits: Vec<_> = (1..=5).map(|n| hit(n, "alice", "pr")).collect();
    let snapshot = merge_search_results("octocat", [hits], 3);

    assert_eq!(snapshot.len(), 3);
    let numbers: Vec<u32> = snapshot.iter().map(|pr| pr.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn test_merge_empty() {
    let snapshot = merge_search_results("octocat", Vec::<Vec<SearchHit>>::new(), 200);
    assert!(snapshot.is_empty());
}

#[test]
fn test_error_classification() {
    let cases = [
        (401, false, ErrorKind::Permanent),
        (403, false, ErrorKind::Permanent),
        (403, true, ErrorKind::Transient),
        (404, false, ErrorKind::Permanent),
        (422, false, ErrorKind::Permanent),
        (429, false, ErrorKind::Transient),
        (500, false, ErrorKind::Transient),
        (503, false, ErrorKind::Transient),
    ];
    for (status, exhausted, kind) in cases {
        let err = ApiError::from_status(status, exhausted, "body");
        assert_eq!(err.kind, kind, "status {status} exhausted={exhausted}");
        assert_eq!(err.status, Some(status));
        assert_eq!(err.is_unrecoverable(), kind == ErrorKind::Permanent);
    }
}

#[test]
fn test_error_messages() {
    assert!(
        ApiError::from_status(401, false, "")
            .to_string()
            .contains("authentication failed")
    );
    assert_eq!(ApiError::from_status(403, true, "").to_string(), "rate limited");
    assert_eq!(
        ApiError::from_status(502, false, "bad gateway").to_string(),
        "HTTP 502: bad gateway"
    );
}

#[test]
fn test_extract_org() {
    assert_eq!(extract_org("acme/api"), Some("acme"));
    assert_eq!(extract_org("acme"), Some("acme"));
    assert_eq!(extract_org("/api"), None);
    assert_eq!(extract_org(""), None);
}

#[test]
fn test_decode_errors_are_permanent() {
    let err = serde_json::from_str::<serde_json::Value>("{\"items\": [").unwrap_err();
    let api = ApiError::decode("Failed to parse GitHub response", &err);

    assert_eq!(api.kind, ErrorKind::Permanent);
    assert!(api.is_unrecoverable());
    assert!(api.status.is_none());
    assert!(api.to_string().starts_with("Failed to parse GitHub response: "));
}
