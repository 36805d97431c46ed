//! Concurrent collection of the primary audit page and its linked pages.

use super::{AuditEvent, AuditPage, DateRange, normalize};
use crate::cloud::PlatformClient;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use std::time::Instant;

/// A linked page that contributed nothing because it could not be fetched.
#[derive(Debug, Clone)]
pub struct LinkFailure {
    pub url: String,
    pub reason: String,
}

/// Merged result of one aggregation run. `events` has no defined order.
#[derive(Debug, Clone, Default)]
pub struct AuditCollection {
    pub events: Vec<AuditEvent>,
    pub links_total: usize,
    pub failures: Vec<LinkFailure>,
}

impl AuditCollection {
    pub fn failed_links(&self) -> usize {
        self.failures.len()
    }
}

pub struct AuditCollector {
    client: PlatformClient,
    max_workers: usize,
}

impl AuditCollector {
    pub fn new(client: PlatformClient, max_workers: usize) -> Self {
        Self {
            client,
            max_workers: max_workers.max(1),
        }
    }

    /// Fetch the primary page, then everything it links to.
    pub async fn collect_all(&self, range: &DateRange) -> Result<AuditCollection> {
        let primary = self.client.fetch_audit_page().await?;
        self.collect(primary, range).await
    }

    /// Merge `primary` with all of its linked pages.
    ///
    /// Links are fetched on spawned tasks, at most `max_workers` at a time.
    /// A link that fails is logged and skipped; an authentication failure in
    /// any task fails the whole collection once every task has finished.
    pub async fn collect(&self, primary: AuditPage, range: &DateRange) -> Result<AuditCollection> {
        let start = Instant::now();
        let mut events = normalize(&primary.events, range);
        tracing::debug!(
            "Primary page: {} of {} events in range",
            events.len(),
            primary.events.len()
        );

        let urls: Vec<String> = primary
            .links
            .into_iter()
            .filter_map(|link| link.url)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        let links_total = urls.len();

        tracing::info!(
            "Fetching {} linked audit pages with {} workers",
            links_total,
            self.max_workers.min(links_total.max(1))
        );

        let results: Vec<_> = stream::iter(urls)
            .map(|url| {
                let client = self.client.clone();
                let range = *range;
                async move {
                    let fetch_url = url.clone();
                    let task = tokio::spawn(async move {
                        let records = client.fetch_link_page(&fetch_url).await?;
                        Ok::<_, Error>(normalize(&records, &range))
                    });
                    (url, task.await)
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut failures = Vec::new();
        let mut fatal: Option<Error> = None;

        for (url, result) in results {
            match result {
                Ok(Ok(found)) => {
                    tracing::debug!("{} events in range from {}", found.len(), url);
                    events.extend(found);
                }
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::error!("Authentication failed while fetching {}: {}", url, e);
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error fetching {}: {}", url, e);
                    failures.push(LinkFailure {
                        url,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Fetch task for {} did not complete: {}", url, e);
                    failures.push(LinkFailure {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        tracing::info!(
            "Collected {} audit events ({} of {} links failed) in {:.1}s",
            events.len(),
            failures.len(),
            links_total,
            start.elapsed().as_secs_f64()
        );

        Ok(AuditCollection {
            events,
            links_total,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLink;
    use crate::auth::token::tests::{TOKEN_PATH, manager_for};
    use crate::cloud::client::tests::client_for;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page(events: serde_json::Value, links: &[String]) -> AuditPage {
        AuditPage {
            events: serde_json::from_value(events).unwrap(),
            links: links
                .iter()
                .map(|url| AuditLink {
                    url: Some(url.clone()),
                })
                .collect(),
        }
    }

    async fn mount_link(server: &MockServer, route: &str, response: ResponseTemplate) -> String {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
        format!("{}{}", server.uri(), route)
    }

    fn event(date: &str, action: &str) -> serde_json::Value {
        json!({"eventDate": date, "actionType": action})
    }

    fn actions(collection: &AuditCollection) -> Vec<String> {
        let mut actions: Vec<String> = collection
            .events
            .iter()
            .filter_map(|e| e.action_type.clone())
            .collect();
        actions.sort();
        actions
    }

    fn may_2024() -> DateRange {
        DateRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 5, 1),
            NaiveDate::from_ymd_opt(2024, 5, 31),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_merges_primary_and_both_link_shapes_within_range() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let bare = mount_link(
            &server,
            "/api/audit/logs/1",
            ResponseTemplate::new(200).set_body_json(json!([
                event("2024-05-10T10:00:00.1Z", "bare-in"),
                event("2024-04-10T10:00:00Z", "bare-out"),
            ])),
        )
        .await;
        let wrapped = mount_link(
            &server,
            "/api/audit/logs/2",
            ResponseTemplate::new(200).set_body_json(json!({"events": [
                event("2024-05-31T23:59:59.999999Z", "wrapped-in"),
                event("2024-06-01T00:00:00Z", "wrapped-out"),
            ]})),
        )
        .await;

        let primary = page(
            json!([
                event("2024-05-01T00:00:00Z", "primary-in"),
                event("2024-07-01T00:00:00Z", "primary-out"),
                {"actionType": "undated"},
            ]),
            &[bare, wrapped],
        );

        let collection = AuditCollector::new(client, 8)
            .collect(primary, &may_2024())
            .await
            .unwrap();

        assert_eq!(collection.links_total, 2);
        assert_eq!(collection.failed_links(), 0);
        assert_eq!(
            actions(&collection),
            vec!["bare-in", "primary-in", "wrapped-in"]
        );

        let range = may_2024();
        assert!(collection.events.iter().all(|e| range.contains(e.timestamp)));
    }

    #[tokio::test]
    async fn test_failing_links_contribute_nothing() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let mut links = Vec::new();
        for day in 0..4 {
            let route = format!("/api/audit/logs/{}", day);
            let url = mount_link(
                &server,
                &route,
                ResponseTemplate::new(200).set_body_json(json!([
                    event("2024-05-02T10:00:00Z", &format!("day-{}-a", day)),
                    event("2024-05-02T11:00:00Z", &format!("day-{}-b", day)),
                ])),
            )
            .await;
            links.push(url);
        }
        links.push(
            mount_link(
                &server,
                "/api/audit/logs/broken",
                ResponseTemplate::new(500).set_body_string("boom"),
            )
            .await,
        );
        links.push(
            mount_link(
                &server,
                "/api/audit/logs/garbled",
                ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
            )
            .await,
        );
        // Nothing listens on port 9 of the loopback interface
        links.push("http://127.0.0.1:9/api/audit/logs/unreachable".to_string());

        let collection = AuditCollector::new(client, 2)
            .collect(page(json!([]), &links), &DateRange::default())
            .await
            .unwrap();

        assert_eq!(collection.links_total, 7);
        assert_eq!(collection.failed_links(), 3);
        let mut expected: Vec<String> = (0..4)
            .flat_map(|day| [format!("day-{}-a", day), format!("day-{}-b", day)])
            .collect();
        expected.sort();
        assert_eq!(actions(&collection), expected);

        let mut failed: Vec<&str> = collection
            .failures
            .iter()
            .map(|f| f.url.rsplit('/').next().unwrap_or_default())
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["broken", "garbled", "unreachable"]);
    }

    #[tokio::test]
    async fn test_unbounded_range_keeps_undated_events_and_duplicates() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let link = mount_link(
            &server,
            "/api/audit/logs/dup",
            ResponseTemplate::new(200).set_body_json(json!([
                event("2024-05-02T10:00:00Z", "repeat"),
                event("2024-05-02T10:00:00Z", "repeat"),
            ])),
        )
        .await;
        let primary = page(json!([{"actionType": "undated"}]), &[link]);

        let collection = AuditCollector::new(client, 8)
            .collect(primary, &DateRange::default())
            .await
            .unwrap();
        assert_eq!(actions(&collection), vec!["repeat", "repeat", "undated"]);
    }

    #[tokio::test]
    async fn test_links_without_url_are_ignored() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let primary = AuditPage {
            events: Vec::new(),
            links: vec![AuditLink { url: None }, AuditLink {
                url: Some("  ".into()),
            }],
        };
        let collection = AuditCollector::new(client, 8)
            .collect(primary, &DateRange::default())
            .await
            .unwrap();

        assert_eq!(collection.links_total, 0);
        assert_eq!(collection.failed_links(), 0);
        assert!(collection.events.is_empty());
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&server)
            .await;
        let client = PlatformClient::with_parts(
            reqwest::Client::new(),
            &server.uri(),
            Arc::new(manager_for(&server)),
        );

        let link = format!("{}/api/audit/logs/1", server.uri());
        let err = AuditCollector::new(client, 8)
            .collect(page(json!([]), &[link]), &DateRange::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Authentication { status: Some(401), .. }));
    }

    #[tokio::test]
    async fn test_collect_all_fetches_primary_first() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        let link = mount_link(
            &server,
            "/api/audit/logs/1",
            ResponseTemplate::new(200).set_body_json(json!({"events": [
                event("2024-05-03T10:00:00Z", "linked"),
            ]})),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/api/audit/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [event("2024-05-04T10:00:00.123Z", "today")],
                "links": [{"url": link}],
            })))
            .mount(&server)
            .await;

        let collection = AuditCollector::new(client, 8)
            .collect_all(&may_2024())
            .await
            .unwrap();
        assert_eq!(actions(&collection), vec!["linked", "today"]);
    }
}
