use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use clap::ValueEnum;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::models::{ContestObservation, HistoryRow};

pub const DEFAULT_SITE_URL: &str = "https://atcoder.jp";
pub const DEFAULT_FEED_URL: &str = "https://kenkoooo.com/atcoder/resources/contests.json";

const HISTORY_COLUMNS: usize = 7;

/// Where the latest contest is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Aggregator feed of every contest, filtered by id prefix.
    Feed,
    /// The user's own history table; the first row is the latest.
    History,
}

#[async_trait]
pub trait ContestSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_latest_contest(&self) -> Result<Option<ContestObservation>, SourceError>;

    /// History rows for the user, or `None` when the user did not take part
    /// in `contest_id` or the page could not be understood.
    async fn fetch_user_history(&self, contest_id: &str)
        -> Result<Option<Vec<HistoryRow>>, SourceError>;

    /// Label/value prose from a share page.
    async fn fetch_share_detail(&self, share_url: &str) -> Result<Option<String>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub user_id: String,
    pub contest_prefix: String,
    pub site_url: String,
    pub feed_url: String,
    pub timeout: StdDuration,
    /// Offset used for history dates that carry no zone.
    pub offset: FixedOffset,
}

pub struct AtCoderSource {
    client: reqwest::Client,
    settings: SourceSettings,
}

impl AtCoderSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("acbot/", env!("CARGO_PKG_VERSION"), " (rating notifier)"))
            .timeout(settings.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, settings })
    }

    fn history_url(&self) -> String {
        format!(
            "{}/users/{}/history",
            self.settings.site_url, self.settings.user_id
        )
    }

    fn share_url(&self, contest_id: &str) -> String {
        format!("{}/share/{}", self.history_url(), contest_id)
    }

    /// GET `url`, mapping 404 to `None` and other failures to `SourceError`.
    async fn get_text(&self, url: &str) -> Result<Option<String>, SourceError> {
        debug!(url = %url, "Fetching");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::transport(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::transport(url, e))?;
        debug!(url = %url, bytes = body.len(), "Received response");
        Ok(Some(body))
    }

    async fn fetch_history_rows(&self) -> Result<Option<Vec<HistoryRow>>, SourceError> {
        let url = self.history_url();
        match self.get_text(&url).await? {
            Some(html) => Ok(parse_history_table(&html, &self.settings.site_url)),
            None => {
                warn!(url = %url, "History page not found");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ContestSource for AtCoderSource {
    fn name(&self) -> &'static str {
        match self.settings.kind {
            SourceKind::Feed => "feed",
            SourceKind::History => "history",
        }
    }

    async fn fetch_latest_contest(&self) -> Result<Option<ContestObservation>, SourceError> {
        match self.settings.kind {
            SourceKind::Feed => {
                let url = &self.settings.feed_url;
                let Some(body) = self.get_text(url).await? else {
                    warn!(url = %url, "Contest feed not found");
                    return Ok(None);
                };
                let latest = latest_from_feed(&body, &self.settings.contest_prefix).map(|mut c| {
                    c.share_url = Some(self.share_url(&c.contest_id));
                    c
                });
                if let Some(ref c) = latest {
                    info!(contest_id = %c.contest_id, title = %c.title, "Latest contest from feed");
                }
                Ok(latest)
            }
            SourceKind::History => {
                let rows = self.fetch_history_rows().await?.unwrap_or_default();
                let latest = rows
                    .first()
                    .and_then(|row| observation_from_row(row, self.settings.offset));
                if let Some(ref c) = latest {
                    info!(contest_id = %c.contest_id, title = %c.title, "Latest contest from history");
                }
                Ok(latest)
            }
        }
    }

    async fn fetch_user_history(
        &self,
        contest_id: &str,
    ) -> Result<Option<Vec<HistoryRow>>, SourceError> {
        if self.settings.kind == SourceKind::Feed {
            let share_url = self.share_url(contest_id);
            if self.get_text(&share_url).await?.is_none() {
                info!(contest_id = %contest_id, "Share page returned 404, user did not participate");
                return Ok(None);
            }
        }
        self.fetch_history_rows().await
    }

    async fn fetch_share_detail(&self, share_url: &str) -> Result<Option<String>, SourceError> {
        Ok(self
            .get_text(share_url)
            .await?
            .and_then(|html| parse_share_panel(&html)))
    }
}

#[derive(Debug, Deserialize)]
struct FeedContest {
    id: String,
    start_epoch_second: i64,
    duration_second: i64,
    title: String,
}

/// Most recent contest whose id starts with `prefix`.
fn latest_from_feed(body: &str, prefix: &str) -> Option<ContestObservation> {
    let contests: Vec<FeedContest> = match serde_json::from_str(body) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Contest feed has an unexpected shape");
            return None;
        }
    };

    let total = contests.len();
    let latest = contests
        .into_iter()
        .filter(|c| c.id.starts_with(prefix) && c.start_epoch_second > 0)
        .max_by_key(|c| c.start_epoch_second);

    let Some(latest) = latest else {
        info!(prefix = %prefix, total_contests = total, "No contest matches prefix");
        return None;
    };

    let start_time = match Utc.timestamp_opt(latest.start_epoch_second, 0).single() {
        Some(t) => t,
        None => {
            warn!(contest_id = %latest.id, "Contest start time out of range");
            return None;
        }
    };

    Some(ContestObservation {
        contest_id: latest.id,
        title: latest.title,
        start_time,
        duration: Duration::seconds(latest.duration_second.max(0)),
        share_url: None,
    })
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("Invalid selector")
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn absolute_url(href: &str, site_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", site_url.trim_end_matches('/'), href.trim_start_matches('/'))
    }
}

/// Rows of `table#history`. Rows with too few cells are skipped; a missing
/// table is a parse failure and yields `None`.
fn parse_history_table(html: &str, site_url: &str) -> Option<Vec<HistoryRow>> {
    let document = Html::parse_document(html);
    let row_selector = selector("table#history tbody tr");
    let td_selector = selector("td");
    let a_selector = selector("a");

    if document.select(&selector("table#history")).next().is_none() {
        warn!("History table not found");
        return None;
    }

    let mut rows = Vec::new();
    let mut skipped = 0;

    for tr in document.select(&row_selector) {
        let tds: Vec<_> = tr.select(&td_selector).collect();
        if tds.len() < HISTORY_COLUMNS {
            skipped += 1;
            continue;
        }

        let contest_link = tds[1].select(&a_selector).next();
        let (contest_name, contest_href) = match contest_link {
            Some(a) => (
                cell_text(&a),
                a.value().attr("href").unwrap_or_default().to_string(),
            ),
            None => (cell_text(&tds[1]), String::new()),
        };

        let share_href = tds[6]
            .select(&a_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| absolute_url(href, site_url));

        rows.push(HistoryRow {
            date: cell_text(&tds[0]),
            contest_name,
            contest_href,
            rank: cell_text(&tds[2]),
            performance: cell_text(&tds[3]),
            old_rating: cell_text(&tds[4]),
            new_rating: cell_text(&tds[5]),
            share_href,
        });
    }

    if skipped > 0 {
        warn!(skipped = skipped, parsed = rows.len(), "Skipped history rows with too few columns");
    }
    debug!(rows = rows.len(), "Parsed history table");

    Some(rows)
}

const DATE_LAYOUTS_WITH_ZONE: &[&str] = &["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z"];
const DATE_LAYOUTS_LOCAL: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M", "%Y-%m-%d %H:%M"];

fn parse_history_date(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let text = text.trim();

    for layout in DATE_LAYOUTS_WITH_ZONE {
        if let Ok(dt) = DateTime::parse_from_str(text, layout) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for layout in DATE_LAYOUTS_LOCAL {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, layout) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}

fn observation_from_row(row: &HistoryRow, offset: FixedOffset) -> Option<ContestObservation> {
    let contest_id = row
        .contest_href
        .split(['?', '#'])
        .next()
        .and_then(|path| path.split('/').filter(|s| !s.is_empty()).last())
        .map(str::to_string);

    let Some(contest_id) = contest_id else {
        warn!(contest = %row.contest_name, "History row has no contest link");
        return None;
    };

    let Some(start_time) = parse_history_date(&row.date, offset) else {
        warn!(contest_id = %contest_id, date = %row.date, "Unrecognised history date");
        return None;
    };

    Some(ContestObservation {
        contest_id,
        title: row.contest_name.clone(),
        start_time,
        duration: Duration::zero(),
        share_url: row.share_href.clone(),
    })
}

/// Trimmed, non-empty text lines of the share page's result panel.
fn parse_share_panel(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let panel = document.select(&selector("div.panel-body")).next()?;

    let lines: Vec<&str> = panel
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const FEED: &str = r#"[
        {"id": "abc299", "start_epoch_second": 1682164800, "duration_second": 6000, "title": "AtCoder Beginner Contest 299", "rate_change": " ~ 1999"},
        {"id": "arc160", "start_epoch_second": 1999999999, "duration_second": 7200, "title": "AtCoder Regular Contest 160", "rate_change": " ~ 2799"},
        {"id": "abc300", "start_epoch_second": 1682769600, "duration_second": 6000, "title": "AtCoder Beginner Contest 300", "rate_change": " ~ 1999"},
        {"id": "abc_old", "start_epoch_second": 0, "duration_second": 6000, "title": "Unscheduled", "rate_change": "-"}
    ]"#;

    const HISTORY_HTML: &str = r#"
        <html><body>
        <table id="history">
          <thead><tr><th>Date</th><th>Contest</th></tr></thead>
          <tbody>
            <tr>
              <td>2023-04-29 21:00:00+0900</td>
              <td><a href="/contests/abc300">AtCoder Beginner Contest 300</a></td>
              <td>4219</td><td>1200</td><td>1000</td><td>1051</td>
              <td><a href="/users/alice/history/share/abc300">Share</a></td>
            </tr>
            <tr><td>broken</td><td>row</td></tr>
            <tr>
              <td>2023/04/22 21:00</td>
              <td><a href="/contests/abc299">AtCoder Beginner Contest 299</a></td>
              <td>5000</td><td>900</td><td>-</td><td>1000</td>
              <td></td>
            </tr>
          </tbody>
        </table>
        </body></html>"#;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    #[test]
    fn test_latest_from_feed_filters_and_sorts() {
        let latest = latest_from_feed(FEED, "abc").unwrap();
        assert_eq!(latest.contest_id, "abc300");
        assert_eq!(latest.title, "AtCoder Beginner Contest 300");
        assert_eq!(latest.duration, Duration::seconds(6000));
        assert_eq!(latest.start_time.timestamp(), 1682769600);
    }

    #[test]
    fn test_latest_from_feed_empty_after_filter() {
        assert!(latest_from_feed(FEED, "agc").is_none());
        assert!(latest_from_feed("[]", "abc").is_none());
    }

    #[test]
    fn test_latest_from_feed_bad_shape() {
        assert!(latest_from_feed(r#"{"error": "maintenance"}"#, "abc").is_none());
        assert!(latest_from_feed("<html>", "abc").is_none());
    }

    #[test]
    fn test_parse_history_table() {
        let rows = parse_history_table(HISTORY_HTML, "https://atcoder.jp").unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].contest_href, "/contests/abc300");
        assert_eq!(rows[0].contest_name, "AtCoder Beginner Contest 300");
        assert_eq!(rows[0].old_rating, "1000");
        assert_eq!(rows[0].new_rating, "1051");
        assert_eq!(
            rows[0].share_href.as_deref(),
            Some("https://atcoder.jp/users/alice/history/share/abc300")
        );

        assert_eq!(rows[1].old_rating, "-");
        assert!(rows[1].share_href.is_none());
    }

    #[test]
    fn test_parse_history_table_missing() {
        assert!(parse_history_table("<html><body><p>maintenance</p></body></html>", "https://atcoder.jp").is_none());
    }

    #[test]
    fn test_observation_from_first_row() {
        let rows = parse_history_table(HISTORY_HTML, "https://atcoder.jp").unwrap();
        let latest = observation_from_row(&rows[0], jst()).unwrap();
        assert_eq!(latest.contest_id, "abc300");
        assert_eq!(latest.start_time, Utc.with_ymd_and_hms(2023, 4, 29, 12, 0, 0).unwrap());
        assert_eq!(latest.duration, Duration::zero());

        let older = observation_from_row(&rows[1], jst()).unwrap();
        assert_eq!(older.contest_id, "abc299");
        assert_eq!(older.start_time, Utc.with_ymd_and_hms(2023, 4, 22, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_share_panel() {
        let html = r#"<div class="panel panel-default"><div class="panel-body">
            <p>Contest Name</p>
            <p>  AtCoder Beginner Contest 300  </p>
            <span>Rank</span><span>4219th</span>
        </div></div>"#;
        assert_eq!(
            parse_share_panel(html).as_deref(),
            Some("Contest Name\nAtCoder Beginner Contest 300\nRank\n4219th")
        );
        assert!(parse_share_panel("<div class=\"other\">x</div>").is_none());
    }

    /// Answers every request on a local port with `status` and `body`.
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    /// Accepts connections and never answers.
    async fn serve_silent() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    tokio::time::sleep(StdDuration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });
        format!("http://{}", addr)
    }

    fn source(kind: SourceKind, base_url: &str) -> AtCoderSource {
        AtCoderSource::new(SourceSettings {
            kind,
            user_id: "alice".to_string(),
            contest_prefix: "abc".to_string(),
            site_url: base_url.to_string(),
            feed_url: format!("{}/contests.json", base_url),
            timeout: StdDuration::from_secs(1),
            offset: jst(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_share_page_means_not_participated() {
        let base = serve("404 Not Found", "").await;
        let result = source(SourceKind::Feed, &base)
            .fetch_user_history("abc300")
            .await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_server_error_is_status_error() {
        let base = serve("503 Service Unavailable", "maintenance").await;
        let source = source(SourceKind::Feed, &base);

        let result = source.fetch_latest_contest().await;
        assert!(matches!(result, Err(SourceError::Status { status: 503, .. })));

        let result = source.fetch_user_history("abc300").await;
        assert!(matches!(result, Err(SourceError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let base = serve_silent().await;
        let result = source(SourceKind::Feed, &base)
            .fetch_user_history("abc300")
            .await;
        assert!(matches!(result, Err(SourceError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_feed_served_over_http() {
        let base = serve("200 OK", FEED).await;
        let latest = source(SourceKind::Feed, &base)
            .fetch_latest_contest()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.contest_id, "abc300");
        assert_eq!(
            latest.share_url,
            Some(format!("{}/users/alice/history/share/abc300", base))
        );
    }

    #[tokio::test]
    async fn test_history_served_over_http() {
        let base = serve("200 OK", HISTORY_HTML).await;
        let source = source(SourceKind::History, &base);

        let latest = source.fetch_latest_contest().await.unwrap().unwrap();
        assert_eq!(latest.contest_id, "abc300");

        let rows = source.fetch_user_history("abc300").await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("/users/a", "https://atcoder.jp/"), "https://atcoder.jp/users/a");
        assert_eq!(absolute_url("https://x.y/z", "https://atcoder.jp"), "https://x.y/z");
    }
}
