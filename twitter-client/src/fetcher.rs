use crate::api::{parse_tweets, SourcePlatform};
use crate::rate_limiter::EndpointBudgetTracker;
use bluemigrate_core::{RawPost, TwitterApiError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

pub const ENDPOINT_USER_BY_SCREEN_NAME: &str = "get_user_by_screen_name";
pub const ENDPOINT_USER_TWEETS: &str = "get_user_tweets";
pub const ENDPOINT_TWEET_BY_ID: &str = "get_tweet_by_id";

/// Budget-guarded access to the source platform.
///
/// Every fetch holds the shared single-flight permit for its whole duration,
/// so at most one fetch runs across all workers at any time.
#[derive(Clone)]
pub struct PostFetcher {
    client: Arc<dyn SourcePlatform>,
    budget: Arc<EndpointBudgetTracker>,
    single_flight: Arc<Semaphore>,
}

impl PostFetcher {
    pub fn new(
        client: Arc<dyn SourcePlatform>,
        budget: Arc<EndpointBudgetTracker>,
        single_flight: Arc<Semaphore>,
    ) -> Self {
        Self {
            client,
            budget,
            single_flight,
        }
    }

    /// Fetcher with its own single-flight gate. Use [`PostFetcher::new`] to
    /// share one gate between several fetchers.
    pub fn standalone(
        client: Arc<dyn SourcePlatform>,
        budget: Arc<EndpointBudgetTracker>,
    ) -> Self {
        Self::new(client, budget, Arc::new(Semaphore::new(1)))
    }

    pub fn budget(&self) -> &Arc<EndpointBudgetTracker> {
        &self.budget
    }

    /// Collects up to `limit` migratable posts from a user's timeline,
    /// following the pagination cursor until it runs out.
    pub async fn fetch_user_posts(
        &self,
        handle: &str,
        limit: usize,
    ) -> Result<Vec<RawPost>, TwitterApiError> {
        let _permit = self.single_flight.acquire().await.map_err(gate_closed)?;

        let user = self
            .budget
            .guarded_call(ENDPOINT_USER_BY_SCREEN_NAME, || {
                self.client.get_user_by_handle(handle)
            })
            .await?;
        debug!(handle = %handle, user_id = %user.id, "Resolved source user");

        let mut posts: Vec<RawPost> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept = 0usize;
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page_cursor = cursor.as_deref();
            let page = self
                .budget
                .guarded_call(ENDPOINT_USER_TWEETS, || {
                    self.client.get_user_posts(&user, page_cursor)
                })
                .await?;
            pages += 1;

            if page.posts.is_empty() {
                debug!(handle = %handle, "Empty page, stopping pagination");
                break;
            }

            for post in parse_tweets(page.posts) {
                // Pages may overlap
                if !seen.insert(post.id.clone()) {
                    continue;
                }
                if !post.is_excluded() {
                    kept += 1;
                }
                posts.push(post);
                if kept >= limit {
                    break;
                }
            }
            info!(
                handle = %handle,
                "Fetched page {} ({} posts collected so far)", pages, kept
            );

            if kept >= limit {
                break;
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            handle = %handle,
            "Collected {} posts from {} pages", kept, pages
        );
        Ok(posts)
    }

    /// Fetches the conversation a status URL points at: ancestors, the post
    /// itself, then its continuation.
    pub async fn fetch_thread(&self, thread_url: &str) -> Result<Vec<RawPost>, TwitterApiError> {
        let post_id = parse_status_id(thread_url)?;
        let _permit = self.single_flight.acquire().await.map_err(gate_closed)?;

        info!(post_id = %post_id, "Extracting thread");
        let detail = self
            .budget
            .guarded_call(ENDPOINT_TWEET_BY_ID, || {
                self.client.get_post_by_id(&post_id)
            })
            .await?;

        Ok(parse_tweets(detail.into_conversation()))
    }
}

fn gate_closed<E>(_: E) -> TwitterApiError {
    TwitterApiError::RequestFailed {
        status_code: None,
        message: "source fetch gate closed".to_string(),
    }
}

/// Extracts the numeric id following `/status/` in a post URL.
pub fn parse_status_id(thread_url: &str) -> Result<String, TwitterApiError> {
    let invalid = || TwitterApiError::InvalidThreadUrl {
        url: thread_url.to_string(),
    };
    let url = Url::parse(thread_url).map_err(|_| invalid())?;
    let mut segments = url.path_segments().ok_or_else(invalid)?;

    segments
        .by_ref()
        .find(|segment| *segment == "status" || *segment == "statuses")
        .and_then(|_| segments.next())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PostDetail, PostPage, SourceUser, TweetData};
    use crate::rate_limiter::BudgetConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn tweet(id: &str) -> TweetData {
        TweetData {
            id: Some(id.to_string()),
            created_at: Some("2020-01-01T00:00:00Z".to_string()),
            text: Some(format!("post {}", id)),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct FakeSource {
        pages: Vec<PostPage>,
        detail: Option<PostDetail>,
        cursors_seen: Mutex<Vec<Option<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn with_pages(pages: Vec<PostPage>) -> Self {
            Self {
                pages,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SourcePlatform for FakeSource {
        async fn get_user_by_handle(&self, handle: &str) -> Result<SourceUser, TwitterApiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if handle == "ghost" {
                return Err(TwitterApiError::UserNotFound {
                    handle: handle.to_string(),
                });
            }
            Ok(SourceUser {
                id: "42".to_string(),
                screen_name: handle.to_string(),
            })
        }

        async fn get_user_posts(
            &self,
            _user: &SourceUser,
            cursor: Option<&str>,
        ) -> Result<PostPage, TwitterApiError> {
            let mut seen = self.cursors_seen.lock().unwrap();
            seen.push(cursor.map(str::to_string));
            let index = match cursor {
                None => 0,
                Some(c) => c.parse::<usize>().unwrap(),
            };
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }

        async fn get_post_by_id(&self, post_id: &str) -> Result<PostDetail, TwitterApiError> {
            self.detail
                .clone()
                .ok_or_else(|| TwitterApiError::PostNotFound {
                    post_id: post_id.to_string(),
                })
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> PostPage {
        PostPage {
            posts: ids.iter().map(|id| tweet(id)).collect(),
            next_cursor: next.map(str::to_string),
        }
    }

    fn fetcher(source: Arc<FakeSource>) -> PostFetcher {
        PostFetcher::standalone(
            source,
            Arc::new(EndpointBudgetTracker::new(BudgetConfig::twitter())),
        )
    }

    #[test]
    fn test_parse_status_id() {
        tokio_test::assert_ok!(parse_status_id("https://x.com/jack/status/20"));
        assert_eq!(
            parse_status_id("https://twitter.com/jack/status/1234567890?s=20").unwrap(),
            "1234567890"
        );
        tokio_test::assert_err!(parse_status_id("https://x.com/jack"));
        tokio_test::assert_err!(parse_status_id("https://x.com/jack/status/abc"));
        tokio_test::assert_err!(parse_status_id("not a url"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paginates_until_cursor_runs_out() {
        let source = Arc::new(FakeSource::with_pages(vec![
            page(&["1", "2"], Some("1")),
            page(&["3"], Some("2")),
            page(&["4"], None),
        ]));
        let posts = fetcher(source.clone())
            .fetch_user_posts("jack", 100)
            .await
            .unwrap();

        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(
            *source.cursors_seen.lock().unwrap(),
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_post_limit_and_empty_page() {
        let source = Arc::new(FakeSource::with_pages(vec![
            page(&["1", "2", "3"], Some("1")),
            page(&["4", "5"], Some("2")),
        ]));
        let posts = fetcher(source.clone())
            .fetch_user_posts("jack", 2)
            .await
            .unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(source.cursors_seen.lock().unwrap().len(), 1);

        let empty_tail = Arc::new(FakeSource::with_pages(vec![page(&["1"], Some("1"))]));
        let posts = fetcher(empty_tail.clone())
            .fetch_user_posts("jack", 100)
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(empty_tail.cursors_seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_ids_across_pages_count_once() {
        let source = Arc::new(FakeSource::with_pages(vec![
            page(&["1", "2"], Some("1")),
            page(&["2", "3"], Some("2")),
            page(&["4"], None),
        ]));
        let posts = fetcher(source.clone())
            .fetch_user_posts("jack", 3)
            .await
            .unwrap();

        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(source.cursors_seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_posts_do_not_count_toward_limit() {
        let mut retweet = tweet("rt");
        retweet.text = Some("RT @other: hi".to_string());
        let source = Arc::new(FakeSource::with_pages(vec![PostPage {
            posts: vec![retweet, tweet("1"), tweet("2")],
            next_cursor: None,
        }]));

        let posts = fetcher(source).fetch_user_posts("jack", 2).await.unwrap();
        assert_eq!(posts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_user_propagates() {
        let source = Arc::new(FakeSource::default());
        let result = fetcher(source).fetch_user_posts("ghost", 10).await;
        assert!(matches!(result, Err(TwitterApiError::UserNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_thread_returns_conversation_order() {
        let source = Arc::new(FakeSource {
            detail: Some(PostDetail {
                post: tweet("2"),
                reply_to: vec![tweet("1")],
                thread: vec![tweet("3")],
            }),
            ..Default::default()
        });
        let posts = fetcher(source)
            .fetch_thread("https://x.com/jack/status/2")
            .await
            .unwrap();
        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_are_single_flight() {
        let source = Arc::new(FakeSource::default());
        let fetcher = fetcher(source.clone());

        let (a, b, c) = tokio::join!(
            fetcher.fetch_user_posts("a", 10),
            fetcher.fetch_user_posts("b", 10),
            fetcher.fetch_user_posts("c", 10),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
