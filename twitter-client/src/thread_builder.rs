use crate::text::format_post_text;
use bluemigrate_core::{FormattedPost, RawPost, Thread};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub const MAX_THREAD_DEPTH: usize = 100;

/// Assembles flat post records into reply threads.
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    max_depth: usize,
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new(MAX_THREAD_DEPTH)
    }
}

impl ThreadBuilder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Builds threads from a user's timeline, newest root first.
    ///
    /// A post becomes a root when its parent is missing from the set, which
    /// includes replies to filtered quote posts and retweets. Children are
    /// visited earliest first. Posts that no root reaches are logged and
    /// dropped.
    pub fn build(&self, raw_posts: Vec<RawPost>) -> Vec<Thread> {
        let posts = prepare(raw_posts);
        let index: HashMap<&str, usize> = posts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.as_str(), i))
            .collect();

        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (i, post) in posts.iter().enumerate() {
            match post.reply_to_id.as_deref() {
                Some(parent) if parent == post.id => {
                    debug!(post_id = %post.id, "Self-reply detected, skipping");
                }
                Some(parent) if index.contains_key(parent) => {
                    children.entry(parent).or_default().push(i);
                }
                _ => roots.push(i),
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|&a, &b| {
                posts[a]
                    .created_at
                    .cmp(&posts[b].created_at)
                    .then_with(|| posts[a].id.cmp(&posts[b].id))
            });
        }
        roots.sort_by(|&a, &b| {
            posts[b]
                .created_at
                .cmp(&posts[a].created_at)
                .then_with(|| posts[b].id.cmp(&posts[a].id))
        });

        let mut placed: HashSet<&str> = HashSet::new();
        let mut threads = Vec::with_capacity(roots.len());
        for root in roots {
            let thread = self.walk(&posts, &children, root, &mut placed);
            if !thread.is_empty() {
                threads.push(thread);
            }
        }

        let unreachable: Vec<&str> = posts
            .iter()
            .map(|p| p.id.as_str())
            .filter(|id| !placed.contains(id))
            .collect();
        if !unreachable.is_empty() {
            warn!(
                dropped = unreachable.len(),
                "Dropping posts unreachable from any root: {:?}", unreachable
            );
        }

        info!(
            "Collected {} posts into {} threads",
            placed.len(),
            threads.len()
        );
        threads
    }

    /// Bounded depth-first walk from `root` with an explicit stack.
    fn walk<'a>(
        &self,
        posts: &'a [RawPost],
        children: &HashMap<&str, Vec<usize>>,
        root: usize,
        placed: &mut HashSet<&'a str>,
    ) -> Thread {
        let mut in_thread: HashSet<&str> = HashSet::new();
        let mut formatted = Vec::new();
        let mut stack = vec![(root, 0usize)];

        while let Some((i, depth)) = stack.pop() {
            let post = &posts[i];
            let id = post.id.as_str();

            if in_thread.contains(id) || placed.contains(id) {
                warn!(post_id = %id, "Cycle detected in reply chain, skipping");
                continue;
            }
            if depth > 0 {
                let parent_in_thread = post
                    .reply_to_id
                    .as_deref()
                    .is_some_and(|parent| parent != id && in_thread.contains(parent));
                if !parent_in_thread {
                    warn!(post_id = %id, "Reply parent is not part of this thread, skipping");
                    continue;
                }
            }

            let text = format_post_text(post);
            formatted.push(FormattedPost {
                id: post.id.clone(),
                created_at: post.created_at,
                text: text.text,
                facets: text.facets,
                media_urls: post.media_urls.clone(),
                reply_to_id: if depth == 0 {
                    None
                } else {
                    post.reply_to_id.clone()
                },
                depth,
            });
            in_thread.insert(id);
            placed.insert(id);

            let Some(replies) = children.get(id) else {
                continue;
            };
            if depth >= self.max_depth {
                warn!(
                    post_id = %id,
                    "Maximum reply depth ({}) reached, {} replies not followed",
                    self.max_depth,
                    replies.len()
                );
                continue;
            }
            // Reversed so the earliest reply is popped first
            for &child in replies.iter().rev() {
                stack.push((child, depth + 1));
            }
        }

        Thread::new(formatted)
    }

    /// Builds a thread from an already ordered conversation (ancestors, root,
    /// continuation). Each post replies to the one before it. Quote posts
    /// stay: the requested conversation is migrated as it is.
    pub fn build_explicit(&self, raw_posts: Vec<RawPost>) -> Option<Thread> {
        let posts = dedupe(raw_posts);
        if posts.len() > self.max_depth + 1 {
            warn!(
                "Explicit thread has {} posts, keeping the first {}",
                posts.len(),
                self.max_depth + 1
            );
        }

        let formatted: Vec<FormattedPost> = posts
            .iter()
            .take(self.max_depth + 1)
            .map(|post| {
                let text = format_post_text(post);
                FormattedPost {
                    id: post.id.clone(),
                    created_at: post.created_at,
                    text: text.text,
                    facets: text.facets,
                    media_urls: post.media_urls.clone(),
                    reply_to_id: None,
                    depth: 0,
                }
            })
            .collect();

        let thread = relink(formatted);
        (!thread.is_empty()).then_some(thread)
    }
}

/// Combines timeline threads with explicitly requested ones.
///
/// Explicit threads win: an organic thread sharing any post with an explicit
/// thread is dropped, and posts repeated across explicit threads are kept only
/// in the first one. Organic threads come first in the output.
pub fn merge_threads(organic: Vec<Thread>, explicit: Vec<Thread>) -> Vec<Thread> {
    let mut claimed: HashSet<String> = HashSet::new();
    let mut explicit_kept = Vec::with_capacity(explicit.len());

    for thread in explicit {
        let posts: Vec<FormattedPost> = thread
            .into_posts()
            .into_iter()
            .filter(|p| claimed.insert(p.id.clone()))
            .collect();
        if posts.is_empty() {
            info!("Explicit thread fully covered by an earlier one, skipping");
            continue;
        }
        explicit_kept.push(relink(posts));
    }

    let mut merged: Vec<Thread> = organic
        .into_iter()
        .filter(|thread| {
            let overlaps = thread.posts().iter().any(|p| claimed.contains(&p.id));
            if overlaps {
                debug!(
                    root = ?thread.root().map(|p| &p.id),
                    "Organic thread overlaps an explicit thread, dropping"
                );
            }
            !overlaps
        })
        .collect();
    merged.extend(explicit_kept);
    merged
}

/// Chains posts linearly: each one replies to its predecessor.
fn relink(mut posts: Vec<FormattedPost>) -> Thread {
    let mut previous: Option<String> = None;
    for (depth, post) in posts.iter_mut().enumerate() {
        post.depth = depth;
        post.reply_to_id = previous.replace(post.id.clone());
    }
    Thread::new(posts)
}

/// Keeps the first occurrence of every id.
fn dedupe(raw_posts: Vec<RawPost>) -> Vec<RawPost> {
    let mut seen = HashSet::new();
    raw_posts
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

/// Deduplicates by id and removes quote posts and retweets.
fn prepare(raw_posts: Vec<RawPost>) -> Vec<RawPost> {
    let total = raw_posts.len();
    let posts: Vec<RawPost> = dedupe(raw_posts)
        .into_iter()
        .filter(|p| !p.is_excluded())
        .collect();
    if posts.len() < total {
        debug!(
            "Filtered {} duplicate or excluded posts out of {}",
            total - posts.len(),
            total
        );
    }
    posts
}
