//! Bounded-concurrency fetch pipeline.
//!
//! One [`FetchPipeline::run`] drives a single crawl task to completion:
//!
//! 1. find or create the checkpoint for `(platform, mode, scope, project)`;
//! 2. walk the mode's work list (keywords, ids, creators, or the feed),
//!    resuming from the checkpoint's progress markers;
//! 3. per page, drop ids already in the ledger and fan the rest out under the
//!    item semaphore; comments are drained under a separate semaphore;
//! 4. advance and save progress after every page.
//!
//! An error inside a keyword or creator ends that scope only. The task is
//! marked Failed when every scope aborted and nothing new was fetched;
//! otherwise it is Completed once the work list is exhausted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::{
    Checkpoint, CheckpointKey, CheckpointStatus, CrawlMode, ItemType, META_SEARCH_CURSOR,
    ProgressUpdate,
};
use crate::checkpoint_store::CheckpointStore;
use crate::error::AppError;
use crate::models::ListingPage;
use crate::traits::{ItemSink, PlatformAdapter, PrimaryStore, RequestExecutor, SnapshotStore};

// ---------------------------------------------------------------------------
// Configuration and requests
// ---------------------------------------------------------------------------

/// Concurrency caps and guard rails for a crawl run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent item detail fetches.
    pub max_item_concurrency: usize,
    /// Concurrent comment streams.
    pub max_comment_concurrency: usize,
    /// Items taken from listings per keyword/creator/feed in one run.
    pub max_items_per_scope: usize,
    pub max_comments_per_item: usize,
    /// Hard stop for the feed, which has no natural end.
    pub max_feed_pages: u32,
    pub max_pages_per_scope: u32,
    pub fetch_comments: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_item_concurrency: 4,
            max_comment_concurrency: 2,
            max_items_per_scope: 200,
            max_comments_per_item: 100,
            max_feed_pages: 50,
            max_pages_per_scope: 100,
            fetch_comments: true,
        }
    }
}

/// What to crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    Search { keywords: Vec<String> },
    Detail { item_ids: Vec<String> },
    Creator { creator_ids: Vec<String> },
    Feed,
}

impl CrawlTarget {
    pub fn mode(&self) -> CrawlMode {
        match self {
            CrawlTarget::Search { .. } => CrawlMode::Search,
            CrawlTarget::Detail { .. } => CrawlMode::Detail,
            CrawlTarget::Creator { .. } => CrawlMode::Creator,
            CrawlTarget::Feed => CrawlMode::Feed,
        }
    }

    /// The scope part of the checkpoint key: the work list joined by commas.
    pub fn scope_key(&self) -> Option<String> {
        match self {
            CrawlTarget::Search { keywords } => Some(keywords.join(",")),
            CrawlTarget::Detail { item_ids } => Some(item_ids.join(",")),
            CrawlTarget::Creator { creator_ids } => Some(creator_ids.join(",")),
            CrawlTarget::Feed => None,
        }
    }
}

/// One crawl task as requested by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub platform: String,
    pub target: CrawlTarget,
    pub project: Option<String>,
}

impl CrawlRequest {
    pub fn new(platform: impl Into<String>, target: CrawlTarget) -> Self {
        Self {
            platform: platform.into(),
            target,
            project: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey {
            platform: self.platform.clone(),
            mode: self.target.mode(),
            scope_key: self.target.scope_key(),
            project: self.project.clone(),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub checkpoint_id: Uuid,
    pub status: CheckpointStatus,
    pub items_fetched: u64,
    pub comments_fetched: u64,
    /// Items dropped because the ledger already had them.
    pub items_skipped: u64,
    pub items_failed: u64,
    /// Items whose comment stream failed; the item itself was kept.
    pub comments_failed: u64,
    pub scopes_aborted: u64,
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    RunStarted {
        checkpoint_id: Uuid,
        platform: &'a str,
        mode: CrawlMode,
        resumed: bool,
    },
    ScopeStarted {
        scope: &'a str,
    },
    PageFetched {
        scope: &'a str,
        page: u32,
        listed: usize,
        fresh: usize,
    },
    ItemFetched {
        item_id: &'a str,
    },
    ItemSkipped {
        item_id: &'a str,
    },
    ItemFailed {
        item_id: &'a str,
        error: &'a str,
    },
    CommentsFetched {
        item_id: &'a str,
        count: u64,
    },
    CommentsFailed {
        item_id: &'a str,
        error: &'a str,
    },
    ScopeFinished {
        scope: &'a str,
    },
    ScopeAborted {
        scope: &'a str,
        error: &'a str,
    },
    RunFinished {
        checkpoint_id: Uuid,
        status: CheckpointStatus,
        items_fetched: u64,
        comments_fetched: u64,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Default reporter that logs events via `tracing`.
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted {
                checkpoint_id,
                platform,
                mode,
                resumed,
            } => {
                info!(%checkpoint_id, %platform, %mode, resumed, "Crawl started");
            }
            PipelineEvent::ScopeStarted { scope } => {
                info!(%scope, "Scope started");
            }
            PipelineEvent::PageFetched {
                scope,
                page,
                listed,
                fresh,
            } => {
                info!(%scope, page, listed, fresh, "Page processed");
            }
            PipelineEvent::ItemFetched { item_id } => {
                debug!(%item_id, "Item fetched");
            }
            PipelineEvent::ItemSkipped { item_id } => {
                debug!(%item_id, "Item already processed, skipping");
            }
            PipelineEvent::ItemFailed { item_id, error } => {
                warn!(%item_id, %error, "Item failed");
            }
            PipelineEvent::CommentsFetched { item_id, count } => {
                debug!(%item_id, count, "Comments drained");
            }
            PipelineEvent::CommentsFailed { item_id, error } => {
                warn!(%item_id, %error, "Comment stream failed");
            }
            PipelineEvent::ScopeFinished { scope } => {
                info!(%scope, "Scope finished");
            }
            PipelineEvent::ScopeAborted { scope, error } => {
                warn!(%scope, %error, "Scope aborted");
            }
            PipelineEvent::RunFinished {
                checkpoint_id,
                status,
                items_fetched,
                comments_fetched,
            } => {
                info!(%checkpoint_id, %status, items_fetched, comments_fetched, "Crawl finished");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Shared state of one run. The checkpoint mutex is the critical section for
/// metadata mutation, ledger bookkeeping, and saving.
struct RunContext {
    task_id: Uuid,
    checkpoint: Mutex<Checkpoint>,
    items_fetched: AtomicU64,
    comments_fetched: AtomicU64,
    items_skipped: AtomicU64,
    items_failed: AtomicU64,
    comments_failed: AtomicU64,
}

impl RunContext {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct ScopeTally {
    scopes: u64,
    aborted: u64,
    last_error: Option<String>,
}

/// What happened to one dispatched item.
enum ItemOutcome {
    Fetched,
    CommentsOnly,
    Missing,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives crawl tasks for one platform.
pub struct FetchPipeline<A, E, P, N, K> {
    adapter: Arc<A>,
    executor: Arc<E>,
    store: CheckpointStore<P, N>,
    sink: K,
    config: PipelineConfig,
    item_slots: Arc<Semaphore>,
    comment_slots: Arc<Semaphore>,
}

impl<A, E, P, N, K> FetchPipeline<A, E, P, N, K>
where
    A: PlatformAdapter,
    E: RequestExecutor,
    P: PrimaryStore,
    N: SnapshotStore,
    K: ItemSink,
{
    pub fn new(
        adapter: Arc<A>,
        executor: Arc<E>,
        store: CheckpointStore<P, N>,
        sink: K,
        config: PipelineConfig,
    ) -> Self {
        let item_slots = Arc::new(Semaphore::new(config.max_item_concurrency.max(1)));
        let comment_slots = Arc::new(Semaphore::new(config.max_comment_concurrency.max(1)));
        Self {
            adapter,
            executor,
            store,
            sink,
            config,
            item_slots,
            comment_slots,
        }
    }

    pub fn store(&self) -> &CheckpointStore<P, N> {
        &self.store
    }

    /// Runs (or resumes) the task described by `request`.
    ///
    /// Errors are returned only when the checkpoint itself cannot be found,
    /// created, or finalised; crawl failures end up in the report and in
    /// the checkpoint's status.
    pub async fn run<R: PipelineReporter>(
        &self,
        request: &CrawlRequest,
        reporter: &R,
    ) -> Result<CrawlReport, AppError> {
        if request.platform != self.adapter.platform() {
            return Err(AppError::ConfigError(format!(
                "crawl for platform '{}' given to the '{}' pipeline",
                request.platform,
                self.adapter.platform()
            )));
        }

        let mut checkpoint = self.store.get_or_create(&request.key()).await?;
        let resumed = checkpoint.notes_fetched > 0
            || checkpoint.current_page > 1
            || checkpoint.current_keyword_index > 0
            || checkpoint.current_id_index > 0;
        if checkpoint.status == CheckpointStatus::Paused {
            checkpoint.resume()?;
            self.store.save(&mut checkpoint).await?;
        }

        reporter.report(PipelineEvent::RunStarted {
            checkpoint_id: checkpoint.task_id,
            platform: &request.platform,
            mode: checkpoint.mode,
            resumed,
        });

        let ctx = RunContext {
            task_id: checkpoint.task_id,
            checkpoint: Mutex::new(checkpoint),
            items_fetched: AtomicU64::new(0),
            comments_fetched: AtomicU64::new(0),
            items_skipped: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            comments_failed: AtomicU64::new(0),
        };

        let tally = match &request.target {
            CrawlTarget::Search { keywords } => self.run_search(keywords, &ctx, reporter).await,
            CrawlTarget::Detail { item_ids } => self.run_detail(item_ids, &ctx, reporter).await,
            CrawlTarget::Creator { creator_ids } => {
                self.run_creators(creator_ids, &ctx, reporter).await
            }
            CrawlTarget::Feed => self.run_feed(&ctx, reporter).await,
        };

        let items_fetched = RunContext::get(&ctx.items_fetched);
        let mut checkpoint = ctx.checkpoint.into_inner();
        let stalled = tally.scopes > 0 && tally.aborted == tally.scopes && items_fetched == 0;
        if stalled {
            let message = tally
                .last_error
                .clone()
                .unwrap_or_else(|| "no scope made progress".to_string());
            self.store.mark_failed(&mut checkpoint, message).await?;
        } else {
            self.store.mark_completed(&mut checkpoint).await?;
        }

        let report = CrawlReport {
            checkpoint_id: checkpoint.task_id,
            status: checkpoint.status,
            items_fetched,
            comments_fetched: RunContext::get(&ctx.comments_fetched),
            items_skipped: RunContext::get(&ctx.items_skipped),
            items_failed: RunContext::get(&ctx.items_failed),
            comments_failed: RunContext::get(&ctx.comments_failed),
            scopes_aborted: tally.aborted,
            error_message: checkpoint.error_message.clone(),
        };
        reporter.report(PipelineEvent::RunFinished {
            checkpoint_id: report.checkpoint_id,
            status: report.status,
            items_fetched: report.items_fetched,
            comments_fetched: report.comments_fetched,
        });
        Ok(report)
    }

    // -- modes --

    async fn run_search<R: PipelineReporter>(
        &self,
        keywords: &[String],
        ctx: &RunContext,
        reporter: &R,
    ) -> ScopeTally {
        let mut tally = ScopeTally::default();
        let start = ctx.checkpoint.lock().await.current_keyword_index;

        for (index, keyword) in keywords.iter().enumerate().skip(start) {
            if let Err(e) = self.enter_scope(ctx, index).await {
                warn!(%keyword, error = %e, "Cannot advance to keyword");
                break;
            }
            reporter.report(PipelineEvent::ScopeStarted { scope: keyword });
            let result = self.search_scope(keyword, ctx, reporter).await;
            self.finish_scope(keyword, result, ctx, &mut tally, reporter)
                .await;
        }
        tally
    }

    async fn search_scope<R: PipelineReporter>(
        &self,
        keyword: &str,
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        let mut taken = 0usize;
        let max_pages = self.config.max_pages_per_scope;
        for _ in 0..max_pages {
            let (page, cursor) = {
                let checkpoint = ctx.checkpoint.lock().await;
                (
                    checkpoint.current_page,
                    checkpoint.meta_str(META_SEARCH_CURSOR).map(str::to_string),
                )
            };

            let request = self
                .adapter
                .search_request(keyword, page, cursor.as_deref())?;
            let response = self.executor.execute(request).await?;
            let listing = self.adapter.parse_listing(&response)?;
            if listing.item_ids.is_empty() {
                debug!(%keyword, page, "Empty page, keyword exhausted");
                break;
            }

            let (ids, capped) = self.cap(&listing, &mut taken);
            let fresh = self.process_batch(&ids, ctx, reporter).await?;

            {
                let mut checkpoint = ctx.checkpoint.lock().await;
                checkpoint.update_progress(ProgressUpdate {
                    page: Some(page + 1),
                    ..Default::default()
                })?;
                match &listing.next_cursor {
                    Some(next) => checkpoint.set_meta(META_SEARCH_CURSOR, next.clone().into()),
                    None => {
                        checkpoint.remove_meta(META_SEARCH_CURSOR);
                    }
                }
                self.save_progress(&mut checkpoint).await;
            }
            reporter.report(PipelineEvent::PageFetched {
                scope: keyword,
                page,
                listed: listing.item_ids.len(),
                fresh,
            });

            if !listing.has_more || capped {
                break;
            }
        }
        Ok(())
    }

    async fn run_detail<R: PipelineReporter>(
        &self,
        item_ids: &[String],
        ctx: &RunContext,
        reporter: &R,
    ) -> ScopeTally {
        let mut tally = ScopeTally::default();
        reporter.report(PipelineEvent::ScopeStarted { scope: "detail" });
        let result = self.detail_scope(item_ids, ctx, reporter).await;
        self.finish_scope("detail", result, ctx, &mut tally, reporter)
            .await;
        tally
    }

    async fn detail_scope<R: PipelineReporter>(
        &self,
        item_ids: &[String],
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        let batch = self.config.max_item_concurrency.max(1);
        let mut start = ctx.checkpoint.lock().await.current_id_index;

        while start < item_ids.len() {
            let end = (start + batch).min(item_ids.len());
            let ids = item_ids[start..end].to_vec();
            let fresh = self.process_batch(&ids, ctx, reporter).await?;

            {
                let mut checkpoint = ctx.checkpoint.lock().await;
                checkpoint.update_progress(ProgressUpdate {
                    id_index: Some(end),
                    ..Default::default()
                })?;
                self.save_progress(&mut checkpoint).await;
            }
            reporter.report(PipelineEvent::PageFetched {
                scope: "detail",
                page: end.div_ceil(batch) as u32,
                listed: ids.len(),
                fresh,
            });
            start = end;
        }
        Ok(())
    }

    /// Creators reuse the keyword index as the scope index and the cursor
    /// column for the per-creator continuation token.
    async fn run_creators<R: PipelineReporter>(
        &self,
        creator_ids: &[String],
        ctx: &RunContext,
        reporter: &R,
    ) -> ScopeTally {
        let mut tally = ScopeTally::default();
        let start = ctx.checkpoint.lock().await.current_keyword_index;

        for (index, creator_id) in creator_ids.iter().enumerate().skip(start) {
            if let Err(e) = self.enter_scope(ctx, index).await {
                warn!(%creator_id, error = %e, "Cannot advance to creator");
                break;
            }
            reporter.report(PipelineEvent::ScopeStarted { scope: creator_id });
            let result = self.cursor_scope(creator_id, None, ctx, reporter).await;
            self.finish_scope(creator_id, result, ctx, &mut tally, reporter)
                .await;
        }
        tally
    }

    async fn run_feed<R: PipelineReporter>(&self, ctx: &RunContext, reporter: &R) -> ScopeTally {
        let mut tally = ScopeTally::default();
        reporter.report(PipelineEvent::ScopeStarted { scope: "feed" });
        let result = self
            .cursor_scope("feed", Some(self.config.max_feed_pages), ctx, reporter)
            .await;
        self.finish_scope("feed", result, ctx, &mut tally, reporter)
            .await;
        tally
    }

    /// Pages a cursor-driven listing (a creator's posts, or the feed when
    /// `page_limit` is set) until it runs dry. `page_limit` replaces the
    /// per-scope page cap.
    async fn cursor_scope<R: PipelineReporter>(
        &self,
        scope: &str,
        page_limit: Option<u32>,
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        let mut taken = 0usize;
        for _ in 0..self.config.max_pages_per_scope {
            let (page, cursor) = {
                let checkpoint = ctx.checkpoint.lock().await;
                (checkpoint.current_page, checkpoint.cursor.clone())
            };
            if page_limit.is_some_and(|limit| page > limit) {
                info!(%scope, page, "Page guard rail reached");
                break;
            }

            let request = match page_limit {
                Some(_) => self.adapter.feed_request(cursor.as_deref())?,
                None => self.adapter.creator_request(scope, cursor.as_deref())?,
            };
            let response = self.executor.execute(request).await?;
            let listing = self.adapter.parse_listing(&response)?;
            if listing.item_ids.is_empty() {
                break;
            }

            let (ids, capped) = self.cap(&listing, &mut taken);
            let fresh = self.process_batch(&ids, ctx, reporter).await?;

            {
                let mut checkpoint = ctx.checkpoint.lock().await;
                checkpoint.update_progress(ProgressUpdate {
                    page: Some(page + 1),
                    cursor: Some(listing.next_cursor.clone()),
                    ..Default::default()
                })?;
                self.save_progress(&mut checkpoint).await;
            }
            reporter.report(PipelineEvent::PageFetched {
                scope,
                page,
                listed: listing.item_ids.len(),
                fresh,
            });

            if listing.next_cursor.is_none() || !listing.has_more || capped {
                break;
            }
        }
        Ok(())
    }

    // -- scope helpers --

    /// Moves the markers to scope `index`, resetting page and cursors.
    async fn enter_scope(&self, ctx: &RunContext, index: usize) -> Result<(), AppError> {
        let mut checkpoint = ctx.checkpoint.lock().await;
        if index == checkpoint.current_keyword_index {
            return Ok(());
        }
        checkpoint.update_progress(ProgressUpdate {
            keyword_index: Some(index),
            page: Some(1),
            cursor: Some(None),
            ..Default::default()
        })?;
        checkpoint.remove_meta(META_SEARCH_CURSOR);
        self.save_progress(&mut checkpoint).await;
        Ok(())
    }

    async fn finish_scope<R: PipelineReporter>(
        &self,
        scope: &str,
        result: Result<(), AppError>,
        ctx: &RunContext,
        tally: &mut ScopeTally,
        reporter: &R,
    ) {
        tally.scopes += 1;
        match result {
            Ok(()) => reporter.report(PipelineEvent::ScopeFinished { scope }),
            Err(e) => {
                let error = e.to_string();
                tally.aborted += 1;
                tally.last_error = Some(error.clone());
                let mut checkpoint = ctx.checkpoint.lock().await;
                checkpoint.record_error();
                self.save_progress(&mut checkpoint).await;
                reporter.report(PipelineEvent::ScopeAborted {
                    scope,
                    error: &error,
                });
            }
        }
    }

    /// Takes ids from `listing` up to the per-scope item cap.
    fn cap(&self, listing: &ListingPage, taken: &mut usize) -> (Vec<String>, bool) {
        let room = self.config.max_items_per_scope.saturating_sub(*taken);
        let ids: Vec<String> = listing.item_ids.iter().take(room).cloned().collect();
        *taken += ids.len();
        (ids, *taken >= self.config.max_items_per_scope)
    }

    async fn save_progress(&self, checkpoint: &mut Checkpoint) {
        if let Err(e) = self.store.save(checkpoint).await {
            warn!(task_id = %checkpoint.task_id, error = %e, "Progress kept in snapshot only");
        }
    }

    // -- items --

    /// Filters `ids` through the ledger and processes the rest concurrently.
    ///
    /// Returns the number of newly fetched items, or the first scope-aborting
    /// error once every dispatched item has settled.
    async fn process_batch<R: PipelineReporter>(
        &self,
        ids: &[String],
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<usize, AppError> {
        let mut work = Vec::with_capacity(ids.len());
        for item_id in ids {
            let processed = self
                .store
                .is_note_processed(ctx.task_id, item_id, ItemType::Note)
                .await?;
            if !processed {
                work.push((item_id.as_str(), true));
                continue;
            }

            RunContext::bump(&ctx.items_skipped, 1);
            reporter.report(PipelineEvent::ItemSkipped { item_id });
            let comments_pending = self.config.fetch_comments
                && !ctx.checkpoint.lock().await.comments_done(item_id);
            if comments_pending {
                work.push((item_id.as_str(), false));
            }
        }

        let results = join_all(
            work.iter()
                .map(|&(item_id, fetch_item)| self.process_item(item_id, fetch_item, ctx, reporter)),
        )
        .await;

        let mut fresh = 0;
        let mut abort = None;
        for ((item_id, _), result) in work.iter().zip(results) {
            match result {
                Ok(ItemOutcome::Fetched) => fresh += 1,
                Ok(ItemOutcome::CommentsOnly | ItemOutcome::Missing) => {}
                Err(e) if e.aborts_scope() => {
                    abort.get_or_insert(e);
                }
                Err(e) => {
                    RunContext::bump(&ctx.items_failed, 1);
                    let error = e.to_string();
                    reporter.report(PipelineEvent::ItemFailed {
                        item_id,
                        error: &error,
                    });
                }
            }
        }

        match abort {
            Some(e) => Err(e),
            None => Ok(fresh),
        }
    }

    async fn process_item<R: PipelineReporter>(
        &self,
        item_id: &str,
        fetch_item: bool,
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<ItemOutcome, AppError> {
        let outcome = if fetch_item {
            let _permit = self
                .item_slots
                .acquire()
                .await
                .map_err(|e| AppError::Generic(format!("item semaphore closed: {e}")))?;

            let request = self.adapter.detail_request(item_id)?;
            let response = match self.executor.execute(request).await {
                Ok(response) => response,
                Err(AppError::UnknownItem(_)) => {
                    info!(%item_id, "Item no longer exists upstream, skipping");
                    return Ok(ItemOutcome::Missing);
                }
                Err(e) => return Err(e),
            };
            let item = self.adapter.parse_item(item_id, &response)?;
            self.sink.save_item(&item).await?;
            {
                let mut checkpoint = ctx.checkpoint.lock().await;
                self.store
                    .add_processed_note(&mut checkpoint, item_id, ItemType::Note)
                    .await?;
            }
            RunContext::bump(&ctx.items_fetched, 1);
            reporter.report(PipelineEvent::ItemFetched { item_id });
            ItemOutcome::Fetched
        } else {
            ItemOutcome::CommentsOnly
        };

        if self.config.fetch_comments {
            if let Err(e) = self.drain_comments(item_id, ctx, reporter).await {
                if e.aborts_scope() {
                    return Err(e);
                }
                // The stream is not marked done; the next run drains it again
                // from its stored cursor.
                RunContext::bump(&ctx.comments_failed, 1);
                let error = e.to_string();
                reporter.report(PipelineEvent::CommentsFailed {
                    item_id,
                    error: &error,
                });
            }
        }
        Ok(outcome)
    }

    /// Pages an item's comments from the stored cursor until exhausted,
    /// then marks the stream done and drops the cursor.
    async fn drain_comments<R: PipelineReporter>(
        &self,
        item_id: &str,
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        let _permit = self
            .comment_slots
            .acquire()
            .await
            .map_err(|e| AppError::Generic(format!("comment semaphore closed: {e}")))?;

        let mut cursor = ctx
            .checkpoint
            .lock()
            .await
            .comment_cursor(item_id)
            .map(str::to_string);
        let mut seen = 0usize;
        let mut added = 0u64;

        loop {
            let request = self.adapter.comments_request(item_id, cursor.as_deref())?;
            let response = match self.executor.execute(request).await {
                Ok(response) => response,
                Err(AppError::UnknownItem(_)) => break,
                Err(e) => return Err(e),
            };
            let page = self.adapter.parse_comments(item_id, &response)?;
            seen += page.comments.len();

            let mut fresh = Vec::with_capacity(page.comments.len());
            for comment in page.comments {
                let processed = self
                    .store
                    .is_note_processed(ctx.task_id, &comment.comment_id, ItemType::Comment)
                    .await?;
                if !processed {
                    fresh.push(comment);
                }
            }
            if !fresh.is_empty() {
                self.sink.save_comments(&fresh).await?;
            }

            {
                let mut checkpoint = ctx.checkpoint.lock().await;
                for comment in &fresh {
                    if self
                        .store
                        .add_processed_note(&mut checkpoint, &comment.comment_id, ItemType::Comment)
                        .await?
                    {
                        added += 1;
                    }
                }
                checkpoint.set_comment_cursor(item_id, page.next_cursor.as_deref());
            }

            let exhausted = !page.has_more || page.next_cursor.is_none();
            if exhausted || seen >= self.config.max_comments_per_item {
                break;
            }
            cursor = page.next_cursor;
        }

        ctx.checkpoint.lock().await.finish_comments(item_id);
        RunContext::bump(&ctx.comments_fetched, added);
        reporter.report(PipelineEvent::CommentsFetched {
            item_id,
            count: added,
        });
        Ok(())
    }
}
