//! # Kind Resolution Cache
//!
//! Remembers both kinds the API server serves and kinds it does not. Optional
//! integrations (console, OCM) are looked up on every pass, so an unserved kind
//! is cached for [`MISSING_KIND_TTL`] before it is looked up again.

use super::ClientError;
use kube::api::GroupVersionKind;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// How long an unserved kind is trusted to stay unserved
pub const MISSING_KIND_TTL: Duration = Duration::from_secs(30);

/// Per-process cache of kind lookups
#[derive(Debug)]
pub struct KindCache<T> {
    found: HashMap<GroupVersionKind, T>,
    missing: HashMap<GroupVersionKind, Instant>,
    missing_ttl: Duration,
}

impl<T: Clone> KindCache<T> {
    pub fn new(missing_ttl: Duration) -> Self {
        Self {
            found: HashMap::new(),
            missing: HashMap::new(),
            missing_ttl,
        }
    }

    /// `Some(Some(_))` when served, `Some(None)` when recently seen missing
    fn lookup(&self, gvk: &GroupVersionKind) -> Option<Option<T>> {
        if let Some(found) = self.found.get(gvk) {
            return Some(Some(found.clone()));
        }
        self.missing
            .get(gvk)
            .filter(|seen| seen.elapsed() < self.missing_ttl)
            .map(|_| None)
    }

    fn record(&mut self, gvk: GroupVersionKind, entry: Option<T>) {
        match entry {
            Some(found) => {
                self.missing.remove(&gvk);
                self.found.insert(gvk, found);
            }
            None => {
                self.missing.insert(gvk, Instant::now());
            }
        }
    }
}

impl<T: Clone> Default for KindCache<T> {
    fn default() -> Self {
        Self::new(MISSING_KIND_TTL)
    }
}

/// Split an `apiVersion` and kind into a [`GroupVersionKind`]
pub fn gvk_of(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}

/// Resolve a kind through the cache, calling `lookup` only on a miss.
///
/// `lookup` returns `Ok(None)` when the server does not serve the kind; that
/// answer is cached and surfaced as [`ClientError::SchemaUnavailable`].
pub async fn resolve_cached<T, F, Fut>(
    cache: &RwLock<KindCache<T>>,
    gvk: &GroupVersionKind,
    lookup: F,
) -> Result<T, ClientError>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, ClientError>>,
{
    let unavailable = || ClientError::SchemaUnavailable {
        api_version: gvk.api_version(),
        kind: gvk.kind.clone(),
    };

    if let Some(cached) = cache.read().await.lookup(gvk) {
        return cached.ok_or_else(unavailable);
    }

    debug!(api_version = %gvk.api_version(), kind = %gvk.kind, "Kind not cached, querying API server");
    let entry = lookup().await?;
    cache.write().await.record(gvk.clone(), entry.clone());
    entry.ok_or_else(unavailable)
}

/// Whether a discovery failure means the kind is simply not served.
///
/// A 404 covers an unknown group or version and a 503 covers an aggregated
/// API whose backing service is down.
pub fn is_unserved(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => matches!(ae.code, 404 | 503),
        kube::Error::Discovery(_) => true,
        _ => false,
    }
}
