//! Attachment lifecycle reconciliation.
//!
//! Given a note's stored state and a requested change, decides which remote
//! objects must be deleted and which attachment list must be persisted. The
//! computations are pure; only [`AttachmentReconciler::apply_deletions`]
//! talks to the remote store.
//!
//! # Invariants
//! - Every existing attachment URL ends up in exactly one of
//!   [`Reconciliation::final_list`] or [`Reconciliation::to_delete`].
//! - Explicit removal wins over keep.
//! - URLs outside the [`MediaUrlScheme`] are never sent to the store.
//! - Two URLs naming the same object id count as one reference.

use std::collections::{BTreeSet, HashSet};

use futures::future::join_all;
use serde::Serialize;

use crate::media::MediaUrlScheme;
use crate::models::{Attachment, Note};
use crate::storage::{DeleteOutcome, RemoteObjectStore};
use crate::util::sanitize;

/// Outcome of reconciling a note's attachment list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Attachments to persist: new uploads first, then retained existing
    /// attachments in their stored order. URLs are unique.
    pub final_list: Vec<Attachment>,
    /// URLs whose remote objects must be deleted, unique, in first-seen order.
    pub to_delete: Vec<String>,
}

/// Result of a best-effort deletion fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Objects deleted, including ones the store reported as already gone.
    pub deleted: usize,
    /// URLs outside the media convention; never sent to the store.
    pub skipped: usize,
    /// URLs whose delete call failed.
    pub failed: Vec<String>,
}

impl DeletionReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }
}

/// Computes attachment side effects for note updates and deletes.
#[derive(Debug, Clone)]
pub struct AttachmentReconciler {
    scheme: MediaUrlScheme,
}

impl AttachmentReconciler {
    pub const fn new(scheme: MediaUrlScheme) -> Self {
        Self { scheme }
    }

    pub const fn scheme(&self) -> &MediaUrlScheme {
        &self.scheme
    }

    /// Remote image URLs embedded in markdown content.
    pub fn extract_embedded_refs(&self, content: &str) -> BTreeSet<String> {
        self.scheme
            .find_image_urls(content)
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Images shown by `old_content` whose object `new_content` no longer shows.
    ///
    /// Refs are compared by object id, so `…/images/a?w=200` is still shown
    /// while the new content embeds `…/images/a`.
    pub fn diff_embedded_refs(&self, old_content: &str, new_content: &str) -> BTreeSet<String> {
        let still_shown: HashSet<String> = self
            .extract_embedded_refs(new_content)
            .iter()
            .map(|url| self.object_key(url))
            .collect();
        self.extract_embedded_refs(old_content)
            .into_iter()
            .filter(|url| !still_shown.contains(&self.object_key(url)))
            .collect()
    }

    /// Drop every URL whose object `note` still references, either as an
    /// attachment or as an embedded image.
    pub fn unreferenced_by<I>(&self, note: &Note, urls: I) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let referenced: HashSet<String> = note
            .attachment_urls()
            .map(|url| self.object_key(url))
            .chain(
                self.extract_embedded_refs(&note.content)
                    .iter()
                    .map(|url| self.object_key(url)),
            )
            .collect();

        dedup_urls(urls.into_iter().map(|url| url.as_ref().to_string()))
            .into_iter()
            .filter(|url| !referenced.contains(&self.object_key(url)))
            .collect()
    }

    /// Every remote URL a note references; the reclaim set once it is deleted.
    ///
    /// Attachments come first in stored order, then embedded images.
    pub fn handle_note_deleted(&self, note: &Note) -> Vec<String> {
        let embedded = self.extract_embedded_refs(&note.content);
        dedup_urls(
            note.attachment_urls()
                .map(ToOwned::to_owned)
                .chain(embedded),
        )
    }

    /// Delete the remote objects behind `urls`.
    ///
    /// Calls are issued concurrently and independently; a failure is recorded
    /// in the report and never stops the other deletes.
    pub async fn apply_deletions<I>(&self, store: &dyn RemoteObjectStore, urls: I) -> DeletionReport
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut report = DeletionReport::default();
        let mut targets = Vec::new();
        for url in dedup_urls(urls.into_iter().map(|url| url.as_ref().to_string())) {
            match self.scheme.object_id(&url) {
                Some(object_id) => targets.push((url, object_id)),
                None => {
                    tracing::debug!(url = %url, "Skipping delete of URL outside media convention");
                    report.skipped += 1;
                }
            }
        }

        let outcomes = join_all(targets.into_iter().map(|(url, object_id)| async move {
            let outcome = store.delete(&object_id).await;
            (url, object_id, outcome)
        }))
        .await;

        for (url, object_id, outcome) in outcomes {
            match outcome {
                Ok(DeleteOutcome::Deleted) => report.deleted += 1,
                Ok(DeleteOutcome::NotFound) => {
                    tracing::debug!(object_id = %object_id, "Remote object already gone");
                    report.deleted += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        object_id = %object_id,
                        error = %sanitize(&error),
                        "Failed to delete remote object"
                    );
                    report.failed.push(url);
                }
            }
        }

        report
    }

    /// Identity of the object behind `url`; foreign URLs stand for themselves.
    fn object_key(&self, url: &str) -> String {
        self.scheme
            .object_id(url)
            .unwrap_or_else(|| url.trim().to_string())
    }
}

/// Compute the attachment list to persist and the URLs to reclaim.
///
/// - `existing`: the note's stored attachments.
/// - `incoming_new`: attachments uploaded by this request; always kept unless
///   explicitly removed.
/// - `incoming_keep`: URLs of `existing` the caller wants to retain.
/// - `explicit_remove`: URLs to remove; wins over `incoming_keep`. Only URLs
///   of `existing` or `incoming_new` are reclaimed, so a stray URL never
///   deletes an object another note owns.
///
/// Every URL of `existing` lands in exactly one of the two outputs.
pub fn reconcile_attachments(
    existing: &[Attachment],
    incoming_new: &[Attachment],
    incoming_keep: &HashSet<String>,
    explicit_remove: &HashSet<String>,
) -> Reconciliation {
    let retained = existing
        .iter()
        .filter(|attachment| incoming_keep.contains(&attachment.url));

    let mut seen = HashSet::new();
    let final_list: Vec<Attachment> = incoming_new
        .iter()
        .chain(retained)
        .filter(|attachment| !explicit_remove.contains(&attachment.url))
        .filter(|attachment| seen.insert(attachment.url.clone()))
        .cloned()
        .collect();

    let kept: HashSet<&str> = final_list
        .iter()
        .map(|attachment| attachment.url.as_str())
        .collect();
    let owned: HashSet<&str> = existing
        .iter()
        .chain(incoming_new)
        .map(|attachment| attachment.url.as_str())
        .collect();
    let mut remove_sorted: Vec<&str> = explicit_remove
        .iter()
        .map(String::as_str)
        .filter(|url| owned.contains(url))
        .collect();
    remove_sorted.sort_unstable();

    let to_delete = dedup_urls(
        existing
            .iter()
            .map(|attachment| attachment.url.as_str())
            .filter(|url| !kept.contains(url))
            .chain(remove_sorted)
            .map(ToOwned::to_owned),
    );

    Reconciliation {
        final_list,
        to_delete,
    }
}

fn dedup_urls(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}
