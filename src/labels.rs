//! Labeled anchors and the shared, versioned set the draw pass reads.
//!
//! A completed inference produces a whole new batch. Publishing swaps the
//! batch handle under a lock, so a reader holds either the old batch or the
//! new one and never a mix.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::engine::Anchor;

/// アンカーとラベル（ランドマーク種別名）の組
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledAnchor<A> {
    pub anchor: A,
    pub label: String,
}

impl<A> LabeledAnchor<A> {
    pub fn new(anchor: A, label: impl Into<String>) -> Self {
        Self {
            anchor,
            label: label.into(),
        }
    }
}

impl<A: Anchor> LabeledAnchor<A> {
    /// トラッキング中のアンカーだけが描画対象
    pub fn is_drawable(&self) -> bool {
        self.anchor.tracking_state().is_tracking()
    }
}

/// 公開後は変更されないバッチ
#[derive(Debug)]
pub struct AnchorBatch<A> {
    version: u64,
    entries: Vec<LabeledAnchor<A>>,
}

impl<A> AnchorBatch<A> {
    fn empty() -> Self {
        Self {
            version: 0,
            entries: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[LabeledAnchor<A>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<A: Anchor> AnchorBatch<A> {
    /// 描画対象（TRACKING のもの）だけを返す
    pub fn drawable(&self) -> impl Iterator<Item = &LabeledAnchor<A>> {
        self.entries.iter().filter(|entry| entry.is_drawable())
    }
}

/// スレッド間で共有されるラベル付きアンカー集合
pub struct LabeledAnchorSet<A> {
    current: Arc<RwLock<Arc<AnchorBatch<A>>>>,
}

impl<A> Clone for LabeledAnchorSet<A> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}

impl<A> Default for LabeledAnchorSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> LabeledAnchorSet<A> {
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(AnchorBatch::empty()))),
        }
    }

    /// 集合全体を新しいバッチで置き換え、新しいバージョンを返す
    pub fn publish(&self, entries: Vec<LabeledAnchor<A>>) -> u64 {
        let count = entries.len();
        // バッチは immutable なので poison 後もそのまま使える
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let version = guard.version + 1;
        *guard = Arc::new(AnchorBatch { version, entries });
        drop(guard);

        info!(version, count, "published labeled anchor batch");
        version
    }

    /// 現在のバッチ。ロックは保持しない
    pub fn snapshot(&self) -> Arc<AnchorBatch<A>> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// 空のバッチを公開する。消えたものがあれば true
    pub fn clear(&self) -> bool {
        let had_entries = !self.snapshot().is_empty();
        if had_entries {
            self.publish(Vec::new());
        }
        had_entries
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
