//! The working set behind the opportunities table: seeded by page loads,
//! amended by live pushes, capped, and re-sorted on demand.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio::time::Instant;

use crate::highlight::HighlightTracker;
use crate::model::{Opportunity, OpportunityPage, PaginationInfo};

pub const DEFAULT_WORKING_SET_CAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    ProfitUsd,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub dir: SortDir,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            dir: SortDir::Desc,
        }
    }
}

impl SortSpec {
    /// Same key flips direction; a new key starts descending.
    pub fn toggle(self, key: SortKey) -> Self {
        if self.key == key {
            let dir = match self.dir {
                SortDir::Asc => SortDir::Desc,
                SortDir::Desc => SortDir::Asc,
            };
            Self { key, dir }
        } else {
            Self { key, dir: SortDir::Desc }
        }
    }
}

/// One displayed opportunity plus its client-only state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub key: String,
    pub opportunity: Opportunity,
    pub created_ts: Option<f64>,
    /// Arrived via live push and still inside its highlight window.
    pub is_new: bool,
}

impl FeedRow {
    fn new(opportunity: Opportunity, is_new: bool) -> Self {
        Self {
            key: opportunity.key(),
            created_ts: opportunity.created_ts(),
            opportunity,
            is_new,
        }
    }

    fn sort_value(&self, key: SortKey) -> f64 {
        // Nulls rank below every real value in both directions.
        match key {
            SortKey::ProfitUsd => self.opportunity.profit_usd.unwrap_or(f64::NEG_INFINITY),
            SortKey::CreatedAt => self.created_ts.unwrap_or(f64::NEG_INFINITY),
        }
    }
}

/// A decoded push: the working-set key and the raw fields to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePush {
    pub key: String,
    pub fields: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub highlighted: usize,
    pub evicted: usize,
    pub rejected: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

pub struct FeedSynchronizer {
    rows: VecDeque<FeedRow>,
    cap: usize,
    pagination: Option<PaginationInfo>,
    highlights: HighlightTracker,
}

impl FeedSynchronizer {
    pub fn new(cap: usize, highlight_window: Duration) -> Self {
        let cap = cap.max(1);
        Self {
            rows: VecDeque::new(),
            cap,
            pagination: None,
            highlights: HighlightTracker::new(highlight_window, cap * 10),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn pagination(&self) -> Option<&PaginationInfo> {
        self.pagination.as_ref()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.key == key)
    }

    /// Replaces the whole working set with a fetched page. A page load is
    /// navigation, not arrival: every highlight is cleared.
    pub fn load_page(&mut self, page: OpportunityPage) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut rows = VecDeque::with_capacity(page.opportunities.len().min(self.cap));
        for opp in page.opportunities {
            let row = FeedRow::new(opp, false);
            if !seen.insert(row.key.clone()) {
                log::debug!("feed.load.duplicate_key key={}", row.key);
                continue;
            }
            rows.push_back(row);
            if rows.len() == self.cap {
                break;
            }
        }
        self.rows = rows;
        self.pagination = page.pagination;
        self.highlights.clear_active();
    }

    /// Applies live pushes in delivery order.
    ///
    /// Known keys are merged in place without moving or re-highlighting.
    /// Unknown keys are prepended if `admits` accepts them, highlighted if
    /// never seen before, and the tail is trimmed to the cap.
    pub fn merge_live(
        &mut self,
        pushes: Vec<LivePush>,
        now: Instant,
        admits: impl Fn(&Opportunity) -> bool,
    ) -> MergeOutcome {
        let mut out = MergeOutcome::default();
        for push in pushes {
            if let Some(pos) = self.position(&push.key) {
                let row = &mut self.rows[pos];
                match row.opportunity.merged_with(&push.fields) {
                    Ok(merged) => {
                        row.created_ts = merged.created_ts();
                        row.opportunity = merged;
                        out.replaced += 1;
                    }
                    Err(e) => {
                        log::warn!("feed.merge.replace_failed key={} err={}", push.key, e);
                        out.rejected += 1;
                    }
                }
                continue;
            }

            let opp: Opportunity = match serde_json::from_value(JsonValue::Object(push.fields)) {
                Ok(o) => o,
                Err(e) => {
                    log::warn!("feed.merge.decode_failed key={} err={}", push.key, e);
                    out.rejected += 1;
                    continue;
                }
            };
            if !admits(&opp) {
                log::debug!("feed.merge.filtered key={}", push.key);
                out.rejected += 1;
                continue;
            }

            let is_new = self.highlights.flag(&push.key, now);
            if is_new {
                out.highlighted += 1;
            }
            let mut row = FeedRow::new(opp, is_new);
            row.key = push.key;
            self.rows.push_front(row);
            out.inserted += 1;

            while self.rows.len() > self.cap {
                if let Some(dropped) = self.rows.pop_back() {
                    log::debug!("feed.merge.evicted key={}", dropped.key);
                    out.evicted += 1;
                }
            }
        }
        out
    }

    /// Display order for `sort`; the working set itself is untouched.
    pub fn sorted(&self, sort: SortSpec) -> Vec<&FeedRow> {
        let mut view: Vec<&FeedRow> = self.rows.iter().collect();
        view.sort_by(|a, b| {
            let (av, bv) = (a.sort_value(sort.key), b.sort_value(sort.key));
            match sort.dir {
                SortDir::Asc => av.total_cmp(&bv),
                SortDir::Desc => bv.total_cmp(&av),
            }
        });
        view
    }

    pub fn next_highlight_deadline(&self) -> Option<Instant> {
        self.highlights.next_deadline()
    }

    /// Clears `is_new` on rows whose highlight window has elapsed.
    pub fn expire_highlights(&mut self, now: Instant) -> usize {
        let due = self.highlights.expire(now);
        if due.is_empty() {
            return 0;
        }
        let due: HashSet<String> = due.into_iter().collect();
        let mut cleared = 0;
        for row in self.rows.iter_mut().filter(|r| r.is_new && due.contains(&r.key)) {
            row.is_new = false;
            cleared += 1;
        }
        cleared
    }
}

#[cfg(test)]
impl FeedSynchronizer {
    /// Rows in working-set (arrival) order.
    fn rows(&self) -> impl Iterator<Item = &FeedRow> {
        self.rows.iter()
    }

    fn get(&self, key: &str) -> Option<&FeedRow> {
        self.rows.iter().find(|r| r.key == key)
    }
}
