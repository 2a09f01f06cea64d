//! Leaf operators: the backend scan and the literal row source.

use super::{ExecContext, Operator};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::physical::ScanFragments;
use crate::row::Row;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Pages through a `DataSource`, applying the scan's encoded push-down
/// fragments remotely. Restartable only by reopening.
pub struct ScanOp {
    source: Arc<dyn DataSource>,
    dataset: String,
    encoded: serde_json::Value,
    page_size: u64,
    remaining_cap: Option<u64>,
    from: u64,
    page: VecDeque<Row>,
    exhausted: bool,
    opened: bool,
}

impl ScanOp {
    pub fn new(
        source: Arc<dyn DataSource>,
        dataset: String,
        fragments: &ScanFragments,
        page_size: u64,
    ) -> Self {
        Self {
            source,
            dataset,
            encoded: fragments.encode(),
            page_size: page_size.max(1),
            remaining_cap: fragments.limit,
            from: 0,
            page: VecDeque::new(),
            exhausted: false,
            opened: false,
        }
    }

    fn fetch_page(&mut self, ctx: &ExecContext) -> Result<()> {
        let size = match self.remaining_cap {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        ctx.check()?;
        let response = self
            .source
            .search(ctx, &self.dataset, &self.encoded, self.from, size)?;
        trace!(
            dataset = %self.dataset,
            from = self.from,
            hits = response.hits.len(),
            total = response.total,
            took_ms = response.took_ms,
            "scan page fetched"
        );
        let fetched = response.hits.len() as u64;
        self.from += fetched;
        if let Some(remaining) = self.remaining_cap.as_mut() {
            *remaining = remaining.saturating_sub(fetched);
        }
        if fetched < size || self.from >= response.total {
            self.exhausted = true;
        }
        self.page
            .extend(response.hits.into_iter().map(|hit| hit.into_row()));
        Ok(())
    }
}

impl Operator for ScanOp {
    fn open(&mut self, _ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.from = 0;
        self.exhausted = false;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page(ctx)?;
        }
        Ok(self.page.pop_front())
    }

    fn close(&mut self) {
        self.page.clear();
        self.exhausted = true;
        self.opened = false;
    }
}

/// Emits a fixed row list; backs describe and show datasources.
pub struct ValuesOp {
    rows: VecDeque<Row>,
}

impl ValuesOp {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }
}

impl Operator for ValuesOp {
    fn open(&mut self, _ctx: &ExecContext) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemoryDataSource;
    use crate::row::Value;

    fn source_with_rows(n: usize) -> Arc<MemoryDataSource> {
        let source = MemoryDataSource::new();
        let rows: Vec<Row> = (0..n)
            .map(|i| Row::from_fields([("seq", Value::Int(i as i64))]))
            .collect();
        source.load("logs", rows);
        Arc::new(source)
    }

    #[test]
    fn test_scan_pages_through_all_rows() {
        let ctx = ExecContext::default();
        let mut scan = ScanOp::new(
            source_with_rows(25),
            "logs".into(),
            &ScanFragments::default(),
            10,
        );
        scan.open(&ctx).unwrap();
        let mut count = 0;
        while scan.next(&ctx).unwrap().is_some() {
            count += 1;
        }
        scan.close();
        assert_eq!(count, 25);
    }

    #[test]
    fn test_scan_respects_limit_fragment() {
        let ctx = ExecContext::default();
        let mut fragments = ScanFragments::default();
        fragments.cap_limit(7);
        let mut scan = ScanOp::new(source_with_rows(25), "logs".into(), &fragments, 10);
        scan.open(&ctx).unwrap();
        let mut count = 0;
        while scan.next(&ctx).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 7);
    }

    #[test]
    fn test_scan_cancellation_between_pages() {
        let ctx = ExecContext::default();
        let mut scan = ScanOp::new(
            source_with_rows(25),
            "logs".into(),
            &ScanFragments::default(),
            5,
        );
        scan.open(&ctx).unwrap();
        assert!(scan.next(&ctx).unwrap().is_some());
        ctx.cancel_handle().store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(scan.next(&ctx).is_err());
        scan.close();
        scan.close();
    }

    #[test]
    fn test_values_emits_and_drains() {
        let ctx = ExecContext::default();
        let mut op = ValuesOp::new(vec![
            Row::from_fields([("name", Value::Str("a".into()))]),
            Row::from_fields([("name", Value::Str("b".into()))]),
        ]);
        op.open(&ctx).unwrap();
        assert_eq!(op.next(&ctx).unwrap().unwrap().get("name"), Value::Str("a".into()));
        assert_eq!(op.next(&ctx).unwrap().unwrap().get("name"), Value::Str("b".into()));
        assert!(op.next(&ctx).unwrap().is_none());
    }
}
