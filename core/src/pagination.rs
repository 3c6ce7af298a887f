use serde::Serialize;

/// Position of one incremental load stream.
///
/// Only the loader moves a cursor; everything else gets a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    offset: usize,
    limit: usize,
    has_more: bool,
    total_known: Option<usize>,
}

impl PaginationCursor {
    pub fn new(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: limit.max(1),
            has_more: true,
            total_known: None,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Advisory only; servers may never report it.
    pub fn total_known(&self) -> Option<usize> {
        self.total_known
    }

    /// Fraction of the known total loaded so far.
    pub fn progress(&self) -> Option<f32> {
        match self.total_known {
            Some(0) => Some(1.0),
            Some(total) => Some((self.offset as f32 / total as f32).min(1.0)),
            None => None,
        }
    }

    /// Records a landed page that started at `page_offset`.
    pub(crate) fn record_page(
        &mut self,
        page_offset: usize,
        received: usize,
        has_more: bool,
        total: Option<usize>,
    ) {
        self.offset = self.offset.max(page_offset + received);
        self.has_more = has_more && received > 0;
        if total.is_some() {
            self.total_known = total;
        }
    }

    pub(crate) fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    pub(crate) fn rewind(&mut self) {
        self.offset = 0;
        self.has_more = true;
        self.total_known = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cursor_starts_open() {
        let cursor = PaginationCursor::new(0);
        assert_eq!(cursor.limit(), 1);
        assert_eq!(cursor.offset(), 0);
        assert!(cursor.has_more());
        assert_eq!(cursor.total_known(), None);
        assert_eq!(cursor.progress(), None);
    }

    #[test]
    fn empty_page_closes_stream_even_if_server_claims_more() {
        let mut cursor = PaginationCursor::new(10);
        cursor.record_page(0, 0, true, None);
        assert!(!cursor.has_more());
    }

    #[test]
    fn total_is_kept_when_later_pages_omit_it() {
        let mut cursor = PaginationCursor::new(10);
        cursor.record_page(0, 10, true, Some(25));
        cursor.record_page(10, 10, true, None);
        assert_eq!(cursor.offset(), 20);
        assert_eq!(cursor.total_known(), Some(25));
        assert_eq!(cursor.progress(), Some(0.8));

        cursor.rewind();
        assert_eq!(cursor.offset(), 0);
        assert_eq!(cursor.total_known(), None);
    }
}
