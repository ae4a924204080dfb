//! Enumerator cursor over query results

use tracing::{debug, trace};

use crate::backend::RecordStream;
use crate::query::PropertyRecord;
use crate::session::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorState {
    Active,
    Exhausted,
    Failed(String),
}

/// Lazy, forward-only sequence of records produced by one `execute` call
///
/// The cursor mutably borrows its session, so it cannot outlive it and the
/// session cannot be closed while the cursor exists. Once exhausted it
/// yields `Ok(None)` forever; once a backend failure is seen every further
/// call fails. Re-querying requires a fresh `execute`.
pub struct EnumeratorCursor<'s> {
    stream: Option<Box<dyn RecordStream + 's>>,
    state: CursorState,
    query: String,
    yielded: usize,
}

impl<'s> EnumeratorCursor<'s> {
    pub(crate) fn new(stream: Box<dyn RecordStream + 's>, query: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            state: CursorState::Active,
            query: query.into(),
            yielded: 0,
        }
    }

    /// Pull the next record, blocking on the backend round-trip
    pub fn next_record(&mut self) -> Result<Option<PropertyRecord>, SessionError> {
        match &self.state {
            CursorState::Exhausted => return Ok(None),
            CursorState::Failed(reason) => {
                return Err(SessionError::query(format!(
                    "enumeration already failed: {reason}"
                )));
            }
            CursorState::Active => {}
        }

        let Some(stream) = self.stream.as_mut() else {
            self.state = CursorState::Exhausted;
            return Ok(None);
        };

        match stream.next_record() {
            Ok(Some(record)) => {
                self.yielded += 1;
                trace!("Cursor yielded record #{} for: {}", self.yielded, self.query);
                Ok(Some(record))
            }
            Ok(None) => {
                debug!(
                    "Cursor exhausted after {} record(s): {}",
                    self.yielded, self.query
                );
                self.state = CursorState::Exhausted;
                self.stream = None;
                Ok(None)
            }
            Err(e) => {
                let reason = e.to_string();
                self.state = CursorState::Failed(reason.clone());
                self.stream = None;
                Err(SessionError::query(reason))
            }
        }
    }

    /// Take the first record and release the cursor
    ///
    /// Identity-style queries expect zero or one result; any further records
    /// are discarded unread.
    pub fn first(mut self) -> Result<Option<PropertyRecord>, SessionError> {
        self.next_record()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    pub fn records_yielded(&self) -> usize {
        self.yielded
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, VecRecordStream};

    struct FailingStream {
        remaining: usize,
    }

    impl RecordStream for FailingStream {
        fn next_record(&mut self) -> Result<Option<PropertyRecord>, BackendError> {
            if self.remaining == 0 {
                return Err(BackendError::unavailable("pipe closed"));
            }
            self.remaining -= 1;
            Ok(Some(PropertyRecord::new()))
        }
    }

    #[test]
    fn test_exhausted_cursor_stays_exhausted() {
        let stream = VecRecordStream::new(vec![PropertyRecord::new().with("A", 1u64)]);
        let mut cursor = EnumeratorCursor::new(Box::new(stream), "q");
        assert!(cursor.next_record().unwrap().is_some());
        for _ in 0..3 {
            assert!(cursor.next_record().unwrap().is_none());
        }
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.records_yielded(), 1);
    }

    #[test]
    fn test_failure_terminates_sequence() {
        let mut cursor = EnumeratorCursor::new(Box::new(FailingStream { remaining: 1 }), "q");
        assert!(cursor.next_record().unwrap().is_some());
        assert!(matches!(
            cursor.next_record(),
            Err(SessionError::Query { .. })
        ));
        assert!(matches!(
            cursor.next_record(),
            Err(SessionError::Query { .. })
        ));
        assert!(!cursor.is_exhausted());
    }

    #[test]
    fn test_first_takes_only_first_record() {
        let stream = VecRecordStream::new(vec![
            PropertyRecord::new().with("N", "first"),
            PropertyRecord::new().with("N", "second"),
        ]);
        let cursor = EnumeratorCursor::new(Box::new(stream), "q");
        let record = cursor.first().unwrap().unwrap();
        assert_eq!(record.get("N").unwrap().to_string(), "first");
    }

    #[test]
    fn test_first_propagates_failure() {
        let cursor = EnumeratorCursor::new(Box::new(FailingStream { remaining: 0 }), "q");
        assert!(matches!(cursor.first(), Err(SessionError::Query { .. })));
    }
}
