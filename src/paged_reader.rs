//!
//! The PagedReader module turns the store's paged queries into lazy iterators of entities.
//!

use tracing::debug;

use crate::error::{OpContext, Operation, RemoteErrorKind, Result};
use crate::filter::TableFilter;
use crate::records::RawEntity;
use crate::service::{Continuation, QueryPage, Remote, TableService};

enum ReaderState {
    /// No page requested yet
    Start,
    /// The last page came with a continuation
    Continue(Continuation),
    Done,
}

/// A lazy sequence of the entities of a table that match a filter
///
/// A page is requested when the entities of the previous page are used up, and each request runs
/// under the storage retry policy.  A missing table reads as empty.  After an error the
/// iterator ends.
pub struct PagedReader<'a, S : TableService + ?Sized> {
    remote : Remote<'a, S>,
    table : String,
    filter : Option<TableFilter>,
    state : ReaderState,
    page : std::vec::IntoIter<RawEntity>,
}

impl<'a, S : TableService + ?Sized> PagedReader<'a, S> {

    /// Starts reading at `continuation`, or at the first matching entity if there is none
    pub(crate) fn new(remote : Remote<'a, S>, table : &str, filter : Option<TableFilter>, continuation : Option<Continuation>) -> Self {
        Self{
            remote,
            table : table.to_string(),
            filter,
            state : continuation.map_or(ReaderState::Start, ReaderState::Continue),
            page : Vec::new().into_iter(),
        }
    }

    /// Where the read resumes once the entities already fetched are used up
    ///
    /// `None` before the first page is requested, and after the last one.
    pub fn continuation(&self) -> Option<&Continuation> {
        match &self.state {
            ReaderState::Continue(continuation) => Some(continuation),
            ReaderState::Start | ReaderState::Done => None,
        }
    }

    /// Returns the rest of the current page, or requests the next page
    ///
    /// A page may come back empty while the store still has more to read.
    pub fn next_page(&mut self) -> Option<Result<Vec<RawEntity>>> {
        let buffered : Vec<RawEntity> = self.page.by_ref().collect();
        if !buffered.is_empty() {
            return Some(Ok(buffered));
        }
        let continuation = match core::mem::replace(&mut self.state, ReaderState::Done) {
            ReaderState::Done => return None,
            ReaderState::Start => None,
            ReaderState::Continue(continuation) => Some(continuation),
        };
        match self.fetch(continuation.as_ref()) {
            Ok(page) => {
                if let Some(next) = page.continuation {
                    self.state = ReaderState::Continue(next);
                }
                Some(Ok(page.entities))
            },
            Err(err) => Some(Err(err)),
        }
    }

    fn context(&self) -> OpContext {
        let context = OpContext::new(Operation::Query, &self.table);
        match &self.filter {
            Some(filter) => context.with_partition(filter.partition_key()),
            None => context,
        }
    }

    fn fetch(&self, continuation : Option<&Continuation>) -> Result<QueryPage> {
        let context = self.context();
        let outcome = self.remote.storage_policy.run(&context, self.remote.counters, |_| false, || {
            self.remote.counters.update(|c| c.query_count += 1);
            self.remote.service.query(&self.table, self.filter.as_ref(), continuation)
        });
        match outcome {
            Ok(page) => {
                debug!(table = %self.table, entities = page.entities.len(), more = page.continuation.is_some(), "read page");
                Ok(page)
            },
            Err(failure) if failure.kind() == RemoteErrorKind::TableNotFound => {
                debug!(table = %self.table, "table does not exist, nothing to read");
                Ok(QueryPage::default())
            },
            Err(failure) => Err(failure.into_error(context)),
        }
    }
}

impl<S : TableService + ?Sized> Iterator for PagedReader<'_, S> {
    type Item = Result<RawEntity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.page.next() {
                return Some(Ok(entity));
            }
            match self.next_page()? {
                Ok(entities) => self.page = entities.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Reads the entities of one partition with any of a list of row keys
///
/// The keys are asked for in slices, one [PagedReader] per slice, and a slice is only queried once
/// the entities of the previous one are used up.
pub struct RowKeysReader<'a, S : TableService + ?Sized> {
    remote : Remote<'a, S>,
    table : String,
    partition_key : String,
    slices : std::vec::IntoIter<Vec<String>>,
    current : Option<PagedReader<'a, S>>,
}

impl<'a, S : TableService + ?Sized> RowKeysReader<'a, S> {

    pub(crate) fn new(remote : Remote<'a, S>, table : &str, partition_key : &str, row_keys : Vec<String>) -> Result<Self> {
        //Fails early on keys that can't be quoted
        TableFilter::row_keys(partition_key, &row_keys)?;

        let slices : Vec<Vec<String>> = row_keys.chunks(remote.max_count.max(1)).map(<[String]>::to_vec).collect();
        Ok(Self{
            remote,
            table : table.to_string(),
            partition_key : partition_key.to_string(),
            slices : slices.into_iter(),
            current : None,
        })
    }
}

impl<S : TableService + ?Sized> Iterator for RowKeysReader<'_, S> {
    type Item = Result<RawEntity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                if item.is_err() {
                    self.slices = Vec::new().into_iter();
                }
                return Some(item);
            }
            let slice = self.slices.next()?;
            let filter = TableFilter::RowKeys{ partition_key : self.partition_key.clone(), row_keys : slice };
            self.current = Some(PagedReader::new(self.remote, &self.table, Some(filter), None));
        }
    }
}

/// Decodes each entity of a reader with the storage's coder
pub(crate) fn decode_entities<'a, T, C, I>(raw : I, coder : &'a C) -> impl Iterator<Item = Result<crate::Entity<T>>> + 'a
where
    T : serde::de::DeserializeOwned + 'a,
    C : crate::Coder,
    I : Iterator<Item = Result<RawEntity>> + 'a,
{
    raw.map(move |entity| entity.and_then(|entity| crate::Entity::from_raw(entity, coder)))
}

