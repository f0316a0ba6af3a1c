//!
//! The Slicing module splits a stream of entities into groups that each fit in one batch
//! transaction.
//!

use crate::records::RawEntity;

/// An iterator adaptor that groups consecutive items, bounded by count and total size
///
/// A group is closed when adding the next item would take it over `max_count` items or over
/// `max_payload` in size.  Groups are never empty, and an item that is larger than `max_payload`
/// on its own makes up a group by itself.  Items keep their order.
pub struct Slices<I : Iterator, F> {
    items : core::iter::Peekable<I>,
    max_count : usize,
    max_payload : usize,
    size_of : F,
}

impl<I, F> Iterator for Slices<I, F>
where
    I : Iterator,
    F : Fn(&I::Item) -> usize,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.items.next()?;
        let mut payload = (self.size_of)(&first);
        let mut group = vec![first];

        while group.len() < self.max_count {
            let size = match self.items.peek() {
                Some(next) => (self.size_of)(next),
                None => break,
            };
            if payload + size > self.max_payload {
                break;
            }
            payload += size;
            //The peek above found an item
            if let Some(next) = self.items.next() {
                group.push(next);
            }
        }
        Some(group)
    }
}

/// Groups items by count and by the size `size_of` gives for each one
pub fn slice_by<I, F>(items : I, max_count : usize, max_payload : usize, size_of : F) -> Slices<I::IntoIter, F>
where
    I : IntoIterator,
    F : Fn(&I::Item) -> usize,
{
    Slices{ items : items.into_iter().peekable(), max_count : max_count.max(1), max_payload, size_of }
}

/// Groups entities for batch transactions, using their [payload_size](RawEntity::payload_size)
pub fn slice_entities<I>(entities : I, max_count : usize, max_payload : usize) -> Slices<I::IntoIter, fn(&RawEntity) -> usize>
where
    I : IntoIterator<Item = RawEntity>,
{
    slice_by(entities, max_count, max_payload, RawEntity::payload_size as fn(&RawEntity) -> usize)
}
