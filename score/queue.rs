// ========================================================================================
//
//                        Bounded multi-producer/multi-consumer queue
//
// ========================================================================================
//
// ### Purpose ###
//
// A thin discipline over a bounded crossbeam channel: `push` blocks while the queue is
// full, `pop` blocks while it is empty, and every live `Producer` counts as a writer.
// Dropping the last producer closes the queue; consumers keep draining whatever is left
// and then see `None`.

use crossbeam_channel::{Receiver, SendError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Creates a queue holding at most `capacity` items, with one producer and one
/// consumer handle. Both handles can be cloned.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    let writers = Arc::new(AtomicUsize::new(1));
    (
        Producer {
            sender,
            writers: Arc::clone(&writers),
        },
        Consumer { receiver, writers },
    )
}

pub struct Producer<T> {
    sender: Sender<T>,
    writers: Arc<AtomicUsize>,
}

impl<T> Producer<T> {
    /// Blocks while the queue is full. Fails, handing the item back, once every
    /// consumer is gone.
    pub fn push(&self, item: T) -> Result<(), SendError<T>> {
        self.sender.send(item)
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        self.writers.fetch_add(1, Ordering::AcqRel);
        Self {
            sender: self.sender.clone(),
            writers: Arc::clone(&self.writers),
        }
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.writers.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Consumer<T> {
    receiver: Receiver<T>,
    writers: Arc<AtomicUsize>,
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            writers: Arc::clone(&self.writers),
        }
    }
}

impl<T> Consumer<T> {
    /// Blocks until an item is available. Returns `None` once no writer is left and the
    /// queue has been drained.
    pub fn pop(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Number of producer handles still alive.
    pub fn writers(&self) -> usize {
        self.writers.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> Iterator for Consumer<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn consumers_drain_everything_then_stop() {
        let (producer, consumer) = bounded::<u64>(4);
        let totals: Vec<u64> = thread::scope(|s| {
            for worker in 0..3u64 {
                let producer = producer.clone();
                s.spawn(move || {
                    for i in 0..100 {
                        producer.push(worker * 1000 + i).unwrap();
                    }
                });
            }
            drop(producer);

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let consumer = consumer.clone();
                    s.spawn(move || consumer.sum::<u64>())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected: u64 = (0..3u64)
            .map(|w| (0..100u64).map(|i| w * 1000 + i).sum::<u64>())
            .sum();
        assert_eq!(totals.iter().sum::<u64>(), expected);
        assert_eq!(consumer.writers(), 0);
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn writer_count_follows_producer_handles() {
        let (producer, consumer) = bounded::<u8>(1);
        let second = producer.clone();
        assert_eq!(consumer.writers(), 2);
        drop(producer);
        assert_eq!(consumer.writers(), 1);
        second.push(7).unwrap();
        drop(second);
        assert_eq!(consumer.writers(), 0);
        assert_eq!(consumer.pop(), Some(7));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn push_blocks_until_space_is_available() {
        let (producer, consumer) = bounded::<u32>(1);
        producer.push(1).unwrap();
        thread::scope(|s| {
            let handle = s.spawn(move || {
                producer.push(2).unwrap();
            });
            thread::sleep(Duration::from_millis(20));
            assert_eq!(consumer.len(), 1);
            assert_eq!(consumer.pop(), Some(1));
            handle.join().unwrap();
        });
        assert_eq!(consumer.pop(), Some(2));
        assert!(consumer.is_empty());
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn push_fails_without_consumers() {
        let (producer, consumer) = bounded::<u32>(2);
        drop(consumer);
        assert_eq!(producer.push(5).map_err(|e| e.into_inner()), Err(5));
    }
}
