//! A work queue whose tasks either complete immediately or suspend on a
//! future. All bookkeeping happens on the draining task; only the futures
//! themselves run concurrently.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use modgraph_core::Result;
use std::collections::VecDeque;

pub enum TaskOutcome<R> {
    Ready(Result<R>),
    Pending(BoxFuture<'static, Result<R>>),
}

impl<R> TaskOutcome<R>
where
    R: Send + 'static,
{
    /// Transform the eventual value, whether it is ready or not.
    pub fn map<U, F>(self, f: F) -> TaskOutcome<U>
    where
        U: Send + 'static,
        F: FnOnce(R) -> U + Send + 'static,
    {
        match self {
            TaskOutcome::Ready(result) => TaskOutcome::Ready(result.map(f)),
            TaskOutcome::Pending(fut) => TaskOutcome::Pending(fut.map(|r| r.map(f)).boxed()),
        }
    }
}

/// Starts tasks and folds their results into state owned by the caller.
pub trait Accumulator<T, R> {
    fn run(&mut self, task: &T) -> TaskOutcome<R>;

    /// Fold one result. Follow-up tasks go into `next`; an error stops the drain.
    fn accumulate(&mut self, task: T, result: R, next: &mut Vec<T>) -> Result<()>;
}

pub struct TaskQueue<T, R> {
    queued: VecDeque<T>,
    pending: FuturesUnordered<BoxFuture<'static, (T, Result<R>)>>,
}

impl<T, R> TaskQueue<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new(seeds: impl IntoIterator<Item = T>) -> Self {
        Self {
            queued: seeds.into_iter().collect(),
            pending: FuturesUnordered::new(),
        }
    }

    pub fn push(&mut self, task: T) {
        self.queued.push_back(task);
    }

    /// Run until no task is queued or in flight. Fails fast: the first error
    /// is returned and every in-flight future is dropped.
    pub async fn drain<A>(mut self, acc: &mut A) -> Result<()>
    where
        A: Accumulator<T, R>,
    {
        let mut next = Vec::new();
        loop {
            while let Some(task) = self.queued.pop_front() {
                match acc.run(&task) {
                    TaskOutcome::Ready(result) => {
                        acc.accumulate(task, result?, &mut next)?;
                        self.queued.extend(next.drain(..));
                    }
                    TaskOutcome::Pending(fut) => {
                        self.pending.push(async move { (task, fut.await) }.boxed());
                    }
                }
            }

            match self.pending.next().await {
                Some((task, result)) => {
                    acc.accumulate(task, result?, &mut next)?;
                    self.queued.extend(next.drain(..));
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modgraph_core::ModGraphError;
    use std::time::Duration;

    /// Task n spawns n-1 and n-2; odd tasks suspend.
    #[derive(Default)]
    struct Fib {
        seen: Vec<u32>,
    }

    impl Accumulator<u32, u32> for Fib {
        fn run(&mut self, task: &u32) -> TaskOutcome<u32> {
            let n = *task;
            if n % 2 == 1 {
                TaskOutcome::Pending(
                    async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok(n)
                    }
                    .boxed(),
                )
            } else {
                TaskOutcome::Ready(Ok(n))
            }
        }

        fn accumulate(&mut self, _task: u32, result: u32, next: &mut Vec<u32>) -> Result<()> {
            self.seen.push(result);
            if result >= 2 {
                next.push(result - 1);
                next.push(result - 2);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_mixed_ready_and_pending_tasks() {
        let mut acc = Fib::default();
        TaskQueue::new([5]).drain(&mut acc).await.unwrap();
        // fib call tree of 5 has 15 nodes
        assert_eq!(acc.seen.len(), 15);
        assert_eq!(acc.seen.iter().filter(|&&n| n == 5).count(), 1);
    }

    struct FailOn(u32);

    impl Accumulator<u32, u32> for FailOn {
        fn run(&mut self, task: &u32) -> TaskOutcome<u32> {
            let n = *task;
            let bad = self.0;
            TaskOutcome::Pending(
                async move {
                    if n == bad {
                        Err(ModGraphError::InvalidOperation(format!("task {}", n)))
                    } else {
                        Ok(n)
                    }
                }
                .boxed(),
            )
        }

        fn accumulate(&mut self, _task: u32, result: u32, next: &mut Vec<u32>) -> Result<()> {
            if result > 0 {
                next.push(result - 1);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_error_stops_the_drain() {
        let err = TaskQueue::new([4]).drain(&mut FailOn(2)).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid operation: task 2");
    }

    #[tokio::test]
    async fn empty_queue_finishes_immediately() {
        TaskQueue::<u32, u32>::new([]).drain(&mut FailOn(0)).await.unwrap();
    }
}
