//! Two-thread trace reading
//!
//! A producer thread pulls instances from the underlying backward trace and
//! hands them to the consumer in owned blocks over a bounded channel. The
//! channel blocks the producer when full and the consumer when empty. The
//! producer stops when the consumer side is dropped or the stop flag is set.
//! Each block carries the producer's progress once the block was read, so the
//! consumer reports how far it has walked rather than how far the producer
//! ran ahead.

use super::{BackwardTrace, InstructionInstance};
use crate::bytecode::MethodId;
use crate::error::{Error, Result};
use crate::watchdog::Watchdog;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

/// Instances per handoff block
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 12;
/// Blocks the channel holds before the producer blocks
pub const DEFAULT_BUFFERED_BLOCKS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub block_size: usize,
    pub buffered_blocks: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffered_blocks: DEFAULT_BUFFERED_BLOCKS,
        }
    }
}

/// Message on the handoff channel
#[derive(Debug)]
enum TraceBlock {
    Instances {
        instances: Vec<InstructionInstance>,
        /// Percentage done after the last instance of the block
        done: f64,
    },
    Failed(Error),
    /// End of stream; never sent after `Failed`
    End { done: f64 },
}

/// Consumer end of the pipeline
#[derive(Debug)]
pub struct PipelinedTrace {
    receiver: Receiver<TraceBlock>,
    current: std::vec::IntoIter<InstructionInstance>,
    block_len: usize,
    /// Progress before and after the block being consumed
    block_start: f64,
    block_end: f64,
    finished: bool,
    initial_stack: Vec<MethodId>,
}

impl PipelinedTrace {
    fn begin_block(&mut self, instances: Vec<InstructionInstance>, done: f64) {
        self.block_start = self.block_end;
        self.block_end = done;
        self.block_len = instances.len();
        self.current = instances.into_iter();
    }
}

impl Iterator for PipelinedTrace {
    type Item = Result<InstructionInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(instance) = self.current.next() {
                return Some(Ok(instance));
            }
            if self.finished {
                return None;
            }
            match self.receiver.recv() {
                Ok(TraceBlock::Instances { instances, done }) => self.begin_block(instances, done),
                Ok(TraceBlock::End { done }) => {
                    self.begin_block(Vec::new(), done);
                    self.finished = true;
                    return None;
                }
                Ok(TraceBlock::Failed(err)) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                Err(_) => {
                    self.finished = true;
                    return Some(Err(Error::ProducerFailure {
                        message: "trace producer stopped without an end-of-stream marker"
                            .to_string(),
                    }));
                }
            }
        }
    }
}

impl BackwardTrace for PipelinedTrace {
    fn initial_stack_methods(&self) -> Vec<MethodId> {
        self.initial_stack.clone()
    }

    fn percentage_done(&self) -> f64 {
        if self.block_len == 0 {
            return self.block_end;
        }
        let consumed = (self.block_len - self.current.len()) as f64;
        self.block_start + (self.block_end - self.block_start) * consumed / self.block_len as f64
    }
}

/// Run `consume` against `trace` read on a separate thread
///
/// The producer is always told to stop and joined before this returns,
/// whether `consume` succeeded or not.
pub fn run<T, R, F>(
    trace: T,
    options: PipelineOptions,
    watchdog: &dyn Watchdog,
    consume: F,
) -> Result<R>
where
    T: BackwardTrace + Send,
    F: FnOnce(&mut PipelinedTrace) -> Result<R>,
{
    let stop = AtomicBool::new(false);
    let initial_stack = trace.initial_stack_methods();
    let block_size = options.block_size.max(1);

    thread::scope(|scope| {
        let (sender, receiver) = mpsc::sync_channel(options.buffered_blocks.max(1));
        let stop_flag = &stop;
        let producer =
            scope.spawn(move || produce(trace, sender, stop_flag, watchdog, block_size));

        let mut consumer = PipelinedTrace {
            receiver,
            current: Vec::new().into_iter(),
            block_len: 0,
            block_start: 0.0,
            block_end: 0.0,
            finished: false,
            initial_stack,
        };
        let result = consume(&mut consumer);

        stop.store(true, Ordering::Relaxed);
        // Disconnect so a producer blocked on a full channel wakes up
        drop(consumer);

        match (result, producer.join()) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(_)) => Err(Error::ProducerFailure {
                message: "trace producer panicked".to_string(),
            }),
            (Ok(value), Ok(())) => Ok(value),
        }
    })
}

fn produce<T: BackwardTrace>(
    mut trace: T,
    sender: SyncSender<TraceBlock>,
    stop: &AtomicBool,
    watchdog: &dyn Watchdog,
    block_size: usize,
) {
    debug!("trace producer started");
    let poll_every = watchdog.poll_every().max(1) as u64;
    let mut block = Vec::with_capacity(block_size);
    let mut produced: u64 = 0;

    let last = loop {
        if stop.load(Ordering::Relaxed) {
            debug!("trace producer stopped by consumer after {} instances", produced);
            return;
        }
        match trace.next() {
            None => {
                break TraceBlock::End {
                    done: trace.percentage_done(),
                }
            }
            Some(Err(err)) if err.is_interrupted() => break TraceBlock::Failed(err),
            Some(Err(err)) => {
                break TraceBlock::Failed(Error::ProducerFailure {
                    message: err.to_string(),
                })
            }
            Some(Ok(instance)) => {
                block.push(instance);
                produced += 1;
                if produced % poll_every == 0 && watchdog.should_stop() {
                    break TraceBlock::Failed(Error::Interrupted);
                }
                if block.len() >= block_size {
                    let full = TraceBlock::Instances {
                        instances: std::mem::replace(&mut block, Vec::with_capacity(block_size)),
                        done: trace.percentage_done(),
                    };
                    if sender.send(full).is_err() {
                        return;
                    }
                }
            }
        }
    };

    if !block.is_empty() {
        let rest = TraceBlock::Instances {
            instances: block,
            done: trace.percentage_done(),
        };
        if sender.send(rest).is_err() {
            return;
        }
    }
    // The consumer may already be gone; nothing left to report then
    let _ = sender.send(last);
    debug!("trace producer finished after {} instances", produced);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::InstructionIndex;
    use crate::trace::RecordedTrace;
    use crate::watchdog::LazyWatchdog;

    fn sample_trace(len: usize) -> RecordedTrace {
        let mut trace = RecordedTrace::new();
        for i in 0..len {
            trace.push(MethodId::new(0), InstructionIndex::new(i % 3), 1);
        }
        trace
    }

    #[test]
    fn test_pipeline_preserves_order() {
        let trace = sample_trace(100);
        let options = PipelineOptions {
            block_size: 7,
            buffered_blocks: 2,
        };
        let numbers = run(trace.backward(), options, &LazyWatchdog, |piped| {
            piped
                .map(|i| i.map(|i| i.instance_nr))
                .collect::<Result<Vec<_>>>()
        })
        .unwrap();
        assert_eq!(numbers, (0..100).collect::<Vec<u64>>());
    }

    #[test]
    fn test_consumer_may_stop_early() {
        let trace = sample_trace(10_000);
        let options = PipelineOptions {
            block_size: 4,
            buffered_blocks: 1,
        };
        let first = run(trace.backward(), options, &LazyWatchdog, |piped| {
            Ok(piped.take(3).count())
        })
        .unwrap();
        assert_eq!(first, 3);
    }

    #[test]
    fn test_progress_follows_the_consumer() {
        let trace = sample_trace(100);
        let options = PipelineOptions {
            block_size: 7,
            buffered_blocks: 16,
        };
        let seen = run(trace.backward(), options, &LazyWatchdog, |piped| {
            let before = piped.percentage_done();
            piped.by_ref().take(10).count();
            let after_ten = piped.percentage_done();
            piped.by_ref().count();
            Ok((before, after_ten, piped.percentage_done()))
        })
        .unwrap();
        assert_eq!(seen.0, 0.0);
        // The producer may have read the whole trace by now
        assert!((seen.1 - 10.0).abs() < 1e-9, "{}", seen.1);
        assert!((seen.2 - 100.0).abs() < 1e-9, "{}", seen.2);
    }
}
