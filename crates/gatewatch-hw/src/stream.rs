//! Resilient frame stream.
//!
//! [`ResilientFrames`] is a pull-based iterator over an opened source. Its
//! `next()` may block: on a read miss it sleeps and retries on the same
//! handle, and after [`MAX_MISSES`] consecutive misses it closes the handle
//! and re-runs the initial selection before yielding again. Consumers see
//! one continuous stream until a reopen fails, at which point a single
//! [`FrameRead::SourceLost`] is yielded and the iterator is exhausted.

use crate::frame::Frame;
use crate::opener::SourceOpener;
use crate::selector::{select, NoSourceError, Selection, SelectionArgs};
use std::iter::FusedIterator;
use std::time::Duration;

pub const MAX_MISSES: u32 = 15;
pub const MISS_DELAY: Duration = Duration::from_millis(20);

/// Re-runs a selection after the current source went dead.
pub trait Reopen {
    fn reopen(&mut self, args: &SelectionArgs) -> Result<Selection, NoSourceError>;
}

impl<F> Reopen for F
where
    F: FnMut(&SelectionArgs) -> Result<Selection, NoSourceError>,
{
    fn reopen(&mut self, args: &SelectionArgs) -> Result<Selection, NoSourceError> {
        self(args)
    }
}

/// One item of the stream.
#[derive(Debug)]
pub enum FrameRead {
    Frame(Frame),
    /// Terminal sentinel: the source died and could not be reopened.
    SourceLost,
}

pub struct ResilientFrames<R> {
    current: Option<Selection>,
    args: SelectionArgs,
    reopen: R,
    misses: u32,
    max_misses: u32,
    miss_delay: Duration,
    reopens: u32,
}

/// Reopen strategy that replays [`select`] against an opener.
pub fn reselect(opener: &SourceOpener) -> impl FnMut(&SelectionArgs) -> Result<Selection, NoSourceError> + '_ {
    move |args| select(opener, args)
}

impl<R: Reopen> ResilientFrames<R> {
    /// Wrap an already-selected source. `args` must be the arguments that
    /// produced `selection`; they are replayed unchanged on reopen.
    pub fn new(selection: Selection, args: SelectionArgs, reopen: R) -> Self {
        Self {
            current: Some(selection),
            args,
            reopen,
            misses: 0,
            max_misses: MAX_MISSES,
            miss_delay: MISS_DELAY,
            reopens: 0,
        }
    }

    pub fn with_max_misses(mut self, max_misses: u32) -> Self {
        self.max_misses = max_misses.max(1);
        self
    }

    pub fn with_miss_delay(mut self, delay: Duration) -> Self {
        self.miss_delay = delay;
        self
    }

    /// The live selection, `None` once the stream has ended.
    pub fn current(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    /// Number of successful reopens so far.
    pub fn reopen_count(&self) -> u32 {
        self.reopens
    }

    pub fn args(&self) -> &SelectionArgs {
        &self.args
    }

    /// Close the current handle and replay the selection.
    ///
    /// The old handle is always released before the new one is opened.
    fn recover(&mut self) -> bool {
        if let Some(old) = self.current.take() {
            tracing::warn!(
                misses = self.misses,
                source = %old.source.spec(),
                "too many failed reads; reopening source"
            );
            old.source.close();
        }

        match self.reopen.reopen(&self.args) {
            Ok(selection) => {
                tracing::info!(
                    id = %selection.id,
                    backend = selection.backend_name(),
                    "source reopened"
                );
                self.current = Some(selection);
                self.misses = 0;
                self.reopens += 1;
                true
            }
            Err(error) => {
                tracing::error!(%error, "reopen failed; ending frame stream");
                false
            }
        }
    }
}

impl<R: Reopen> Iterator for ResilientFrames<R> {
    type Item = FrameRead;

    fn next(&mut self) -> Option<FrameRead> {
        loop {
            let selection = self.current.as_mut()?;

            match selection.source.read_frame() {
                Ok(frame) if !frame.is_empty() => {
                    self.misses = 0;
                    return Some(FrameRead::Frame(frame));
                }
                Ok(_) => tracing::trace!(misses = self.misses, "empty frame"),
                Err(error) => tracing::debug!(misses = self.misses, %error, "frame read failed"),
            }

            self.misses += 1;
            if !self.miss_delay.is_zero() {
                std::thread::sleep(self.miss_delay);
            }

            if self.misses >= self.max_misses && !self.recover() {
                return Some(FrameRead::SourceLost);
            }
        }
    }
}

impl<R: Reopen> FusedIterator for ResilientFrames<R> {}
