//! Helpers for the single-threaded task model

use std::{future::Future, time::Duration};

use tokio::{
    runtime::Builder,
    select,
    task::{JoinHandle, LocalSet},
};

/// Aborts the wrapped task when its logical owner is dropped.
#[derive(Debug)]
pub struct AbortOnDrop<T> {
    handle: JoinHandle<T>,
}

impl<T> From<JoinHandle<T>> for AbortOnDrop<T> {
    fn from(handle: JoinHandle<T>) -> Self {
        Self { handle }
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run the supplied future inside a `LocalSet` on a current-thread runtime
/// whose clock is paused, so timers elapse as soon as every task is idle.
/// Intended for tests.
pub fn block_on_locally<T>(f: impl Future<Output = T>) -> T {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to build test runtime");

    LocalSet::new().block_on(&runtime, async move {
        select! {
            t = f => t,
            // longer than any delay the transport uses
            _ = tokio::time::sleep(Duration::from_secs(100_000)) => {
                panic!("test appears to be stuck");
            },
        }
    })
}
