// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background thread that runs mill passes on request.
//!
//! Requests go through a channel with room for a single pending signal.
//! A request made while one is already pending is dropped, so a burst of
//! rotations coalesces into at most one running pass plus one queued pass.

use std::io;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, Sender, error::TrySendError};
use tracing::{debug, warn};

pub struct MillWorker {
    tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MillWorker {
    /// Spawn a named thread that calls `job` once per received signal and
    /// exits when the worker is dropped.
    pub fn spawn<F>(name: &str, mut job: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            while rx.blocking_recv().is_some() {
                job();
            }
            debug!("mill worker exiting");
        })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Request a pass without blocking. Returns `false` if the request was
    /// coalesced with one already pending.
    pub fn notify(&self) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(()) | TrySendError::Closed(())) => false,
        }
    }
}

impl Drop for MillWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread finish any pending pass and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("mill worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_notify_runs_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = std_mpsc::channel();
        let counter = runs.clone();
        let worker = MillWorker::spawn("mill-test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();

        assert!(worker.notify());
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(worker);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_burst_coalesces_while_busy() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let counter = runs.clone();
        let worker = MillWorker::spawn("mill-test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();

        assert!(worker.notify());
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The first pass is running: one request queues, the rest coalesce.
        assert!(worker.notify());
        for _ in 0..10 {
            assert!(!worker.notify());
        }

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        drop(worker);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_joins_idle_worker() {
        let worker = MillWorker::spawn("mill-test", || {}).unwrap();
        drop(worker);
    }
}
