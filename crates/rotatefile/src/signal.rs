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

//! Forced rotation on OS signals (unix only).

use crate::config::RotateSignal;
use crate::error::Result;
use crate::file::RotateFile;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{error, info};

impl RotateSignal {
    fn kind(self) -> SignalKind {
        match self {
            RotateSignal::Hup => SignalKind::hangup(),
            RotateSignal::Usr1 => SignalKind::user_defined1(),
            RotateSignal::Usr2 => SignalKind::user_defined2(),
        }
    }
}

/// Listener tasks started by [`spawn_rotate_on_signals`]. Dropping the
/// guard stops listening.
#[derive(Debug)]
pub struct SignalGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Rotate `file` whenever one of `signals` is delivered to the process.
///
/// Must be called from within a Tokio runtime. The rotation itself runs on
/// the blocking pool, through the same locked path as [`RotateFile::rotate`].
///
/// # Errors
/// Fails if a signal handler cannot be registered.
pub fn spawn_rotate_on_signals(file: Arc<RotateFile>, signals: &[RotateSignal]) -> Result<SignalGuard> {
    let mut tasks = Vec::with_capacity(signals.len());
    for &sig in signals {
        let mut stream = signal(sig.kind())?;
        let file = file.clone();
        tasks.push(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!("Received {}, rotating {:?}", sig, file.current_filename());
                let target = file.clone();
                match tokio::task::spawn_blocking(move || target.rotate()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Rotation on {} failed: {}", sig, e),
                    Err(e) => error!("Rotation task on {} panicked: {}", sig, e),
                }
            }
        }));
    }
    Ok(SignalGuard { tasks })
}
