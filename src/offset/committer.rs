// Copyright 2025 jonefeewang@gmail.com
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

//! Offset Persistence Background Task
//!
//! Periodically flushes every tracker's offset map into the durable
//! offset store, so a restarted consumer resumes close to where it
//! stopped. A failed flush only costs replay of the messages consumed
//! since the previous flush; consumption itself is never blocked on the
//! store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::service::Shutdown;
use crate::AppResult;

use super::{OffsetStore, OffsetTracker};

pub struct OffsetCommitter {
    store: Option<Arc<dyn OffsetStore>>,
    trackers: Vec<Arc<OffsetTracker>>,
}

impl OffsetCommitter {
    pub fn new(store: Option<Arc<dyn OffsetStore>>, trackers: Vec<Arc<OffsetTracker>>) -> Self {
        OffsetCommitter { store, trackers }
    }

    /// Writes every tracker's current offset map to the store. A missing
    /// store makes this a no-op.
    pub async fn commit(&self) -> AppResult<()> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()),
        };
        for tracker in &self.trackers {
            let offsets = tracker.snapshot();
            if offsets.is_empty() {
                continue;
            }
            store.save(tracker.topic_partition(), &offsets).await?;
            trace!(
                "committed {} broker offset(s) for {}",
                offsets.len(),
                tracker.topic_partition()
            );
        }
        Ok(())
    }

    /// Runs the periodic commit loop until shutdown. The final flush after
    /// the poll loops have drained is the engine's responsibility.
    pub async fn commit_task(self: Arc<Self>, interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    debug!("offset committer receiving shutdown signal");
                    break;
                }
            }
            if let Err(e) = self.commit().await {
                warn!("offset commit failed: {}", e);
            }
        }
    }
}
