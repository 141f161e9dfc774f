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

use tokio::sync::{broadcast, mpsc};

/// Listens for the engine-wide shutdown signal.
///
/// Each background task holds its own `Shutdown` plus a clone of the
/// completion sender; dropping the clone when the task exits is what lets
/// the engine wait for all tasks to drain.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
    _complete: mpsc::Sender<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>, complete: mpsc::Sender<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
            _complete: complete,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

/// Engine side of the shutdown handshake: broadcasts the signal and waits
/// until every subscribed task has dropped its completion sender.
#[derive(Debug)]
pub struct ShutdownNotifier {
    notify: broadcast::Sender<()>,
    complete_tx: mpsc::Sender<()>,
    complete_rx: mpsc::Receiver<()>,
}

impl Default for ShutdownNotifier {
    fn default() -> Self {
        let (notify, _) = broadcast::channel(1);
        let (complete_tx, complete_rx) = mpsc::channel(1);
        ShutdownNotifier {
            notify,
            complete_tx,
            complete_rx,
        }
    }
}

impl ShutdownNotifier {
    pub fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.notify.subscribe(), self.complete_tx.clone())
    }

    /// Signals shutdown and blocks until all subscribers have exited.
    pub async fn shutdown(mut self) {
        let _ = self.notify.send(());
        drop(self.complete_tx);
        let _ = self.complete_rx.recv().await;
    }
}
