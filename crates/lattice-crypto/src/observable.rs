// Copyright 2026 The Lattice Project Developers
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

//! A small observable value built on a broadcast channel.

use std::sync::{Arc, RwLock};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// An observable value that replays the current value to new subscribers
/// before streaming subsequent updates.
#[derive(Clone, Debug)]
pub(crate) struct ChannelObservable<T: Clone + Send> {
    value: Arc<RwLock<T>>,
    channel: broadcast::Sender<T>,
}

impl<T: Default + Clone + Send + 'static> Default for ChannelObservable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: 'static + Send + Clone> ChannelObservable<T> {
    pub(crate) fn new(value: T) -> Self {
        let channel = broadcast::Sender::new(100);
        Self { value: RwLock::new(value).into(), channel }
    }

    /// Subscribe to updates. The stream yields the current value immediately,
    /// then every update after it. A `Lagged` error is produced if the
    /// subscriber falls more than the channel capacity behind.
    pub(crate) fn subscribe(&self) -> impl Stream<Item = Result<T, BroadcastStreamRecvError>> {
        let current_value =
            self.value.read().expect("the observable shouldn't be poisoned").to_owned();
        let initial_stream = tokio_stream::once(Ok(current_value));
        let broadcast_stream = BroadcastStream::new(self.channel.subscribe());

        initial_stream.chain(broadcast_stream)
    }

    pub(crate) fn set(&self, new_value: T) {
        *self.value.write().expect("the observable shouldn't be poisoned") =
            new_value.to_owned();
        // If no receivers exist the send fails, which is fine.
        let _ = self.channel.send(new_value);
    }

    pub(crate) fn get(&self) -> T {
        self.value.read().expect("the observable shouldn't be poisoned").to_owned()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{pin_mut, StreamExt};

    use super::*;

    #[tokio::test]
    async fn subscribers_get_the_current_value_first() {
        let observable = ChannelObservable::new(1u8);
        observable.set(2);

        let stream = observable.subscribe();
        pin_mut!(stream);

        assert_eq!(stream.next().await.unwrap().unwrap(), 2);

        observable.set(3);
        assert_eq!(stream.next().await.unwrap().unwrap(), 3);
        assert_eq!(observable.get(), 3);
    }
}
