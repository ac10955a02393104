// Copyright 2025 coScene
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

// Session replay capture engine
//
// Records a host's UI activity and ships it as ordered, compressed segments:
// - Samples each session once into off / buffering / continuous
// - Keeps a rolling tail while buffering and upgrades on the first error
// - Cuts segments on a debounced schedule with a hard ceiling
// - Delivers segments in order with retry, backoff and a persistent queue
// - Sends over HTTP or writes to the local filesystem

pub mod buffer;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod mode;
pub mod persist;
pub mod protocol;
pub mod recorder;
pub mod sampler;
pub mod scheduler;
pub mod session;
pub mod transport;

// Re-export main types
pub use buffer::{BufferSnapshot, BufferedEvent, RecordingBuffer, Retention};
pub use codec::{EncodedSegment, ReplayEvent, SegmentEncoder};
pub use config::{load_config, load_config_with_env, ReplayConfig};
pub use delivery::{DeliveryHandle, DeliveryQueue, QueuedDelivery, RetryPolicy};
pub use envelope::EnvelopeBuilder;
pub use error::{DeliveryError, ReplayError, ReplayResult};
pub use mode::{CutState, ErrorOutcome, ModeController};
pub use protocol::{
    BreadcrumbLevel, CompressionLevel, CompressionType, DiagnosticEvent, ErrorReference,
    HostSignal, RawRecordingEvent, RecorderStats, ReplayMode, ReplayType, SampleRates, Segment,
};
pub use recorder::ReplayRecorder;
pub use sampler::Sampler;
pub use scheduler::{FlushReason, FlushScheduler};
pub use session::{Session, SessionLimits};
pub use transport::{Transport, TransportFactory};
