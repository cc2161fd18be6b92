pub mod align;
pub mod annotation;
pub mod batch;
pub mod builder;
pub mod cache;
pub mod collator;
pub mod config;
pub mod error;
pub mod extractor;
pub mod manifest;
pub mod minibatch;
pub mod mux;
pub mod patch;
pub mod pipeline;
pub mod track_data;
pub mod transforms;

pub use annotation::{AnnotationLoader, AnnotationMapper, JsonAnnotationLoader, TaskTransformer};
pub use batch::{BatchMultiplexer, PartialBatch, PatchStream};
pub use builder::TrackDataBuilder;
pub use cache::{DirectoryStore, FeatureCache, FeatureStore, MemoryStore};
pub use collator::{Collator, ConcatCollator};
pub use config::StreamConfig;
pub use error::{data_error, DataError};
pub use extractor::FeatureExtractor;
pub use manifest::{SourceManifest, TrackEntry};
pub use minibatch::MiniBatch;
pub use mux::{ReadyStream, StreamSource, TrackErrorPolicy, TrackMultiplexer};
pub use patch::PatchSampler;
pub use pipeline::{create_stream, mux_streams, TrackPipeline, TrackSource};
pub use track_data::{Patch, TrackData};
pub use transforms::{Chain, Transform};
