//! Scene audio engine: mixer manager, soundtrack/operator streams, frame
//! orchestration, and export rendering on top of the [`sf_audio`] native
//! backend contract.

mod export;
mod mixer_manager;
mod operator;
mod orchestrator;
mod soundtrack;

pub use export::{ExportFrame, ExportSession};
pub use mixer_manager::MixerManager;
pub use operator::{Mode3D, OperatorStream};
pub use orchestrator::{AnalysisSettings, AudioSource, Engine, PlaybackState, SpatialOperatorUpdate, StereoOperatorUpdate};
pub use soundtrack::SoundtrackClipStream;
