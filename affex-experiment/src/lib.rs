pub mod config;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod export;
pub mod sampler;
pub mod scheduler;
pub mod stage;

pub use config::{Configuration, EvaluationPolicy};
pub use controller::{ActionOutcome, ParticipantAction, SessionController, SessionReport};
pub use error::{ConfigError, SensingError, SessionError};
pub use evaluator::{Evidence, Verdict, WindowedEvaluator};
pub use export::{ExportSink, FileSink};
pub use sampler::{Detection, ExpressionDetector, SamplerReport, SamplerSettings, SignalSampler};
pub use scheduler::{Cue, SchedulerEvent, TrialScheduler, TrialTiming};
pub use stage::{StageDimensions, TargetPlacement};
