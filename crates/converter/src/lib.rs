pub mod config;
pub mod tools;
pub mod ffprobe;
pub mod state;
pub mod scan;
pub mod ffmpeg;
pub mod convert;
pub mod scheduler;

pub use config::{ConverterConfig, TARGET_RESOLUTION};
pub use tools::{check_tools, SystemRunner, ToolError, ToolOutput, ToolRunner};
pub use ffprobe::Resolution;
pub use state::{ConversionStatus, StateStore};
pub use scan::{scan, Candidate, ScanOutcome};
pub use convert::{ConversionFailure, ConversionSuccess, ConvertError, Converter};
pub use scheduler::{run_worklist, RunSummary};
