//! Session extraction: transcript parsing, the LLM pipeline, per-file state
//! tracking, side-file persistence, and the batch scanner.

pub mod extractor;
pub mod outputs;
pub mod pipeline;
pub mod scanner;
pub mod tracker;
pub mod transcript;

pub use extractor::{CommandExtractor, Extractor, OllamaExtractor};
pub use outputs::{MemoryOutputs, SessionIndexEntry};
pub use pipeline::{ExtractionOutcome, ExtractionPipeline, SkipReason};
pub use scanner::{BatchScanner, ScanReport};
pub use tracker::{ExtractionDecision, ExtractionRecord, ExtractionTracker};
pub use transcript::{normalize_turns, parse_transcript_file, parse_transcript_str, ParsedTranscript};
