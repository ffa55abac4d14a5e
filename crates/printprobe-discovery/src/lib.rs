//! Protocol discovery for PrintProbe.
//!
//! Captures traffic against a live device, pairs commands with responses,
//! and turns classified pairs into a command catalog.
//!
//! ## Pipeline
//!
//! ```text
//! DiscoveryOrchestrator ─▶ MessageLog ─▶ Correlator ─▶ SchemaBuilder ─▶ CommandCatalog
//!                                              │              │
//!                                              └─ classifier ─┘
//! ```

pub mod analysis;
pub mod correlator;
pub mod describe;
pub mod orchestrator;
pub mod probes;
pub mod report;
pub mod schema;

pub use analysis::{AnalysisReport, Analyzer, ExecutiveSummary, FieldSchema, extract_field_schema};
pub use correlator::{CommandResponsePair, Correlation, Correlator, correlate};
pub use orchestrator::{DiscoveryOrchestrator, DiscoveryOutcome, RAW_LOG_FILE, REPORT_FILE};
pub use report::{Completion, DiscoveryReport, Phase, PhaseStats};
pub use schema::{SchemaAnalysis, SchemaBuilder, ShapeReport, canonical_id};
