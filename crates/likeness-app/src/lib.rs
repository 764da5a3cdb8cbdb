//! likeness-app: the photo-sorting and annotation workflows.
//!
//! Everything a front end needs sits behind plain functions taking paths and
//! an analyzer; there is no UI state here.

pub mod annotate;
pub mod output;
pub mod workflow;

pub use annotate::{annotate, Annotated, LabelSidecar, LabeledBox};
pub use output::{copy_groups, is_image, list_images, OutputError, IMAGE_EXTENSIONS};
pub use workflow::{recognize_and_annotate, start_processing, RecognizeSummary, SortOptions, SortSummary, WorkflowError};
