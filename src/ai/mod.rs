/// Annotation backends for error findings
pub mod annotator;

/// Error signature extraction and grouping
pub mod classifier;

pub use annotator::{
    resolve_keys, Annotation, AnnotationRequest, Annotations, Annotator, LambdaAnnotator,
    MockAnnotator,
};
pub use classifier::{classify, ErrorSignature};
