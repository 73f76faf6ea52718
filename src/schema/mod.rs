//! 中间表示：Explanation Document、校验器、Sync Manifest、Scene Code

pub mod document;
pub mod json_schema;
pub mod manifest;
pub mod scene;
pub mod validator;

pub use document::{normalize, slugify, CueKind, ExplanationDocument, Reference, Section, VisualCue};
pub use json_schema::{
    document_schema_json, document_shape, scene_draft_schema_json, scene_draft_shape, SceneDraft,
};
pub use manifest::{
    check_manifest, coverage, layout, reconcile, Coverage, CueSpan, ManifestIssue, Reconciled,
    SegmentTiming, SyncManifest, SyncPolicy,
};
pub use scene::SceneCode;
pub use validator::{
    validate, Locator, Rule, ValidationPolicy, ValidationResult, Validator, Violation,
};
