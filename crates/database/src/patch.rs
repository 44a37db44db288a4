//! RFC 6902 patch application and structural diff.
//!
//! Updates accept either a ready-made patch or a whole target document; the
//! latter is converted to a patch by structural diff so the log always
//! records the precise mutation.

use errors::ErrorMetadata;
use json_patch::{
    Patch,
    PatchErrorKind,
};
use serde_json::Value as JsonValue;

/// What an update was given: a patch to apply, or the complete document to
/// diff against the previous version.
#[derive(Clone, Debug)]
pub enum PatchOrTarget {
    Patch(JsonValue),
    Target(JsonValue),
}

/// Resolve an update request to the patch that will be logged.
pub fn resolve_patch(
    previous: &JsonValue,
    patch_or_target: &PatchOrTarget,
) -> anyhow::Result<Patch> {
    match patch_or_target {
        PatchOrTarget::Patch(raw) => parse_patch(raw),
        PatchOrTarget::Target(target) => Ok(json_patch::diff(previous, target)),
    }
}

pub fn parse_patch(raw: &JsonValue) -> anyhow::Result<Patch> {
    serde_json::from_value(raw.clone()).map_err(|e| {
        ErrorMetadata::bad_request("InvalidPatch", format!("Malformed JSON patch: {e}")).into()
    })
}

pub fn patch_to_value(patch: &Patch) -> anyhow::Result<JsonValue> {
    Ok(serde_json::to_value(patch)?)
}

/// Apply `patch` to a copy of `data`. A failed `test` operation is surfaced
/// as its own error kind; any other failure is a malformed patch.
pub fn apply_patch(data: &JsonValue, patch: &Patch) -> anyhow::Result<JsonValue> {
    let mut result = data.clone();
    json_patch::patch(&mut result, patch).map_err(|e| -> anyhow::Error {
        match e.kind {
            PatchErrorKind::TestFailed => {
                ErrorMetadata::patch_test_failed(format!("Patch test failed: {e}")).into()
            },
            _ => ErrorMetadata::bad_request("InvalidPatch", format!("Patch failed: {e}")).into(),
        }
    })?;
    Ok(result)
}
