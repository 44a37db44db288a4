use std::borrow::Cow;

/// ErrorMetadata object can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It is a generic object to be used
/// across the codebase to tag errors with information that is used to
/// classify them.
///
/// The msg is conveyed as a user facing error message if it makes it to the
/// client.
///
/// The short_msg is used as a tag - available for tests and for logging - to
/// have a message that is resilient to changes in copy.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// short ScreamingCamelCase. Usable in tests for string matching
    /// w/ a standard test helper.
    /// Eg DocumentNotFound
    pub short_msg: Cow<'static, str>,
    /// human readable - developer facing. Should be longer and descriptive.
    /// Eg "Document "recipes" was not found"
    pub msg: Cow<'static, str>,
}

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed input: bad patch document, unknown descriptor attributes,
    /// writes against a read-only historical view.
    BadRequest,
    /// Missing document, blob, or log entry.
    NotFound,
    /// Create against an existing key, or rename into an occupied key.
    KeyExists,
    /// Data rejected by the collection schema.
    SchemaViolation,
    /// A `test` operation in a JSON patch did not match.
    PatchTestFailed,
    /// Stale `previous` pointer: the log advanced underneath the writer.
    Conflict,
    /// Underlying store failure, wrapping the cause.
    Backend,
}

impl ErrorMetadata {
    /// Malformed input. The short_msg should be a CapitalCamelCased tag
    /// describing the error; the msg a descriptive message targeted toward
    /// the developer.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Resource not found (eg DocumentNotFound, BlobNotFound).
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A create or rename collided with a live document.
    pub fn key_exists(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::KeyExists,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The collection schema rejected the data.
    pub fn schema_violation(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::SchemaViolation,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A JSON patch `test` operation failed against the current document.
    pub fn patch_test_failed(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::PatchTestFailed,
            short_msg: PATCH_TEST_FAILED.into(),
            msg: msg.into(),
        }
    }

    /// The supplied `previous` pointer no longer names the latest log entry
    /// for its key.
    pub fn conflict(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Conflict,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Underlying store failure. Attach with `.context(...)` so the cause
    /// stays on the chain.
    pub fn backend(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Backend,
            short_msg: BACKEND_ERROR.into(),
            msg: msg.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_key_exists(&self) -> bool {
        self.code == ErrorCode::KeyExists
    }

    pub fn is_schema_violation(&self) -> bool {
        self.code == ErrorCode::SchemaViolation
    }

    pub fn is_patch_test_failed(&self) -> bool {
        self.code == ErrorCode::PatchTestFailed
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::Conflict
    }

    pub fn is_backend_error(&self) -> bool {
        self.code == ErrorCode::Backend
    }

    /// Return true if this error is deterministically caused by the caller's
    /// input. Such errors are safe to surface unmodified and to cache.
    pub fn is_deterministic_user_error(&self) -> bool {
        match self.code {
            ErrorCode::BadRequest
            | ErrorCode::NotFound
            | ErrorCode::KeyExists
            | ErrorCode::SchemaViolation
            | ErrorCode::PatchTestFailed => true,
            ErrorCode::Conflict | ErrorCode::Backend => false,
        }
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_key_exists(&self) -> bool;
    fn is_schema_violation(&self) -> bool;
    fn is_patch_test_failed(&self) -> bool;
    fn is_conflict(&self) -> bool;
    fn is_backend_error(&self) -> bool;
    fn is_deterministic_user_error(&self) -> bool;
    fn user_facing_message(&self) -> String;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
    fn wrap_error_message<F>(self, f: F) -> Self
    where
        F: FnOnce(String) -> String;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    /// Returns true if error is tagged as BadRequest
    fn is_bad_request(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_bad_request();
        }
        false
    }

    /// Returns true if error is tagged as NotFound
    fn is_not_found(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_not_found();
        }
        false
    }

    /// Returns true if error is tagged as KeyExists
    fn is_key_exists(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_key_exists();
        }
        false
    }

    /// Returns true if error is tagged as SchemaViolation
    fn is_schema_violation(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_schema_violation();
        }
        false
    }

    /// Returns true if error is tagged as PatchTestFailed
    fn is_patch_test_failed(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_patch_test_failed();
        }
        false
    }

    /// Returns true if error is tagged as Conflict
    fn is_conflict(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_conflict();
        }
        false
    }

    /// Returns true if error is tagged as a wrapped backend failure
    fn is_backend_error(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_backend_error();
        }
        false
    }

    /// Return true if this error is deterministically caused by the caller.
    /// Untagged errors are treated as internal.
    fn is_deterministic_user_error(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_deterministic_user_error();
        }
        false
    }

    fn user_facing_message(&self) -> String {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.to_string();
        }
        INTERNAL_ERROR_MSG.to_string()
    }

    /// Return the short_msg associated with this Error
    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        INTERNAL_ERROR
    }

    /// Return the descriptive msg associated with this Error
    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        INTERNAL_ERROR_MSG
    }

    fn map_error_metadata<F>(self, f: F) -> Self
    where
        F: FnOnce(ErrorMetadata) -> ErrorMetadata,
    {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>().cloned() {
            return self.context(f(e));
        }
        self
    }

    /// Wrap the underlying error message, maintaining the underlying error
    /// metadata short code if it exists.
    fn wrap_error_message<F>(self, f: F) -> Self
    where
        F: FnOnce(String) -> String,
    {
        if let Some(mut em) = self.downcast_ref::<ErrorMetadata>().cloned() {
            // Underlying ErrorMetadata. Reuse and reattach it.
            em.msg = f(em.msg.to_string()).into();
            return self.context(em);
        }

        // No underlying code. Just use .context()
        let new_msg = f(self.to_string());
        self.context(new_msg)
    }
}

pub const INTERNAL_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";
pub const INTERNAL_ERROR: &str = "InternalError";
pub const BACKEND_ERROR: &str = "BackendError";
pub const PATCH_TEST_FAILED: &str = "JsonPatchTestFailed";

#[cfg(any(test, feature = "testing"))]
mod proptest_impls {
    use proptest::prelude::*;

    use super::{
        ErrorCode,
        ErrorMetadata,
    };

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();

        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            any::<ErrorCode>()
                .prop_map(|ec| match ec {
                    ErrorCode::BadRequest => ErrorMetadata::bad_request("bad", "request"),
                    ErrorCode::NotFound => ErrorMetadata::not_found("not", "found"),
                    ErrorCode::KeyExists => ErrorMetadata::key_exists("key", "exists"),
                    ErrorCode::SchemaViolation => {
                        ErrorMetadata::schema_violation("schema", "violation")
                    },
                    ErrorCode::PatchTestFailed => ErrorMetadata::patch_test_failed("test failed"),
                    ErrorCode::Conflict => ErrorMetadata::conflict("con", "flict"),
                    ErrorCode::Backend => ErrorMetadata::backend("backend failure"),
                })
                .boxed()
        }
    }
}
